//! Blocking one-shot command submission
//!
//! Uploads and other setup work are recorded into a dedicated command buffer,
//! submitted, and waited on before returning. The submitter owns its own pool
//! and fence so it never touches per-frame state.

use ash::vk;

use crate::render::api::{GpuDevice, SubmitDesc, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal};

/// Upper bound on how long an upload may take before the device is considered hung
const IMMEDIATE_TIMEOUT_NS: u64 = 9_999_999_999;

/// Synchronous single-use command submission
#[derive(Debug)]
pub struct ImmediateSubmitter {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl ImmediateSubmitter {
    /// Create the pool, command buffer and fence, queuing their disposal
    pub fn new<D: GpuDevice>(device: &mut D, deletion_queue: &mut DeletionQueue) -> VulkanResult<Self> {
        log::debug!("Creating ImmediateSubmitter...");

        let command_pool = device.create_command_pool()?;
        deletion_queue.push(Disposal::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;

        let fence = device.create_fence(true)?;
        deletion_queue.push(Disposal::Fence(fence));

        Ok(Self {
            command_buffer,
            fence,
        })
    }

    /// Record with `record`, submit, and block until the GPU is done.
    ///
    /// Must not be called while a frame is being recorded. Taking `&mut self`
    /// rules out nested submissions from inside `record`.
    pub fn submit<D, F>(&mut self, device: &mut D, record: F) -> VulkanResult<()>
    where
        D: GpuDevice,
        F: FnOnce(&mut D, vk::CommandBuffer) -> VulkanResult<()>,
    {
        device.reset_fence(self.fence)?;
        device.begin_command_buffer(self.command_buffer)?;
        record(device, self.command_buffer)?;
        device.end_command_buffer(self.command_buffer)?;

        device.submit(&SubmitDesc {
            command_buffer: self.command_buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;

        device.wait_for_fence(self.fence, IMMEDIATE_TIMEOUT_NS)
    }
}
