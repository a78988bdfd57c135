//! Per-frame resources and the ring that cycles through them

use ash::vk;

use crate::render::api::{GpuDevice, VulkanResult};
use crate::render::resources::{DescriptorAllocatorGrowable, PoolSizeRatio};

use super::{DeletionQueue, Disposal};

/// Number of frames that may be in flight at once
pub const FRAME_OVERLAP: usize = 2;

const FRAME_POOL_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

/// Everything one in-flight frame owns
///
/// The fence guards all of it: nothing here may be touched by the CPU until
/// the fence from the slot's previous submission has signaled.
#[derive(Debug)]
pub struct FrameSlot {
    /// Pool the frame's command buffer comes from
    pub command_pool: vk::CommandPool,
    /// Primary command buffer, reset every use
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the slot's last submission completes
    pub render_fence: vk::Fence,
    /// Signaled when the swapchain image is ready to be written
    pub image_acquired: vk::Semaphore,
    /// Signaled when rendering finishes; present waits on it
    pub render_complete: vk::Semaphore,
    /// Objects that die once this slot's work is known complete
    pub deletion_queue: DeletionQueue,
    /// Transient descriptor sets for this frame
    pub descriptors: DescriptorAllocatorGrowable,
    retired: usize,
}

impl FrameSlot {
    /// Create one slot. On failure the objects created so far are destroyed.
    fn new<D: GpuDevice>(device: &mut D, initial_descriptor_sets: u32) -> VulkanResult<Self> {
        let mut created = DeletionQueue::new();
        match Self::build(device, initial_descriptor_sets, &mut created) {
            Ok(slot) => Ok(slot),
            Err(e) => {
                log::error!("Frame slot creation failed, releasing {} objects: {}", created.len(), e);
                created.flush(device);
                Err(e)
            }
        }
    }

    fn build<D: GpuDevice>(
        device: &mut D,
        initial_descriptor_sets: u32,
        created: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        let command_pool = device.create_command_pool()?;
        created.push(Disposal::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;

        // signaled so the very first wait returns immediately
        let render_fence = device.create_fence(true)?;
        created.push(Disposal::Fence(render_fence));
        let image_acquired = device.create_semaphore()?;
        created.push(Disposal::Semaphore(image_acquired));
        let render_complete = device.create_semaphore()?;
        created.push(Disposal::Semaphore(render_complete));

        let descriptors = DescriptorAllocatorGrowable::new(device, initial_descriptor_sets, &FRAME_POOL_RATIOS)?;

        Ok(Self {
            command_pool,
            command_buffer,
            render_fence,
            image_acquired,
            render_complete,
            deletion_queue: DeletionQueue::new(),
            descriptors,
            retired: 0,
        })
    }

    /// Release what the slot's previous frame left behind.
    ///
    /// Only valid after the render fence has been waited on. Returns the
    /// number of deletion records run.
    pub fn retire<D: GpuDevice>(&mut self, device: &mut D) -> VulkanResult<usize> {
        let flushed = self.deletion_queue.flush(device);
        self.descriptors.clear(device)?;
        self.retired += 1;
        Ok(flushed)
    }

    /// How many times [`retire`](Self::retire) has run
    pub fn retire_count(&self) -> usize {
        self.retired
    }

    fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        self.deletion_queue.flush(device);
        self.descriptors.destroy(device);
        device.destroy_command_pool(self.command_pool);
        device.destroy_fence(self.render_fence);
        device.destroy_semaphore(self.render_complete);
        device.destroy_semaphore(self.image_acquired);
    }
}

/// Fixed ring of [`FRAME_OVERLAP`] frame slots indexed by frame number
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame_number: u64,
}

impl FrameRing {
    /// Create every slot
    pub fn new<D: GpuDevice>(device: &mut D, initial_descriptor_sets: u32) -> VulkanResult<Self> {
        log::debug!("Creating {} frame slots...", FRAME_OVERLAP);
        let mut ring = Self {
            slots: Vec::with_capacity(FRAME_OVERLAP),
            frame_number: 0,
        };
        for _ in 0..FRAME_OVERLAP {
            match FrameSlot::new(device, initial_descriptor_sets) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(ring)
    }

    /// Slot used by the current frame number
    pub fn current_index(&self) -> usize {
        (self.frame_number % FRAME_OVERLAP as u64) as usize
    }

    /// Slot for the current frame
    pub fn current(&mut self) -> &mut FrameSlot {
        let index = self.current_index();
        &mut self.slots[index]
    }

    /// Slot at `index`, for inspection
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Frames completed so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Move on to the next frame
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }

    /// Destroy every slot. The device must be idle.
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for slot in &mut self.slots {
            slot.destroy(device);
        }
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{MemoryResidency, ResourceKind};
    use crate::render::testing::MockDevice;

    #[test]
    fn test_ring_alternates_between_slots() {
        let mut device = MockDevice::new();
        let mut ring = FrameRing::new(&mut device, 16).unwrap();

        let mut fences = Vec::new();
        for frame in 0..5u64 {
            assert_eq!(ring.frame_number(), frame);
            assert_eq!(ring.current_index(), (frame % 2) as usize);
            fences.push(ring.current().render_fence);
            ring.advance();
        }

        assert_eq!(fences[0], fences[2]);
        assert_eq!(fences[2], fences[4]);
        assert_eq!(fences[1], fences[3]);
        assert_ne!(fences[0], fences[1]);

        ring.destroy(&mut device);
        device.assert_no_leaks();
    }

    #[test]
    fn test_slots_start_with_signaled_fences() {
        let mut device = MockDevice::new();
        let mut ring = FrameRing::new(&mut device, 16).unwrap();
        for _ in 0..FRAME_OVERLAP {
            let fence = ring.current().render_fence;
            assert!(device.wait_for_fence(fence, 1).is_ok());
            ring.advance();
        }
        ring.destroy(&mut device);
    }

    #[test]
    fn test_retire_flushes_queue_and_counts() {
        let mut device = MockDevice::new();
        let mut ring = FrameRing::new(&mut device, 16).unwrap();

        let buffer = device
            .create_buffer(256, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryResidency::HostVisible)
            .unwrap();
        ring.current().deletion_queue.push(Disposal::Buffer(buffer));

        let slot = ring.current();
        assert_eq!(slot.retire(&mut device).unwrap(), 1);
        assert_eq!(slot.retire(&mut device).unwrap(), 0);
        assert_eq!(slot.retire_count(), 2);
        assert_eq!(device.outstanding_allocations(), 0);

        ring.destroy(&mut device);
        device.assert_no_leaks();
    }

    #[test]
    fn test_failed_slot_releases_what_it_created() {
        // (kind, creations that succeed before the failure)
        let failures = [
            (ResourceKind::Fence, 0),
            (ResourceKind::Semaphore, 0),
            (ResourceKind::Semaphore, 1),
            (ResourceKind::DescriptorPool, 0),
        ];
        for (kind, successes) in failures {
            let mut device = MockDevice::new();
            device.fail_creation(kind, successes);
            assert!(FrameRing::new(&mut device, 16).is_err(), "{:?}", kind);
            device.assert_no_leaks();
        }
    }

    #[test]
    fn test_failed_second_slot_releases_the_first() {
        let mut device = MockDevice::new();
        // the first slot takes one command pool; the second one fails
        device.fail_creation(ResourceKind::CommandPool, 1);

        let err = FrameRing::new(&mut device, 16).unwrap_err();
        assert!(matches!(err, crate::render::api::VulkanError::Api(_)));
        assert_eq!(device.live_count(ResourceKind::Fence), 0);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
        device.assert_no_leaks();
    }

    #[test]
    fn test_destroy_releases_pending_disposals() {
        let mut device = MockDevice::new();
        let mut ring = FrameRing::new(&mut device, 16).unwrap();
        let buffer = device
            .create_buffer(64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryResidency::HostVisible)
            .unwrap();
        ring.current().deletion_queue.push(Disposal::Buffer(buffer));

        ring.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
        device.assert_no_leaks();
    }
}
