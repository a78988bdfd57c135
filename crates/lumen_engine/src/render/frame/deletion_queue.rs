//! Deferred destruction of GPU objects
//!
//! Records are tagged with the kind of object they dispose of and run by a
//! fixed dispatcher, newest first.

use ash::vk;

use crate::render::api::{AllocatedBuffer, AllocatedImage, GpuDevice, ResourceKind};

/// A GPU object waiting to be destroyed
#[derive(Debug, Clone)]
pub enum Disposal {
    /// Buffer and its allocation
    Buffer(AllocatedBuffer),
    /// Image, view and allocation
    Image(AllocatedImage),
    /// Sampler
    Sampler(vk::Sampler),
    /// Descriptor pool
    DescriptorPool(vk::DescriptorPool),
    /// Descriptor set layout
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Pipeline
    Pipeline(vk::Pipeline),
    /// Pipeline layout
    PipelineLayout(vk::PipelineLayout),
    /// Shader module
    ShaderModule(vk::ShaderModule),
    /// Fence
    Fence(vk::Fence),
    /// Semaphore
    Semaphore(vk::Semaphore),
    /// Command pool
    CommandPool(vk::CommandPool),
}

impl Disposal {
    /// Kind of object this record destroys
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Image(_) => ResourceKind::Image,
            Self::Sampler(_) => ResourceKind::Sampler,
            Self::DescriptorPool(_) => ResourceKind::DescriptorPool,
            Self::DescriptorSetLayout(_) => ResourceKind::DescriptorSetLayout,
            Self::Pipeline(_) => ResourceKind::Pipeline,
            Self::PipelineLayout(_) => ResourceKind::PipelineLayout,
            Self::ShaderModule(_) => ResourceKind::ShaderModule,
            Self::Fence(_) => ResourceKind::Fence,
            Self::Semaphore(_) => ResourceKind::Semaphore,
            Self::CommandPool(_) => ResourceKind::CommandPool,
        }
    }

    fn dispose<D: GpuDevice>(self, device: &mut D) {
        match self {
            Self::Buffer(buffer) => device.destroy_buffer(buffer),
            Self::Image(image) => device.destroy_image(image),
            Self::Sampler(sampler) => device.destroy_sampler(sampler),
            Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            Self::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            Self::Pipeline(pipeline) => device.destroy_pipeline(pipeline),
            Self::PipelineLayout(layout) => device.destroy_pipeline_layout(layout),
            Self::ShaderModule(module) => device.destroy_shader_module(module),
            Self::Fence(fence) => device.destroy_fence(fence),
            Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
            Self::CommandPool(pool) => device.destroy_command_pool(pool),
        }
    }
}

/// LIFO list of pending disposals
#[derive(Debug, Default)]
pub struct DeletionQueue {
    records: Vec<Disposal>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `disposal` to run on the next flush
    pub fn push(&mut self, disposal: Disposal) {
        log::trace!("Queued {:?} for deletion", disposal.kind());
        self.records.push(disposal);
    }

    /// Destroy everything in reverse push order and empty the queue.
    ///
    /// Returns the number of records run. Flushing an empty queue does nothing.
    pub fn flush<D: GpuDevice>(&mut self, device: &mut D) -> usize {
        let count = self.records.len();
        while let Some(disposal) = self.records.pop() {
            disposal.dispose(device);
        }
        if count > 0 {
            log::trace!("Flushed {} deletion records", count);
        }
        count
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pending records in push order
    pub fn iter(&self) -> impl Iterator<Item = &Disposal> {
        self.records.iter()
    }
}
