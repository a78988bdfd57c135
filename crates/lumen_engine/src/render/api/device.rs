//! The device seam
//!
//! Every Vulkan call the rendering core makes goes through [`GpuDevice`]. The
//! frame loop, descriptor allocator, deletion queue and render sequencer are
//! generic over it, so they run unchanged against the ash backend or against
//! the recording mock used in tests.

use ash::vk;

use super::types::{
    AllocatedBuffer, AllocatedImage, BlitRegion, DescriptorWrite, GraphicsPipelineDesc, ImageDesc,
    ImageTransition, MemoryResidency, RenderingAttachments, SamplerDesc, SubmitDesc,
};
use super::VulkanResult;

/// Abstraction over a logical device, its queue, swapchain and allocator
///
/// Methods mirror the shape of the corresponding `ash::Device` calls. Every
/// method takes `&mut self`; implementations track allocations and the
/// recording mock logs calls.
pub trait GpuDevice {
    // ---- synchronization -------------------------------------------------

    /// Create a fence, optionally already signaled
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: vk::Fence);

    /// Block until `fence` signals; elapsed timeout maps to
    /// [`VulkanError::FenceTimeout`](super::VulkanError::FenceTimeout)
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()>;

    /// Return `fence` to the unsignaled state
    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);

    // ---- commands --------------------------------------------------------

    /// Create a resettable command pool on the graphics queue family
    fn create_command_pool(&mut self) -> VulkanResult<vk::CommandPool>;

    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);

    /// Allocate one primary command buffer
    fn allocate_command_buffer(&mut self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer>;

    /// Reset `cmd` and begin one-time-submit recording
    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()>;

    /// Submit one command buffer to the graphics queue
    fn submit(&mut self, submit: &SubmitDesc) -> VulkanResult<()>;

    /// Wait until the device has no work in flight
    fn wait_idle(&mut self) -> VulkanResult<()>;

    // ---- swapchain -------------------------------------------------------

    /// Acquire the next presentable image, signaling `semaphore` when ready.
    /// An out-of-date surface maps to
    /// [`VulkanError::SwapchainOutOfDate`](super::VulkanError::SwapchainOutOfDate)
    fn acquire_next_image(&mut self, semaphore: vk::Semaphore, timeout_ns: u64) -> VulkanResult<u32>;

    /// Queue `image_index` for presentation once `wait_semaphore` signals
    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> VulkanResult<()>;

    /// Current swapchain image size
    fn swapchain_extent(&self) -> vk::Extent2D;

    /// Swapchain image and view for an acquired index
    fn swapchain_image(&self, index: u32) -> VulkanResult<(vk::Image, vk::ImageView)>;

    /// Rebuild the swapchain for a new surface size
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()>;

    // ---- descriptors -----------------------------------------------------

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);

    /// Create a descriptor pool for `max_sets` sets
    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Free every set allocated from `pool`, keeping its capacity
    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> VulkanResult<()>;

    /// Destroy a descriptor pool
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);

    /// Allocate one set. A full pool reports `ERROR_OUT_OF_POOL_MEMORY` or
    /// `ERROR_FRAGMENTED_POOL` as [`VulkanError::Api`](super::VulkanError::Api)
    fn allocate_descriptor_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;

    /// Apply descriptor writes to `set`
    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // ---- memory ----------------------------------------------------------

    /// Allocate a buffer; mapped residencies come back with a live pointer
    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<AllocatedBuffer>;

    /// Destroy a buffer and free its allocation immediately
    fn destroy_buffer(&mut self, buffer: AllocatedBuffer);

    /// GPU virtual address of a buffer created with device-address usage
    fn buffer_device_address(&mut self, buffer: vk::Buffer) -> vk::DeviceAddress;

    /// Allocate a device-local image and a full-range view
    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<AllocatedImage>;

    /// Destroy an image, its view, and its allocation immediately
    fn destroy_image(&mut self, image: AllocatedImage);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    // ---- pipelines -------------------------------------------------------

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;

    /// Destroy a shader module
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);

    /// Create a compute pipeline with entry point `main`
    fn create_compute_pipeline(
        &mut self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline>;

    /// Create a graphics pipeline for dynamic rendering
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    // ---- recording -------------------------------------------------------

    /// Record a synchronization2 layout transition
    fn cmd_transition_image(&mut self, cmd: vk::CommandBuffer, transition: &ImageTransition);

    /// Record a scaled image blit
    fn cmd_blit_image(&mut self, cmd: vk::CommandBuffer, blit: &BlitRegion);

    /// Record a buffer-to-buffer copy
    fn cmd_copy_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    /// Record a tightly packed buffer-to-image copy into mip 0
    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    );

    /// Bind a pipeline
    fn cmd_bind_pipeline(
        &mut self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    /// Upload push constant bytes
    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    /// Dispatch compute workgroups
    fn cmd_dispatch(&mut self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);

    /// Begin a dynamic rendering pass
    fn cmd_begin_rendering(&mut self, cmd: vk::CommandBuffer, attachments: &RenderingAttachments);

    /// End the current dynamic rendering pass
    fn cmd_end_rendering(&mut self, cmd: vk::CommandBuffer);

    /// Set viewport and scissor to cover `extent`
    fn cmd_set_viewport_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    /// Bind a 32-bit index buffer
    fn cmd_bind_index_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize);

    /// Draw one instance of indexed geometry
    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32);
}
