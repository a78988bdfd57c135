//! Recording mock of [`GpuDevice`] for unit tests
//!
//! Handles are synthetic, the "GPU" completes work the instant it is
//! submitted, and every call is appended to [`MockDevice::calls`] so tests can
//! assert ordering. Allocations are tracked so leaks and double frees show up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ptr::NonNull;

use ash::vk::{self, Handle};

use super::api::{
    AllocatedBuffer, AllocatedImage, AllocationId, BlitRegion, DescriptorWrite, GpuDevice,
    GraphicsPipelineDesc, ImageDesc, ImageTransition, MemoryResidency, RenderingAttachments,
    ResourceKind, SamplerDesc, SubmitDesc, VulkanError, VulkanResult,
};

/// A command recorded into a command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Transition(ImageTransition),
    Blit(BlitRegion),
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image },
    BindPipeline(vk::PipelineBindPoint, vk::Pipeline),
    BindDescriptorSets { layout: vk::PipelineLayout, first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants { stages: vk::ShaderStageFlags, data: Vec<u8> },
    Dispatch(u32, u32, u32),
    BeginRendering(RenderingAttachments),
    EndRendering,
    SetViewportScissor(vk::Extent2D),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed { index_count: u32, first_index: u32 },
}

/// Any call made on the device, in order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit(SubmitRecord),
    Acquire,
    Present(u32),
    WaitIdle,
    RecreateSwapchain(u32, u32),
    CreateDescriptorPool { pool: vk::DescriptorPool, max_sets: u32 },
    ResetDescriptorPool(vk::DescriptorPool),
    AllocateDescriptorSet { pool: vk::DescriptorPool, ok: bool },
    UpdateDescriptorSet(vk::DescriptorSet, Vec<DescriptorWrite>),
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize, residency: MemoryResidency },
    CreateImage(vk::Image),
    Destroy(ResourceKind, u64),
    Record(vk::CommandBuffer, Recorded),
}

/// Copyable view of a [`SubmitDesc`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRecord {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    pub signal: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    pub fence: vk::Fence,
}

/// Scripted result of an acquire or present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Ok,
    OutOfDate,
}

struct MockPool {
    max_sets: u32,
    allocated: u32,
}

pub struct MockDevice {
    next_handle: u64,
    pub calls: Vec<DeviceCall>,
    fences: HashMap<vk::Fence, bool>,
    pools: HashMap<vk::DescriptorPool, MockPool>,
    failing_resets: HashSet<vk::DescriptorPool>,
    creation_failures: HashMap<ResourceKind, usize>,
    allocations: HashMap<AllocationId, Option<Box<[u8]>>>,
    live: HashMap<ResourceKind, i64>,
    acquire_script: VecDeque<Scripted>,
    present_script: VecDeque<Scripted>,
    pool_capacity_override: Option<u32>,
    swapchain: Vec<(vk::Image, vk::ImageView)>,
    extent: vk::Extent2D,
    next_image: u32,
}

impl MockDevice {
    pub fn new() -> Self {
        let mut device = Self {
            next_handle: 1,
            calls: Vec::new(),
            fences: HashMap::new(),
            pools: HashMap::new(),
            failing_resets: HashSet::new(),
            creation_failures: HashMap::new(),
            allocations: HashMap::new(),
            live: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            pool_capacity_override: None,
            swapchain: Vec::new(),
            extent: vk::Extent2D { width: 1280, height: 720 },
            next_image: 0,
        };
        device.rebuild_swapchain_images();
        device
    }

    fn handle(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn rebuild_swapchain_images(&mut self) {
        self.swapchain = (0..3)
            .map(|_| {
                let image = vk::Image::from_raw(self.handle());
                let view = vk::ImageView::from_raw(self.handle());
                (image, view)
            })
            .collect();
        self.next_image = 0;
    }

    fn created(&mut self, kind: ResourceKind) -> VulkanResult<()> {
        if let Some(remaining) = self.creation_failures.get_mut(&kind) {
            if *remaining == 0 {
                self.creation_failures.remove(&kind);
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            *remaining -= 1;
        }
        *self.live.entry(kind).or_insert(0) += 1;
        Ok(())
    }

    fn destroyed(&mut self, kind: ResourceKind, raw: u64) {
        *self.live.entry(kind).or_insert(0) -= 1;
        self.calls.push(DeviceCall::Destroy(kind, raw));
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Recorded) {
        self.calls.push(DeviceCall::Record(cmd, command));
    }

    /// Make the next acquire report an out-of-date surface
    pub fn script_acquire(&mut self, result: Scripted) {
        self.acquire_script.push_back(result);
    }

    /// Make the next present report an out-of-date surface
    pub fn script_present(&mut self, result: Scripted) {
        self.present_script.push_back(result);
    }

    /// Leave `fence` unsignaled as if its GPU work never completed
    pub fn hang_fence(&mut self, fence: vk::Fence) {
        self.fences.insert(fence, false);
    }

    /// Let `successes` more objects of `kind` be created, then fail the next
    pub fn fail_creation(&mut self, kind: ResourceKind, successes: usize) {
        self.creation_failures.insert(kind, successes);
    }

    /// Make every reset of `pool` fail
    pub fn fail_pool_reset(&mut self, pool: vk::DescriptorPool) {
        self.failing_resets.insert(pool);
    }

    /// Force the capacity of every pool created from now on
    pub fn override_pool_capacity(&mut self, capacity: Option<u32>) {
        self.pool_capacity_override = capacity;
    }

    /// Allocations created and not yet destroyed
    pub fn outstanding_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Created minus destroyed for one resource kind
    pub fn live_count(&self, kind: ResourceKind) -> i64 {
        self.live.get(&kind).copied().unwrap_or(0)
    }

    /// Whether every created object has been destroyed
    pub fn assert_no_leaks(&self) {
        assert_eq!(self.outstanding_allocations(), 0, "leaked allocations");
        for (kind, count) in &self.live {
            assert_eq!(*count, 0, "leaked {:?}", kind);
        }
    }

    /// Number of waits on `fence`
    pub fn fence_waits(&self, fence: vk::Fence) -> usize {
        self.calls.iter().filter(|c| **c == DeviceCall::WaitFence(fence)).count()
    }

    /// Commands recorded into `cmd` since its most recent begin
    pub fn last_recording(&self, cmd: vk::CommandBuffer) -> Vec<Recorded> {
        let start = self
            .calls
            .iter()
            .rposition(|c| *c == DeviceCall::BeginCommandBuffer(cmd))
            .map_or(0, |i| i + 1);
        self.calls[start..]
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Record(buffer, command) if *buffer == cmd => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every submit so far
    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Submit(record) => Some(*record),
                _ => None,
            })
            .collect()
    }

    /// Every destroy of `kind`, in order
    pub fn destroyed_of(&self, kind: ResourceKind) -> Vec<u64> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Destroy(k, raw) if *k == kind => Some(*raw),
                _ => None,
            })
            .collect()
    }
}

impl GpuDevice for MockDevice {
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        self.created(ResourceKind::Fence)?;
        let fence = vk::Fence::from_raw(self.handle());
        self.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.fences.remove(&fence);
        self.destroyed(ResourceKind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        self.calls.push(DeviceCall::WaitFence(fence));
        match self.fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(VulkanError::FenceTimeout { timeout_ns }),
            None => Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        self.calls.push(DeviceCall::ResetFence(fence));
        self.fences.insert(fence, false);
        Ok(())
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        self.created(ResourceKind::Semaphore)?;
        Ok(vk::Semaphore::from_raw(self.handle()))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.destroyed(ResourceKind::Semaphore, semaphore.as_raw());
    }

    fn create_command_pool(&mut self) -> VulkanResult<vk::CommandPool> {
        self.created(ResourceKind::CommandPool)?;
        Ok(vk::CommandPool::from_raw(self.handle()))
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        self.destroyed(ResourceKind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffer(&mut self, _pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        Ok(vk::CommandBuffer::from_raw(self.handle()))
    }

    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        self.calls.push(DeviceCall::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        self.calls.push(DeviceCall::EndCommandBuffer(cmd));
        Ok(())
    }

    fn submit(&mut self, submit: &SubmitDesc) -> VulkanResult<()> {
        self.calls.push(DeviceCall::Submit(SubmitRecord {
            command_buffer: submit.command_buffer,
            wait: submit.wait,
            signal: submit.signal,
            fence: submit.fence,
        }));
        if submit.fence != vk::Fence::null() {
            self.fences.insert(submit.fence, true);
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        self.calls.push(DeviceCall::WaitIdle);
        Ok(())
    }

    fn acquire_next_image(&mut self, _semaphore: vk::Semaphore, _timeout_ns: u64) -> VulkanResult<u32> {
        self.calls.push(DeviceCall::Acquire);
        if self.acquire_script.pop_front() == Some(Scripted::OutOfDate) {
            return Err(VulkanError::SwapchainOutOfDate);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.swapchain.len() as u32;
        Ok(index)
    }

    fn present(&mut self, image_index: u32, _wait_semaphore: vk::Semaphore) -> VulkanResult<()> {
        self.calls.push(DeviceCall::Present(image_index));
        if self.present_script.pop_front() == Some(Scripted::OutOfDate) {
            return Err(VulkanError::SwapchainOutOfDate);
        }
        Ok(())
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn swapchain_image(&self, index: u32) -> VulkanResult<(vk::Image, vk::ImageView)> {
        self.swapchain
            .get(index as usize)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no swapchain image {}", index),
            })
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        self.calls.push(DeviceCall::RecreateSwapchain(width, height));
        self.extent = vk::Extent2D { width, height };
        self.rebuild_swapchain_images();
        Ok(())
    }

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        self.created(ResourceKind::DescriptorSetLayout)?;
        Ok(vk::DescriptorSetLayout::from_raw(self.handle()))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.destroyed(ResourceKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        self.created(ResourceKind::DescriptorPool)?;
        let pool = vk::DescriptorPool::from_raw(self.handle());
        let capacity = self.pool_capacity_override.unwrap_or(max_sets);
        self.pools.insert(pool, MockPool { max_sets: capacity, allocated: 0 });
        self.calls.push(DeviceCall::CreateDescriptorPool { pool, max_sets });
        Ok(pool)
    }

    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        self.calls.push(DeviceCall::ResetDescriptorPool(pool));
        if self.failing_resets.contains(&pool) {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let state = self
            .pools
            .get_mut(&pool)
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))?;
        state.allocated = 0;
        Ok(())
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        self.pools.remove(&pool);
        self.destroyed(ResourceKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let full = match self.pools.get_mut(&pool) {
            Some(state) if state.allocated < state.max_sets => {
                state.allocated += 1;
                false
            }
            Some(_) => true,
            None => return Err(VulkanError::Api(vk::Result::ERROR_UNKNOWN)),
        };
        self.calls.push(DeviceCall::AllocateDescriptorSet { pool, ok: !full });
        if full {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        Ok(vk::DescriptorSet::from_raw(self.handle()))
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.calls.push(DeviceCall::UpdateDescriptorSet(set, writes.to_vec()));
    }

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<AllocatedBuffer> {
        let buffer = vk::Buffer::from_raw(self.handle());
        let allocation = AllocationId(self.handle());

        let mut storage = residency
            .is_mapped()
            .then(|| vec![0u8; size as usize].into_boxed_slice());
        let mapped = storage.as_mut().and_then(|bytes| NonNull::new(bytes.as_mut_ptr()));
        self.allocations.insert(allocation, storage);

        self.calls.push(DeviceCall::CreateBuffer { buffer, size, residency });
        Ok(AllocatedBuffer::new(buffer, allocation, size, mapped))
    }

    fn destroy_buffer(&mut self, buffer: AllocatedBuffer) {
        assert!(
            self.allocations.remove(&buffer.allocation).is_some(),
            "buffer {:?} destroyed twice",
            buffer.buffer
        );
        self.calls.push(DeviceCall::Destroy(ResourceKind::Buffer, buffer.buffer.as_raw()));
    }

    fn buffer_device_address(&mut self, buffer: vk::Buffer) -> vk::DeviceAddress {
        0x1000_0000 + buffer.as_raw() * 0x100
    }

    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        let image = vk::Image::from_raw(self.handle());
        let view = vk::ImageView::from_raw(self.handle());
        let allocation = AllocationId(self.handle());
        self.allocations.insert(allocation, None);
        self.calls.push(DeviceCall::CreateImage(image));
        Ok(AllocatedImage {
            image,
            view,
            allocation,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels,
        })
    }

    fn destroy_image(&mut self, image: AllocatedImage) {
        assert!(
            self.allocations.remove(&image.allocation).is_some(),
            "image {:?} destroyed twice",
            image.image
        );
        self.calls.push(DeviceCall::Destroy(ResourceKind::Image, image.image.as_raw()));
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        self.created(ResourceKind::Sampler)?;
        Ok(vk::Sampler::from_raw(self.handle()))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.destroyed(ResourceKind::Sampler, sampler.as_raw());
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(VulkanError::Api(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        self.created(ResourceKind::ShaderModule)?;
        Ok(vk::ShaderModule::from_raw(self.handle()))
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.destroyed(ResourceKind::ShaderModule, module.as_raw());
    }

    fn create_pipeline_layout(
        &mut self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        self.created(ResourceKind::PipelineLayout)?;
        Ok(vk::PipelineLayout::from_raw(self.handle()))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.destroyed(ResourceKind::PipelineLayout, layout.as_raw());
    }

    fn create_compute_pipeline(
        &mut self,
        _layout: vk::PipelineLayout,
        _module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline> {
        self.created(ResourceKind::Pipeline)?;
        Ok(vk::Pipeline::from_raw(self.handle()))
    }

    fn create_graphics_pipeline(&mut self, _desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        self.created(ResourceKind::Pipeline)?;
        Ok(vk::Pipeline::from_raw(self.handle()))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.destroyed(ResourceKind::Pipeline, pipeline.as_raw());
    }

    fn cmd_transition_image(&mut self, cmd: vk::CommandBuffer, transition: &ImageTransition) {
        self.record(cmd, Recorded::Transition(*transition));
    }

    fn cmd_blit_image(&mut self, cmd: vk::CommandBuffer, blit: &BlitRegion) {
        self.record(cmd, Recorded::Blit(*blit));
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        _regions: &[vk::BufferCopy],
    ) {
        self.record(cmd, Recorded::CopyBuffer { src, dst });
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _extent: vk::Extent3D,
    ) {
        self.record(cmd, Recorded::CopyBufferToImage { src, dst });
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(cmd, Recorded::BindPipeline(bind_point, pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(cmd, Recorded::BindDescriptorSets { layout, first_set, sets: sets.to_vec() });
    }

    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(cmd, Recorded::PushConstants { stages, data: data.to_vec() });
    }

    fn cmd_dispatch(&mut self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(cmd, Recorded::Dispatch(x, y, z));
    }

    fn cmd_begin_rendering(&mut self, cmd: vk::CommandBuffer, attachments: &RenderingAttachments) {
        self.record(cmd, Recorded::BeginRendering(*attachments));
    }

    fn cmd_end_rendering(&mut self, cmd: vk::CommandBuffer) {
        self.record(cmd, Recorded::EndRendering);
    }

    fn cmd_set_viewport_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(cmd, Recorded::SetViewportScissor(extent));
    }

    fn cmd_bind_index_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, _offset: vk::DeviceSize) {
        self.record(cmd, Recorded::BindIndexBuffer(buffer));
    }

    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32) {
        self.record(cmd, Recorded::DrawIndexed { index_count, first_index });
    }
}

/// Write minimal SPIR-V blobs for every shader the renderer loads into a
/// fresh temporary directory and return it.
pub fn dummy_shader_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("lumen_shaders_{}_{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).expect("create shader dir");
    let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
    for name in crate::render::pipeline::REQUIRED_SHADERS {
        std::fs::write(dir.join(name), bytemuck::cast_slice::<u32, u8>(&words)).expect("write shader");
    }
    dir
}
