//! Ash and VMA implementation of [`GpuDevice`]

use std::collections::HashMap;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use vk_mem::Alloc;

use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::swapchain::Swapchain;
use crate::config::RendererConfig;
use crate::render::api::{
    AllocatedBuffer, AllocatedImage, AllocationId, BlendMode, BlitRegion, ColorLoad, DescriptorWrite,
    GpuDevice, GraphicsPipelineDesc, ImageDesc, ImageTransition, MemoryResidency, RenderingAttachments,
    SamplerDesc, SubmitDesc, VulkanError, VulkanResult,
};
use crate::render::window::Window;

// SAFETY: the literal is NUL terminated with no interior NUL
const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Logical device, queues, swapchain and allocator behind [`GpuDevice`]
///
/// Teardown runs in reverse creation order: allocations, allocator,
/// swapchain, surface, device, instance.
pub struct VulkanDevice {
    swapchain: Option<Swapchain>,
    swapchain_loader: SwapchainLoader,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    allocations: HashMap<AllocationId, vk_mem::Allocation>,
    next_allocation: u64,
    physical_device: PhysicalDeviceInfo,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl VulkanDevice {
    /// Bring up the instance, device, allocator and swapchain for `window`
    pub fn new(window: &mut Window, config: &RendererConfig, app_name: &str) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, config.enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {}", e)))?;

        let destroy_surface = |e: VulkanError| {
            unsafe { surface_loader.destroy_surface(surface, None) };
            e
        };

        let physical_device =
            PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)
                .map_err(destroy_surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device).map_err(destroy_surface)?;

        let allocator_info =
            vk_mem::AllocatorCreateInfo::new(&instance.instance, &device.device, physical_device.device)
                .vulkan_api_version(vk::API_VERSION_1_3)
                .flags(vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS);
        let allocator = unsafe { vk_mem::Allocator::new(allocator_info) }
            .map_err(VulkanError::Api)
            .map_err(destroy_surface)?;

        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device.device);
        let (width, height) = window.get_framebuffer_size();
        let swapchain = Swapchain::new(
            swapchain_loader.clone(),
            device.device.clone(),
            surface,
            &surface_loader,
            &physical_device,
            vk::Extent2D { width, height },
            vk::SwapchainKHR::null(),
        );
        let swapchain = match swapchain {
            Ok(swapchain) => swapchain,
            Err(e) => {
                drop(allocator);
                return Err(destroy_surface(e));
            }
        };

        Ok(Self {
            swapchain: Some(swapchain),
            swapchain_loader,
            allocator: ManuallyDrop::new(allocator),
            allocations: HashMap::new(),
            next_allocation: 1,
            physical_device,
            surface,
            surface_loader,
            device,
            instance,
        })
    }

    /// Selected GPU
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    fn raw(&self) -> &ash::Device {
        &self.device.device
    }

    fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "swapchain is not available".to_string(),
        })
    }

    fn track(&mut self, allocation: vk_mem::Allocation) -> AllocationId {
        let id = AllocationId(self.next_allocation);
        self.next_allocation += 1;
        self.allocations.insert(id, allocation);
        id
    }

    fn map_allocation_error(result: vk::Result, requested: u64) -> VulkanError {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                VulkanError::OutOfMemory { requested }
            }
            other => VulkanError::Api(other),
        }
    }

    fn color_subresource_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.raw().create_fence(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.raw().destroy_fence(fence, None) };
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        match unsafe { self.raw().wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout { timeout_ns }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.raw().reset_fences(&[fence]) }.map_err(VulkanError::Api)
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.raw().create_semaphore(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.raw().destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(&mut self) -> VulkanResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.device.graphics_family);
        unsafe { self.raw().create_command_pool(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        unsafe { self.raw().destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&mut self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.raw().allocate_command_buffers(&info) }.map_err(VulkanError::Api)?;
        buffers
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.raw()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            self.raw().begin_command_buffer(cmd, &info).map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.raw().end_command_buffer(cmd) }.map_err(VulkanError::Api)
    }

    fn submit(&mut self, submit: &SubmitDesc) -> VulkanResult<()> {
        let semaphore_info = |&(semaphore, stage): &(vk::Semaphore, vk::PipelineStageFlags2)| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(1)
                .build()
        };
        let wait_infos: Vec<vk::SemaphoreSubmitInfo> = submit.wait.iter().map(semaphore_info).collect();
        let signal_infos: Vec<vk::SemaphoreSubmitInfo> = submit.signal.iter().map(semaphore_info).collect();
        let command_infos = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(submit.command_buffer)
            .build()];

        let info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_infos)
            .build();

        unsafe {
            self.raw()
                .queue_submit2(self.device.graphics_queue, &[info], submit.fence)
        }
        .map_err(VulkanError::Api)
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        unsafe { self.raw().device_wait_idle() }.map_err(VulkanError::Api)
    }

    fn acquire_next_image(&mut self, semaphore: vk::Semaphore, timeout_ns: u64) -> VulkanResult<u32> {
        self.swapchain()?.acquire(semaphore, timeout_ns)
    }

    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> VulkanResult<()> {
        self.swapchain()?
            .present(self.device.present_queue, image_index, wait_semaphore)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.as_ref().map(Swapchain::extent).unwrap_or_default()
    }

    fn swapchain_image(&self, index: u32) -> VulkanResult<(vk::Image, vk::ImageView)> {
        self.swapchain()?.image(index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("swapchain image {} does not exist", index),
        })
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), Swapchain::handle);

        let replacement = Swapchain::new(
            self.swapchain_loader.clone(),
            self.device.device.clone(),
            self.surface,
            &self.surface_loader,
            &self.physical_device,
            vk::Extent2D { width, height },
            old_handle,
        );
        // The retired swapchain is destroyed only after its successor exists
        drop(old);

        self.swapchain = Some(replacement?);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe { self.raw().create_descriptor_set_layout(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        unsafe { self.raw().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.raw().create_descriptor_pool(&info, None) }.map_err(VulkanError::Api)
    }

    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::Api)
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        unsafe { self.raw().destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.raw().allocate_descriptor_sets(&info) }.map_err(VulkanError::Api)?;
        sets.into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::Buffer { buffer, offset, range, .. } => {
                    Some(vk::DescriptorBufferInfo { buffer, offset, range })
                }
                DescriptorWrite::Image { .. } => None,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::Image { view, sampler, layout, .. } => Some(vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }),
                DescriptorWrite::Buffer { .. } => None,
            })
            .collect();

        let mut next_buffer = 0;
        let mut next_image = 0;
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Buffer { binding, ty, .. } => {
                    let info = std::slice::from_ref(&buffer_infos[next_buffer]);
                    next_buffer += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .buffer_info(info)
                        .build()
                }
                DescriptorWrite::Image { binding, ty, .. } => {
                    let info = std::slice::from_ref(&image_infos[next_image]);
                    next_image += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .image_info(info)
                        .build()
                }
            })
            .collect();

        unsafe { self.raw().update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let allocation_info = match residency {
            MemoryResidency::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryResidency::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::MAPPED
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            MemoryResidency::Staging => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::MAPPED
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_info, &allocation_info) }
            .map_err(|e| Self::map_allocation_error(e, size))?;

        let mapped = if residency.is_mapped() {
            let info = unsafe { self.allocator.get_allocation_info(&allocation) };
            NonNull::new(info.mapped_data.cast::<u8>())
        } else {
            None
        };

        let id = self.track(allocation);
        Ok(AllocatedBuffer::new(buffer, id, size, mapped))
    }

    fn destroy_buffer(&mut self, buffer: AllocatedBuffer) {
        match self.allocations.remove(&buffer.allocation) {
            Some(mut allocation) => unsafe { self.allocator.destroy_buffer(buffer.buffer, &mut allocation) },
            None => log::warn!("Buffer {:?} has no tracked allocation", buffer.allocation),
        }
    }

    fn buffer_device_address(&mut self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.raw().get_buffer_device_address(&info) }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        let requested = u64::from(desc.extent.width) * u64::from(desc.extent.height) * 8;
        let (image, mut allocation) = unsafe { self.allocator.create_image(&image_info, &allocation_info) }
            .map_err(|e| Self::map_allocation_error(e, requested))?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect(),
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { self.raw().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(VulkanError::Api(e));
            }
        };

        let id = self.track(allocation);
        Ok(AllocatedImage {
            image,
            view,
            allocation: id,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels,
        })
    }

    fn destroy_image(&mut self, image: AllocatedImage) {
        unsafe { self.raw().destroy_image_view(image.view, None) };
        match self.allocations.remove(&image.allocation) {
            Some(mut allocation) => unsafe { self.allocator.destroy_image(image.image, &mut allocation) },
            None => log::warn!("Image {:?} has no tracked allocation", image.allocation),
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        unsafe { self.raw().create_sampler(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.raw().destroy_sampler(sampler, None) };
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.raw().create_shader_module(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        unsafe { self.raw().destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe { self.raw().create_pipeline_layout(&info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        unsafe { self.raw().destroy_pipeline_layout(layout, None) };
    }

    fn create_compute_pipeline(
        &mut self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(ENTRY_POINT)
            .build();
        let info = vk::ComputePipelineCreateInfo::builder()
            .layout(layout)
            .stage(stage)
            .build();

        let pipelines = unsafe {
            self.raw()
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // Vertices are pulled through a buffer device address, so no input bindings
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let attachment = blend_attachment(desc.blend);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&attachment));

        let depth_stencil = match desc.depth {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(true)
                .depth_write_enable(depth.write)
                .depth_compare_op(depth.compare),
            None => vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(false)
                .depth_write_enable(false)
                .depth_compare_op(vk::CompareOp::NEVER),
        }
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [desc.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.depth_format);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering_info)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .build();

        let pipelines = unsafe {
            self.raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.raw().destroy_pipeline(pipeline, None) };
    }

    fn cmd_transition_image(&mut self, cmd: vk::CommandBuffer, transition: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .image(transition.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: transition.aspect(),
                base_mip_level: transition.base_mip_level,
                level_count: transition.level_count,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
            .build();

        let dependency = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.raw().cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn cmd_blit_image(&mut self, cmd: vk::CommandBuffer, blit: &BlitRegion) {
        let region = vk::ImageBlit2::builder()
            .src_subresource(Self::color_subresource_layers(blit.src_mip))
            .src_offsets([vk::Offset3D::default(), Self::far_corner(blit.src_extent)])
            .dst_subresource(Self::color_subresource_layers(blit.dst_mip))
            .dst_offsets([vk::Offset3D::default(), Self::far_corner(blit.dst_extent)])
            .build();

        let info = vk::BlitImageInfo2::builder()
            .src_image(blit.src_image)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(blit.dst_image)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(blit.filter)
            .regions(std::slice::from_ref(&region));

        unsafe { self.raw().cmd_blit_image2(cmd, &info) };
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.raw().cmd_copy_buffer(cmd, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: Self::color_subresource_layers(0),
            image_offset: vk::Offset3D::default(),
            image_extent: extent,
        };
        unsafe {
            self.raw()
                .cmd_copy_buffer_to_image(cmd, src, dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region])
        };
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.raw().cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw()
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[])
        };
    }

    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.raw().cmd_push_constants(cmd, layout, stages, offset, data) };
    }

    fn cmd_dispatch(&mut self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.raw().cmd_dispatch(cmd, x, y, z) };
    }

    fn cmd_begin_rendering(&mut self, cmd: vk::CommandBuffer, attachments: &RenderingAttachments) {
        let (load_op, clear_color) = match attachments.color_load {
            ColorLoad::Load => (vk::AttachmentLoadOp::LOAD, [0.0; 4]),
            ColorLoad::Clear(color) => (vk::AttachmentLoadOp::CLEAR, color),
        };
        let color = vk::RenderingAttachmentInfo::builder()
            .image_view(attachments.color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            })
            .build();

        // Reversed Z: the far plane sits at depth 0
        let depth = attachments.depth_view.map(|view| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
                })
                .build()
        });

        let mut info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: attachments.extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color));
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
        }

        unsafe { self.raw().cmd_begin_rendering(cmd, &info) };
    }

    fn cmd_end_rendering(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.raw().cmd_end_rendering(cmd) };
    }

    fn cmd_set_viewport_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        unsafe {
            self.raw().cmd_set_viewport(cmd, 0, &[viewport]);
            self.raw().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_index_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.raw().cmd_bind_index_buffer(cmd, buffer, offset, vk::IndexType::UINT32) };
    }

    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32) {
        unsafe { self.raw().cmd_draw_indexed(cmd, index_count, 1, first_index, 0, 0) };
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw().device_wait_idle();

            if !self.allocations.is_empty() {
                log::warn!("{} GPU allocations still live at device teardown", self.allocations.len());
            }
            for (_, mut allocation) in self.allocations.drain() {
                self.allocator.free_memory(&mut allocation);
            }
            ManuallyDrop::drop(&mut self.allocator);

            self.swapchain = None;
            self.surface_loader.destroy_surface(self.surface, None);
        }
        // `device` then `instance` drop after this body, in declaration order
    }
}

fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Disabled => builder.blend_enable(false),
        BlendMode::Additive => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::AlphaBlend => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
    .build()
}
