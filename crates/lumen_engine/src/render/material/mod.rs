//! Metallic-roughness materials and the pipelines that draw them

use ash::vk;

use crate::config::ShaderConfig;
use crate::render::api::{GpuDevice, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal};
use crate::render::pipeline::{require_shader_module, PipelineBuilder, MESH_FRAG_SHADER, MESH_VERT_SHADER};
use crate::render::resources::{
    DescriptorAllocatorGrowable, DescriptorLayoutBuilder, DescriptorWriter, GpuDrawPushConstants,
    MaterialConstants,
};

/// Which list a material's draws are sorted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    /// Opaque geometry, culled and sorted
    MainColor,
    /// Blended geometry drawn after everything opaque
    Transparent,
    /// Anything else; drawn with the opaque pipeline
    Other,
}

/// Pipeline plus the layout its descriptor sets are bound against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialPipeline {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Layout: set 0 scene data, set 1 material
    pub layout: vk::PipelineLayout,
}

/// A ready-to-bind material: pipeline, descriptor set and pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialInstance {
    /// Pipeline to draw with
    pub pipeline: MaterialPipeline,
    /// Set 1 contents
    pub material_set: vk::DescriptorSet,
    /// Pass the draw belongs to
    pub pass: MaterialPass,
}

/// Images, samplers and uniform range a material instance binds
#[derive(Debug, Clone, Copy)]
pub struct MaterialResources {
    /// Base color texture view
    pub color_view: vk::ImageView,
    /// Sampler for the base color texture
    pub color_sampler: vk::Sampler,
    /// Metallic-roughness texture view
    pub metal_rough_view: vk::ImageView,
    /// Sampler for the metallic-roughness texture
    pub metal_rough_sampler: vk::Sampler,
    /// Buffer holding this material's [`MaterialConstants`]
    pub data_buffer: vk::Buffer,
    /// Byte offset of the constants inside `data_buffer`
    pub data_buffer_offset: vk::DeviceSize,
}

/// The glTF metallic-roughness material model
///
/// Owns one opaque and one transparent pipeline sharing a layout. Pipelines,
/// the layout and the material descriptor layout are released by the global
/// deletion queue.
#[derive(Debug)]
pub struct MetallicRoughnessMaterial {
    /// Depth-writing opaque pipeline
    pub opaque: MaterialPipeline,
    /// Additive, depth-read-only pipeline
    pub transparent: MaterialPipeline,
    /// Layout of set 1
    pub material_layout: vk::DescriptorSetLayout,
    writer: DescriptorWriter,
}

impl MetallicRoughnessMaterial {
    /// Load the mesh shaders and build both pipelines
    pub fn build_pipelines<D: GpuDevice>(
        device: &mut D,
        shaders: &ShaderConfig,
        scene_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
        deletion_queue: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        log::debug!("Building metallic-roughness pipelines...");

        let vertex = require_shader_module(device, shaders.path(MESH_VERT_SHADER))?;
        let fragment = match require_shader_module(device, shaders.path(MESH_FRAG_SHADER)) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vertex);
                return Err(e);
            }
        };

        let result = Self::build_with_modules(
            device,
            vertex,
            fragment,
            scene_layout,
            color_format,
            depth_format,
            deletion_queue,
        );

        device.destroy_shader_module(fragment);
        device.destroy_shader_module(vertex);
        result
    }

    fn build_with_modules<D: GpuDevice>(
        device: &mut D,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
        scene_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
        deletion_queue: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        let material_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .build(device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
        deletion_queue.push(Disposal::DescriptorSetLayout(material_layout));

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<GpuDrawPushConstants>() as u32,
        };
        let layout = device.create_pipeline_layout(&[scene_layout, material_layout], &[push_range])?;
        deletion_queue.push(Disposal::PipelineLayout(layout));

        let mut builder = PipelineBuilder::new(layout);
        builder
            .set_shaders(vertex, fragment)
            .set_input_topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .set_polygon_mode(vk::PolygonMode::FILL)
            .set_cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::CLOCKWISE)
            .disable_blending()
            .enable_depthtest(true, vk::CompareOp::GREATER_OR_EQUAL)
            .set_color_attachment_format(color_format)
            .set_depth_format(depth_format);

        let opaque = builder.build(device)?;
        deletion_queue.push(Disposal::Pipeline(opaque));

        builder
            .enable_blending_additive()
            .enable_depthtest(false, vk::CompareOp::GREATER_OR_EQUAL);
        let transparent = builder.build(device)?;
        deletion_queue.push(Disposal::Pipeline(transparent));

        log::info!("Metallic-roughness pipelines ready");

        Ok(Self {
            opaque: MaterialPipeline { pipeline: opaque, layout },
            transparent: MaterialPipeline { pipeline: transparent, layout },
            material_layout,
            writer: DescriptorWriter::new(),
        })
    }

    /// Allocate and fill a material set from `allocator`
    pub fn write_material<D: GpuDevice>(
        &mut self,
        device: &mut D,
        pass: MaterialPass,
        resources: &MaterialResources,
        allocator: &mut DescriptorAllocatorGrowable,
    ) -> VulkanResult<MaterialInstance> {
        let pipeline = match pass {
            MaterialPass::Transparent => self.transparent,
            MaterialPass::MainColor | MaterialPass::Other => self.opaque,
        };

        let material_set = allocator.allocate(device, self.material_layout)?;

        self.writer.clear();
        self.writer
            .write_buffer(
                0,
                resources.data_buffer,
                std::mem::size_of::<MaterialConstants>() as vk::DeviceSize,
                resources.data_buffer_offset,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                resources.color_view,
                resources.color_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            )
            .write_image(
                2,
                resources.metal_rough_view,
                resources.metal_rough_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        self.writer.update_set(device, material_set);

        Ok(MaterialInstance {
            pipeline,
            material_set,
            pass,
        })
    }
}
