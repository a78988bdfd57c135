//! Graphics pipeline description builder

use ash::vk;

use crate::render::api::{BlendMode, DepthState, GpuDevice, GraphicsPipelineDesc, VulkanResult};

/// Assembles a [`GraphicsPipelineDesc`] for dynamic rendering
///
/// Starts from triangle lists, filled polygons, no culling, no blending and
/// no depth test; each setter overrides one piece.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    desc: GraphicsPipelineDesc,
}

impl PipelineBuilder {
    /// Start a pipeline using `layout`
    pub fn new(layout: vk::PipelineLayout) -> Self {
        Self {
            desc: GraphicsPipelineDesc {
                layout,
                vertex_module: vk::ShaderModule::null(),
                fragment_module: vk::ShaderModule::null(),
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                polygon_mode: vk::PolygonMode::FILL,
                cull_mode: vk::CullModeFlags::NONE,
                front_face: vk::FrontFace::CLOCKWISE,
                blend: BlendMode::Disabled,
                depth: None,
                color_format: vk::Format::UNDEFINED,
                depth_format: vk::Format::UNDEFINED,
            },
        }
    }

    /// Vertex and fragment modules, both entered at `main`
    pub fn set_shaders(&mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> &mut Self {
        self.desc.vertex_module = vertex;
        self.desc.fragment_module = fragment;
        self
    }

    /// Primitive topology
    pub fn set_input_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.desc.topology = topology;
        self
    }

    /// Fill, line or point rasterization
    pub fn set_polygon_mode(&mut self, mode: vk::PolygonMode) -> &mut Self {
        self.desc.polygon_mode = mode;
        self
    }

    /// Face culling and front-face winding
    pub fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.desc.cull_mode = cull_mode;
        self.desc.front_face = front_face;
        self
    }

    /// Write color straight through
    pub fn disable_blending(&mut self) -> &mut Self {
        self.desc.blend = BlendMode::Disabled;
        self
    }

    /// `src * src_alpha + dst`
    pub fn enable_blending_additive(&mut self) -> &mut Self {
        self.desc.blend = BlendMode::Additive;
        self
    }

    /// `src * src_alpha + dst * (1 - src_alpha)`
    pub fn enable_blending_alphablend(&mut self) -> &mut Self {
        self.desc.blend = BlendMode::AlphaBlend;
        self
    }

    /// Depth test with `compare`, optionally writing depth
    pub fn enable_depthtest(&mut self, write: bool, compare: vk::CompareOp) -> &mut Self {
        self.desc.depth = Some(DepthState { write, compare });
        self
    }

    /// No depth test or write
    pub fn disable_depthtest(&mut self) -> &mut Self {
        self.desc.depth = None;
        self
    }

    /// Format of the single color attachment
    pub fn set_color_attachment_format(&mut self, format: vk::Format) -> &mut Self {
        self.desc.color_format = format;
        self
    }

    /// Format of the depth attachment
    pub fn set_depth_format(&mut self, format: vk::Format) -> &mut Self {
        self.desc.depth_format = format;
        self
    }

    /// The description built so far
    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    /// Create the pipeline on `device`
    pub fn build<D: GpuDevice>(&self, device: &mut D) -> VulkanResult<vk::Pipeline> {
        device.create_graphics_pipeline(&self.desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_defaults_are_plain_triangles() {
        let builder = PipelineBuilder::new(vk::PipelineLayout::from_raw(1));
        let desc = builder.desc();
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.blend, BlendMode::Disabled);
        assert!(desc.depth.is_none());
    }

    #[test]
    fn test_transparent_configuration() {
        let mut builder = PipelineBuilder::new(vk::PipelineLayout::from_raw(1));
        builder
            .set_shaders(vk::ShaderModule::from_raw(2), vk::ShaderModule::from_raw(3))
            .enable_blending_additive()
            .enable_depthtest(false, vk::CompareOp::GREATER_OR_EQUAL)
            .set_color_attachment_format(vk::Format::R16G16B16A16_SFLOAT)
            .set_depth_format(vk::Format::D32_SFLOAT);

        let desc = builder.desc();
        assert_eq!(desc.blend, BlendMode::Additive);
        assert_eq!(
            desc.depth,
            Some(DepthState { write: false, compare: vk::CompareOp::GREATER_OR_EQUAL })
        );
        assert_eq!(desc.fragment_module, vk::ShaderModule::from_raw(3));
        assert_eq!(desc.depth_format, vk::Format::D32_SFLOAT);
    }
}
