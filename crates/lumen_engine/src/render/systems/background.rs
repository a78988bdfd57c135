//! Compute-shader background effects written straight into the draw image

use ash::vk;

use crate::config::ShaderConfig;
use crate::render::api::{AllocatedImage, GpuDevice, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal};
use crate::render::pipeline::{require_shader_module, GRADIENT_SHADER, SKY_SHADER};
use crate::render::resources::{
    dispatch_groups, ComputePushConstants, DescriptorAllocatorGrowable, DescriptorLayoutBuilder,
    DescriptorWriter,
};

/// One entry of the background palette
#[derive(Debug, Clone, Copy)]
pub struct ComputeEffect {
    /// Display name
    pub name: &'static str,
    /// Compute pipeline
    pub pipeline: vk::Pipeline,
    /// Payload the effect starts with
    pub default_data: ComputePushConstants,
}

/// Fixed palette of background compute effects
///
/// Every effect shares one pipeline layout: a storage image at set 0
/// binding 0 and a 64-byte push constant block.
#[derive(Debug)]
pub struct BackgroundEffects {
    effects: Vec<ComputeEffect>,
    layout: vk::PipelineLayout,
    image_set: vk::DescriptorSet,
}

impl BackgroundEffects {
    /// Build the gradient and sky effects and point them at `draw_image`
    pub fn new<D: GpuDevice>(
        device: &mut D,
        shaders: &ShaderConfig,
        allocator: &mut DescriptorAllocatorGrowable,
        draw_image: &AllocatedImage,
        deletion_queue: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        log::debug!("Creating background effects...");

        let image_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(device, vk::ShaderStageFlags::COMPUTE)?;
        deletion_queue.push(Disposal::DescriptorSetLayout(image_layout));

        let image_set = allocator.allocate(device, image_layout)?;
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            draw_image.view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(device, image_set);

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<ComputePushConstants>() as u32,
        };
        let layout = device.create_pipeline_layout(&[image_layout], &[push_range])?;
        deletion_queue.push(Disposal::PipelineLayout(layout));

        let palette = [
            (
                "gradient",
                GRADIENT_SHADER,
                ComputePushConstants {
                    data1: [1.0, 0.0, 0.0, 1.0],
                    data2: [0.0, 0.0, 1.0, 1.0],
                    ..Default::default()
                },
            ),
            (
                "sky",
                SKY_SHADER,
                ComputePushConstants {
                    data1: [0.1, 0.2, 0.4, 0.97],
                    ..Default::default()
                },
            ),
        ];

        let mut effects = Vec::with_capacity(palette.len());
        for (name, file, default_data) in palette {
            let module = require_shader_module(device, shaders.path(file))?;
            let pipeline = device.create_compute_pipeline(layout, module);
            device.destroy_shader_module(module);
            let pipeline = pipeline?;
            deletion_queue.push(Disposal::Pipeline(pipeline));

            effects.push(ComputeEffect {
                name,
                pipeline,
                default_data,
            });
        }

        Ok(Self {
            effects,
            layout,
            image_set,
        })
    }

    /// Number of effects in the palette
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether the palette is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effect at `index`, clamped to the last entry
    pub fn get(&self, index: usize) -> Option<&ComputeEffect> {
        self.effects.get(index.min(self.effects.len().saturating_sub(1)))
    }

    /// Starting payloads of every effect, in palette order
    pub fn default_payloads(&self) -> Vec<ComputePushConstants> {
        self.effects.iter().map(|effect| effect.default_data).collect()
    }

    /// Names of every effect, in palette order
    pub fn names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|effect| effect.name).collect()
    }

    /// Record the selected effect over `extent`. The draw image must be in
    /// `GENERAL` layout.
    pub fn record<D: GpuDevice>(
        &self,
        device: &mut D,
        cmd: vk::CommandBuffer,
        index: usize,
        data: &ComputePushConstants,
        extent: vk::Extent2D,
    ) {
        let Some(effect) = self.get(index) else {
            return;
        };

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, effect.pipeline);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, self.layout, 0, &[self.image_set]);
        device.cmd_push_constants(cmd, self.layout, vk::ShaderStageFlags::COMPUTE, 0, bytemuck::bytes_of(data));

        let (groups_x, groups_y) = dispatch_groups(extent);
        device.cmd_dispatch(cmd, groups_x, groups_y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{ImageDesc, ResourceKind};
    use crate::render::resources::PoolSizeRatio;
    use crate::render::testing::{dummy_shader_dir, MockDevice, Recorded};
    use ash::vk::Handle;

    fn setup(device: &mut MockDevice, queue: &mut DeletionQueue, tag: &str) -> (BackgroundEffects, DescriptorAllocatorGrowable, AllocatedImage) {
        let mut allocator = DescriptorAllocatorGrowable::new(
            device,
            4,
            &[PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)],
        )
        .unwrap();
        let image = device
            .create_image(&ImageDesc {
                extent: vk::Extent3D { width: 64, height: 64, depth: 1 },
                format: vk::Format::R16G16B16A16_SFLOAT,
                usage: vk::ImageUsageFlags::STORAGE,
                mip_levels: 1,
            })
            .unwrap();
        let shaders = ShaderConfig { directory: dummy_shader_dir(tag) };
        let effects = BackgroundEffects::new(device, &shaders, &mut allocator, &image, queue).unwrap();
        (effects, allocator, image)
    }

    #[test]
    fn test_palette_has_gradient_and_sky() {
        let mut device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        let (effects, mut allocator, image) = setup(&mut device, &mut queue, "effects_palette");

        assert_eq!(effects.names(), vec!["gradient", "sky"]);
        assert_eq!(effects.get(7).map(|e| e.name), Some("sky"));
        assert_eq!(effects.default_payloads()[0].data1, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(device.live_count(ResourceKind::ShaderModule), 0);

        allocator.destroy(&mut device);
        device.destroy_image(image);
        queue.flush(&mut device);
        device.assert_no_leaks();
    }

    #[test]
    fn test_record_dispatches_over_extent() {
        let mut device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        let (effects, mut allocator, image) = setup(&mut device, &mut queue, "effects_record");
        let cmd = vk::CommandBuffer::from_raw(500);

        let data = effects.default_payloads()[1];
        effects.record(&mut device, cmd, 1, &data, vk::Extent2D { width: 100, height: 50 });

        let recorded = device.last_recording(cmd);
        assert_eq!(
            recorded[0],
            Recorded::BindPipeline(vk::PipelineBindPoint::COMPUTE, effects.get(1).unwrap().pipeline)
        );
        assert!(matches!(&recorded[2], Recorded::PushConstants { data, .. } if data.len() == 64));
        assert_eq!(recorded[3], Recorded::Dispatch(7, 4, 1));

        allocator.destroy(&mut device);
        device.destroy_image(image);
        queue.flush(&mut device);
    }
}
