//! Per-frame command sequence
//!
//! Stage order, each separated by explicit layout transitions:
//! 1. draw image `UNDEFINED -> GENERAL`
//! 2. background compute effect
//! 3. draw image `GENERAL -> COLOR_ATTACHMENT`, depth `UNDEFINED -> DEPTH_ATTACHMENT`
//! 4. geometry pass: sorted opaque draws, then transparent draws
//! 5. blit draw image to the swapchain image
//! 6. overlay pass on the swapchain image
//! 7. swapchain image `COLOR_ATTACHMENT -> PRESENT_SRC`

use ash::vk;

use crate::foundation::math::Mat4;
use crate::foundation::time::Stopwatch;
use crate::render::api::{
    BlitRegion, ColorLoad, GpuDevice, ImageTransition, MemoryResidency, RenderingAttachments, VulkanResult,
};
use crate::render::frame::{Disposal, FrameSlot};
use crate::render::material::MaterialPipeline;
use crate::render::overlay::Overlay;
use crate::render::resources::{
    ComputePushConstants, DescriptorWriter, DrawTargets, GpuDrawPushConstants, GpuSceneData, ResourceManager,
};
use crate::scene::{DrawContext, RenderObject};

use super::background::BackgroundEffects;

/// Counters produced while recording the geometry pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawStats {
    /// Indexed draws recorded
    pub draw_count: u32,
    /// Triangles in those draws
    pub triangle_count: u32,
    /// Time spent recording the geometry pass, milliseconds
    pub mesh_draw_time: f32,
}

/// Everything one frame's recording reads
pub struct FrameRecording<'a> {
    /// Command buffer of the current frame slot
    pub cmd: vk::CommandBuffer,
    /// Offscreen color and depth targets
    pub targets: &'a DrawTargets,
    /// Region of the targets rendered this frame
    pub draw_extent: vk::Extent2D,
    /// Acquired swapchain image
    pub swapchain_image: vk::Image,
    /// View of the acquired swapchain image
    pub swapchain_view: vk::ImageView,
    /// Swapchain extent
    pub swapchain_extent: vk::Extent2D,
    /// Background palette
    pub effects: &'a BackgroundEffects,
    /// Selected background effect
    pub effect_index: usize,
    /// Payload pushed to the background effect
    pub effect_data: &'a ComputePushConstants,
    /// Frame-global uniform set, bound at set 0
    pub scene_set: vk::DescriptorSet,
    /// Draws collected for this frame
    pub draws: &'a DrawContext,
    /// `proj * view`, used for culling
    pub view_proj: Mat4,
    /// Filter of the final blit
    pub blit_filter: vk::Filter,
}

/// Write `scene_data` into a uniform buffer owned by `frame` and return a set
/// pointing at it. The buffer is released when the slot is next retired.
pub fn write_scene_uniforms<D: GpuDevice>(
    device: &mut D,
    resources: &ResourceManager,
    frame: &mut FrameSlot,
    scene_layout: vk::DescriptorSetLayout,
    scene_data: &GpuSceneData,
) -> VulkanResult<vk::DescriptorSet> {
    let size = std::mem::size_of::<GpuSceneData>() as vk::DeviceSize;
    let buffer = resources.create_buffer(device, size, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryResidency::HostVisible)?;
    let handle = buffer.buffer;
    let written = buffer.write(0, scene_data);
    frame.deletion_queue.push(Disposal::Buffer(buffer));
    written?;

    let set = frame.descriptors.allocate(device, scene_layout)?;
    let mut writer = DescriptorWriter::new();
    writer.write_buffer(0, handle, size, 0, vk::DescriptorType::UNIFORM_BUFFER);
    writer.update_set(device, set);
    Ok(set)
}

/// Record stages 1 through 7 into `frame.cmd`, including begin and end
pub fn record_frame<D: GpuDevice>(
    device: &mut D,
    frame: &FrameRecording<'_>,
    overlay: &mut dyn Overlay<D>,
) -> VulkanResult<DrawStats> {
    let cmd = frame.cmd;
    let color = frame.targets.color.image;
    let depth = frame.targets.depth.image;

    device.begin_command_buffer(cmd)?;

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(color, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
    );
    frame
        .effects
        .record(device, cmd, frame.effect_index, frame.effect_data, frame.draw_extent);

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(color, vk::ImageLayout::GENERAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
    );
    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(depth, vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
    );

    let stats = record_geometry(device, frame);

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(
            color,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
    );
    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(
            frame.swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
    );
    device.cmd_blit_image(
        cmd,
        &BlitRegion {
            src_image: color,
            src_mip: 0,
            src_extent: frame.draw_extent,
            dst_image: frame.swapchain_image,
            dst_mip: 0,
            dst_extent: frame.swapchain_extent,
            filter: frame.blit_filter,
        },
    );

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(
            frame.swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
    );
    device.cmd_begin_rendering(
        cmd,
        &RenderingAttachments {
            color_view: frame.swapchain_view,
            color_load: ColorLoad::Load,
            depth_view: None,
            extent: frame.swapchain_extent,
        },
    );
    overlay.record(device, cmd, frame.swapchain_view, frame.swapchain_extent);
    device.cmd_end_rendering(cmd);

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(
            frame.swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
    );

    device.end_command_buffer(cmd)?;
    Ok(stats)
}

/// Last bound state; a bind is skipped when it would not change anything
#[derive(Debug, Default)]
struct BindState {
    pipeline: Option<MaterialPipeline>,
    material_set: Option<vk::DescriptorSet>,
    index_buffer: Option<vk::Buffer>,
}

fn record_geometry<D: GpuDevice>(device: &mut D, frame: &FrameRecording<'_>) -> DrawStats {
    let stopwatch = Stopwatch::start_new();
    let cmd = frame.cmd;

    device.cmd_begin_rendering(
        cmd,
        &RenderingAttachments {
            color_view: frame.targets.color.view,
            color_load: ColorLoad::Load,
            depth_view: Some(frame.targets.depth.view),
            extent: frame.draw_extent,
        },
    );
    device.cmd_set_viewport_scissor(cmd, frame.draw_extent);

    let mut state = BindState::default();
    let mut stats = DrawStats::default();

    let opaque = frame.draws.sorted_opaque_indices(&frame.view_proj);
    for index in opaque {
        draw_object(device, cmd, frame.scene_set, &frame.draws.opaque[index], &mut state, &mut stats);
    }
    let transparent = frame.draws.visible_transparent_indices(&frame.view_proj);
    for index in transparent {
        draw_object(device, cmd, frame.scene_set, &frame.draws.transparent[index], &mut state, &mut stats);
    }

    device.cmd_end_rendering(cmd);

    stats.mesh_draw_time = stopwatch.elapsed_millis();
    log::trace!("Recorded {} draws, {} triangles", stats.draw_count, stats.triangle_count);
    stats
}

fn draw_object<D: GpuDevice>(
    device: &mut D,
    cmd: vk::CommandBuffer,
    scene_set: vk::DescriptorSet,
    object: &RenderObject,
    state: &mut BindState,
    stats: &mut DrawStats,
) {
    let material = &object.material;
    let layout = material.pipeline.layout;

    if state.pipeline != Some(material.pipeline) {
        state.pipeline = Some(material.pipeline);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, material.pipeline.pipeline);
        // a new layout invalidates set 0
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 0, &[scene_set]);
        state.material_set = None;
    }

    if state.material_set != Some(material.material_set) {
        state.material_set = Some(material.material_set);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 1, &[material.material_set]);
    }

    if state.index_buffer != Some(object.index_buffer) {
        state.index_buffer = Some(object.index_buffer);
        device.cmd_bind_index_buffer(cmd, object.index_buffer, 0);
    }

    let constants = GpuDrawPushConstants::new(&object.transform, object.vertex_buffer_address);
    device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&constants));
    device.cmd_draw_indexed(cmd, object.index_count, object.first_index);

    stats.draw_count += 1;
    stats.triangle_count += object.index_count / 3;
}
