//! Offscreen color and depth targets the scene is drawn into

use ash::vk;

use crate::render::api::{AllocatedImage, GpuDevice, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal};

use super::manager::ResourceManager;

/// HDR color format of the offscreen draw image
pub const DRAW_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Depth format of the offscreen depth image
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Compute workgroup edge used by the background effects
pub const WORKGROUP_SIZE: u32 = 16;

/// Offscreen color and depth images sized once at startup
///
/// Resizing the window only recreates the swapchain; the effective draw
/// extent shrinks to fit instead.
#[derive(Debug, Clone, Copy)]
pub struct DrawTargets {
    /// Color target, storage-writable by compute
    pub color: AllocatedImage,
    /// Depth target
    pub depth: AllocatedImage,
}

impl DrawTargets {
    /// Allocate both targets at `extent`
    pub fn new<D: GpuDevice>(
        device: &mut D,
        resources: &mut ResourceManager,
        deletion_queue: &mut DeletionQueue,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let color = resources.create_image(
            device,
            extent,
            DRAW_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            None,
            false,
        )?;
        deletion_queue.push(Disposal::Image(color));

        let depth = resources.create_image(
            device,
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            None,
            false,
        )?;
        deletion_queue.push(Disposal::Image(depth));

        log::info!("Draw targets created at {}x{}", extent.width, extent.height);
        Ok(Self { color, depth })
    }

    /// Extent actually rendered this frame
    pub fn draw_extent(&self, swapchain: vk::Extent2D, render_scale: f32) -> vk::Extent2D {
        draw_extent(self.color.extent_2d(), swapchain, render_scale)
    }
}

/// `min(swapchain, target) * scale` per axis, never below one texel
pub fn draw_extent(target: vk::Extent2D, swapchain: vk::Extent2D, render_scale: f32) -> vk::Extent2D {
    let scale = |a: u32, b: u32| ((a.min(b) as f32 * render_scale) as u32).max(1);
    vk::Extent2D {
        width: scale(swapchain.width, target.width),
        height: scale(swapchain.height, target.height),
    }
}

/// Workgroup counts covering `extent`
pub fn dispatch_groups(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}
