//! Fallback textures and samplers shared by every material

use ash::vk;

use crate::render::api::{AllocatedImage, GpuDevice, SamplerDesc, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal};

use super::manager::ResourceManager;

const WHITE: [u8; 4] = [255, 255, 255, 255];
const GREY: [u8; 4] = [168, 168, 168, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];
const MAGENTA: [u8; 4] = [255, 0, 255, 255];

/// Side length of the missing-texture checkerboard
pub const CHECKERBOARD_SIZE: u32 = 16;

/// Engine-owned images and samplers used when an asset leaves a slot empty
///
/// Everything here is released through the global deletion queue, so scenes
/// must never destroy these images themselves.
#[derive(Debug, Clone, Copy)]
pub struct DefaultResources {
    /// 1x1 opaque white
    pub white: AllocatedImage,
    /// 1x1 mid grey
    pub grey: AllocatedImage,
    /// 1x1 opaque black
    pub black: AllocatedImage,
    /// Magenta and black checkerboard marking a missing texture
    pub error_checkerboard: AllocatedImage,
    /// Linear filtering sampler
    pub linear_sampler: vk::Sampler,
    /// Nearest filtering sampler
    pub nearest_sampler: vk::Sampler,
}

fn checkerboard_pixels() -> Vec<u8> {
    let mut pixels = Vec::with_capacity((CHECKERBOARD_SIZE * CHECKERBOARD_SIZE * 4) as usize);
    for y in 0..CHECKERBOARD_SIZE {
        for x in 0..CHECKERBOARD_SIZE {
            let texel = if (x % 2) ^ (y % 2) == 1 { MAGENTA } else { BLACK };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

impl DefaultResources {
    /// Upload the default textures and create the default samplers
    pub fn new<D: GpuDevice>(
        device: &mut D,
        resources: &mut ResourceManager,
        deletion_queue: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        log::debug!("Creating default textures and samplers...");

        let mut solid = |device: &mut D, deletion_queue: &mut DeletionQueue, texel: [u8; 4]| {
            let image = resources.create_image(
                device,
                vk::Extent3D { width: 1, height: 1, depth: 1 },
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED,
                Some(&texel),
                false,
            )?;
            deletion_queue.push(Disposal::Image(image));
            VulkanResult::Ok(image)
        };

        let white = solid(device, deletion_queue, WHITE)?;
        let grey = solid(device, deletion_queue, GREY)?;
        let black = solid(device, deletion_queue, BLACK)?;

        let error_checkerboard = resources.create_image(
            device,
            vk::Extent3D {
                width: CHECKERBOARD_SIZE,
                height: CHECKERBOARD_SIZE,
                depth: 1,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            Some(&checkerboard_pixels()),
            false,
        )?;
        deletion_queue.push(Disposal::Image(error_checkerboard));

        let nearest_sampler = device.create_sampler(&SamplerDesc::NEAREST)?;
        deletion_queue.push(Disposal::Sampler(nearest_sampler));
        let linear_sampler = device.create_sampler(&SamplerDesc::LINEAR)?;
        deletion_queue.push(Disposal::Sampler(linear_sampler));

        Ok(Self {
            white,
            grey,
            black,
            error_checkerboard,
            linear_sampler,
            nearest_sampler,
        })
    }

    /// Whether `image` is one of the shared defaults
    pub fn contains(&self, image: vk::Image) -> bool {
        [self.white, self.grey, self.black, self.error_checkerboard]
            .iter()
            .any(|default| default.image == image)
    }
}
