//! Buffer and image creation, staged uploads, and mip generation

use ash::vk;

use crate::render::api::{
    AllocatedBuffer, AllocatedImage, BlitRegion, GpuDevice, ImageDesc, ImageTransition,
    MemoryResidency, VulkanError, VulkanResult,
};
use crate::render::frame::{DeletionQueue, ImmediateSubmitter};

use super::gpu_types::Vertex;

/// GPU-side buffers of one uploaded mesh
#[derive(Debug, Clone)]
pub struct MeshGpuBuffers {
    /// 32-bit index buffer
    pub index_buffer: AllocatedBuffer,
    /// Storage buffer holding [`Vertex`] data
    pub vertex_buffer: AllocatedBuffer,
    /// Device address of `vertex_buffer`
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// Number of mip levels in a full chain for `extent`
pub fn mip_level_count(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    32 - largest.leading_zeros()
}

fn bytes_per_texel(format: vk::Format) -> usize {
    match format {
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

/// Creates and destroys GPU buffers and images
///
/// Uploads go through a staging buffer and a blocking immediate submission;
/// the staging buffer is gone by the time the call returns.
pub struct ResourceManager {
    immediate: ImmediateSubmitter,
}

impl ResourceManager {
    /// Create the manager and its immediate submitter
    pub fn new<D: GpuDevice>(device: &mut D, deletion_queue: &mut DeletionQueue) -> VulkanResult<Self> {
        log::debug!("Creating ResourceManager...");
        Ok(Self {
            immediate: ImmediateSubmitter::new(device, deletion_queue)?,
        })
    }

    /// Allocate a buffer with the given usage and residency
    pub fn create_buffer<D: GpuDevice>(
        &self,
        device: &mut D,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<AllocatedBuffer> {
        log::trace!("Creating {:?} buffer of {} bytes", residency, size);
        device.create_buffer(size, usage, residency)
    }

    /// Release a buffer now; queue it on a deletion queue to defer instead
    pub fn destroy_buffer<D: GpuDevice>(&self, device: &mut D, buffer: AllocatedBuffer) {
        device.destroy_buffer(buffer);
    }

    /// Allocate an image, optionally filled from `data`.
    ///
    /// With data the image ends up in `SHADER_READ_ONLY_OPTIMAL`, with a full
    /// mip chain when `mipmapped` is set. Without data it stays `UNDEFINED`.
    pub fn create_image<D: GpuDevice>(
        &mut self,
        device: &mut D,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        data: Option<&[u8]>,
        mipmapped: bool,
    ) -> VulkanResult<AllocatedImage> {
        let mip_levels = if mipmapped { mip_level_count(extent) } else { 1 };

        let Some(data) = data else {
            return device.create_image(&ImageDesc { extent, format, usage, mip_levels });
        };

        let required = extent.width as usize * extent.height as usize * extent.depth as usize
            * bytes_per_texel(format);
        if data.len() < required {
            return Err(VulkanError::InvalidOperation {
                reason: format!("image upload needs {} bytes, got {}", required, data.len()),
            });
        }

        let mut usage = usage | vk::ImageUsageFlags::TRANSFER_DST;
        if mipmapped {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = device.create_image(&ImageDesc { extent, format, usage, mip_levels })?;

        let staging = match device.create_buffer(
            required as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryResidency::Staging,
        ) {
            Ok(staging) => staging,
            Err(err) => {
                device.destroy_image(image);
                return Err(err);
            }
        };

        let uploaded = staging.write_bytes(0, &data[..required]).and_then(|()| {
            let staging_buffer = staging.buffer;
            self.immediate.submit(device, |dev, cmd| {
                dev.cmd_transition_image(
                    cmd,
                    &ImageTransition::whole(image.image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                );
                dev.cmd_copy_buffer_to_image(cmd, staging_buffer, image.image, extent);

                if mipmapped {
                    generate_mipmaps(dev, cmd, &image);
                } else {
                    dev.cmd_transition_image(
                        cmd,
                        &ImageTransition::whole(
                            image.image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        ),
                    );
                }
                Ok(())
            })
        });

        device.destroy_buffer(staging);

        match uploaded {
            Ok(()) => Ok(image),
            Err(err) => {
                device.destroy_image(image);
                Err(err)
            }
        }
    }

    /// Release an image and its view now
    pub fn destroy_image<D: GpuDevice>(&self, device: &mut D, image: AllocatedImage) {
        device.destroy_image(image);
    }

    /// Upload index and vertex data into device-local buffers
    pub fn upload_mesh<D: GpuDevice>(
        &mut self,
        device: &mut D,
        indices: &[u32],
        vertices: &[Vertex],
    ) -> VulkanResult<MeshGpuBuffers> {
        if indices.is_empty() || vertices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot upload an empty mesh".to_string(),
            });
        }

        let vertex_bytes = std::mem::size_of_val(vertices);
        let index_bytes = std::mem::size_of_val(indices);

        let vertex_buffer = device.create_buffer(
            vertex_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryResidency::DeviceLocal,
        )?;
        let vertex_buffer_address = device.buffer_device_address(vertex_buffer.buffer);

        let index_buffer = match device.create_buffer(
            index_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryResidency::DeviceLocal,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };

        let mesh = MeshGpuBuffers {
            index_buffer,
            vertex_buffer,
            vertex_buffer_address,
        };

        match self.stage_mesh(device, &mesh, indices, vertices) {
            Ok(()) => {
                log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());
                Ok(mesh)
            }
            Err(err) => {
                device.destroy_buffer(mesh.index_buffer);
                device.destroy_buffer(mesh.vertex_buffer);
                Err(err)
            }
        }
    }

    fn stage_mesh<D: GpuDevice>(
        &mut self,
        device: &mut D,
        mesh: &MeshGpuBuffers,
        indices: &[u32],
        vertices: &[Vertex],
    ) -> VulkanResult<()> {
        let vertex_bytes = std::mem::size_of_val(vertices) as vk::DeviceSize;
        let index_bytes = std::mem::size_of_val(indices) as vk::DeviceSize;

        let staging = device.create_buffer(
            vertex_bytes + index_bytes,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryResidency::Staging,
        )?;

        let staging_buffer = staging.buffer;
        let vertex_dst = mesh.vertex_buffer.buffer;
        let index_dst = mesh.index_buffer.buffer;

        let result = staging
            .write_slice(0, vertices)
            .and_then(|()| staging.write_slice(vertex_bytes as usize, indices))
            .and_then(|()| {
                self.immediate.submit(device, |dev, cmd| {
                    dev.cmd_copy_buffer(
                        cmd,
                        staging_buffer,
                        vertex_dst,
                        &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: vertex_bytes }],
                    );
                    dev.cmd_copy_buffer(
                        cmd,
                        staging_buffer,
                        index_dst,
                        &[vk::BufferCopy { src_offset: vertex_bytes, dst_offset: 0, size: index_bytes }],
                    );
                    Ok(())
                })
            });

        device.destroy_buffer(staging);
        result
    }
}

/// Fill mips 1.. by successive half-size blits and leave every level in
/// `SHADER_READ_ONLY_OPTIMAL`. Level 0 must be in `TRANSFER_DST_OPTIMAL`.
pub fn generate_mipmaps<D: GpuDevice>(device: &mut D, cmd: vk::CommandBuffer, image: &AllocatedImage) {
    let mut size = image.extent_2d();

    for level in 0..image.mip_levels {
        let half = vk::Extent2D {
            width: (size.width / 2).max(1),
            height: (size.height / 2).max(1),
        };

        device.cmd_transition_image(
            cmd,
            &ImageTransition::level(
                image.image,
                level,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
        );

        if level + 1 < image.mip_levels {
            device.cmd_blit_image(
                cmd,
                &BlitRegion {
                    src_image: image.image,
                    src_mip: level,
                    src_extent: size,
                    dst_image: image.image,
                    dst_mip: level + 1,
                    dst_extent: half,
                    filter: vk::Filter::LINEAR,
                },
            );
        }

        size = half;
    }

    device.cmd_transition_image(
        cmd,
        &ImageTransition::whole(
            image.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
    );
}
