//! Backend-neutral descriptions passed across the [`GpuDevice`](super::GpuDevice) seam
//!
//! Handles are plain `ash::vk` handles so that recorded state stays cheap to
//! copy and compare. Everything that would otherwise need a lifetime-bound
//! `vk::*CreateInfo` is expressed as an owned description here and converted
//! by the backend.

use std::ptr::NonNull;

use ash::vk;

use super::{VulkanError, VulkanResult};

/// Where a buffer lives and whether the CPU can see it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryResidency {
    /// GPU only; filled through a staging copy
    DeviceLocal,
    /// CPU writable, GPU readable; persistently mapped
    HostVisible,
    /// CPU writable and coherent; used as a copy source
    Staging,
}

impl MemoryResidency {
    /// Whether buffers in this residency carry a mapped pointer
    pub fn is_mapped(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

/// Opaque key for a memory allocation owned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub u64);

/// GPU buffer plus its allocation and optional persistent mapping
#[derive(Debug, Clone)]
pub struct AllocatedBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Backing allocation
    pub allocation: AllocationId,
    /// Size in bytes
    pub size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl AllocatedBuffer {
    /// Wrap a freshly created buffer.
    ///
    /// `mapped` must point to at least `size` writable bytes that stay valid
    /// until the buffer is destroyed.
    pub fn new(
        buffer: vk::Buffer,
        allocation: AllocationId,
        size: vk::DeviceSize,
        mapped: Option<NonNull<u8>>,
    ) -> Self {
        Self { buffer, allocation, size, mapped }
    }

    /// Whether the CPU can write this buffer directly
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Copy raw bytes into the mapped range at `offset`
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> VulkanResult<()> {
        let Some(ptr) = self.mapped else {
            return Err(VulkanError::InvalidOperation {
                reason: "write to a buffer that is not host visible".to_string(),
            });
        };

        let end = offset.checked_add(bytes.len()).unwrap_or(usize::MAX);
        if end as u64 > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at offset {} overruns buffer of {} bytes",
                    bytes.len(),
                    offset,
                    self.size
                ),
            });
        }

        // SAFETY: the mapping covers `size` bytes and the range was checked above
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Write a single plain-old-data value at `offset`
    pub fn write<T: bytemuck::Pod>(&self, offset: usize, value: &T) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    /// Write a slice of plain-old-data values at `offset`
    pub fn write_slice<T: bytemuck::Pod>(&self, offset: usize, values: &[T]) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(values))
    }
}

/// Parameters for a new image and its full-range view
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Image size
    pub extent: vk::Extent3D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Number of mip levels
    pub mip_levels: u32,
}

impl ImageDesc {
    /// Aspect covered by the image view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.format == vk::Format::D32_SFLOAT {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// GPU image with its view and allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedImage {
    /// Image handle
    pub image: vk::Image,
    /// Full-range view
    pub view: vk::ImageView,
    /// Backing allocation
    pub allocation: AllocationId,
    /// Image size
    pub extent: vk::Extent3D,
    /// Texel format
    pub format: vk::Format,
    /// Number of mip levels
    pub mip_levels: u32,
}

impl AllocatedImage {
    /// 2D extent of mip level 0
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

/// Sampler filtering parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    /// Magnification filter
    pub mag_filter: vk::Filter,
    /// Minification filter
    pub min_filter: vk::Filter,
    /// Mip selection mode
    pub mipmap_mode: vk::SamplerMipmapMode,
}

impl SamplerDesc {
    /// Linear filtering in every direction
    pub const LINEAR: Self = Self {
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
    };

    /// Point sampling
    pub const NEAREST: Self = Self {
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
    };
}

/// One queue submission of a single command buffer
#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc {
    /// Command buffer to execute
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Semaphore to signal, and the stage that signals
    pub signal: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Fence signaled on completion
    pub fence: vk::Fence,
}

/// A layout transition over a mip range of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image to transition
    pub image: vk::Image,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// Target layout
    pub new_layout: vk::ImageLayout,
    /// First mip level affected
    pub base_mip_level: u32,
    /// Number of mip levels affected
    pub level_count: u32,
}

impl ImageTransition {
    /// Transition every mip level of `image`
    pub fn whole(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self {
            image,
            old_layout,
            new_layout,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
        }
    }

    /// Transition a single mip level
    pub fn level(image: vk::Image, level: u32, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self {
            image,
            old_layout,
            new_layout,
            base_mip_level: level,
            level_count: 1,
        }
    }

    /// Aspect implied by the target layout
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// Scaled copy between two image regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRegion {
    /// Source image, in `TRANSFER_SRC_OPTIMAL`
    pub src_image: vk::Image,
    /// Source mip level
    pub src_mip: u32,
    /// Source region size
    pub src_extent: vk::Extent2D,
    /// Destination image, in `TRANSFER_DST_OPTIMAL`
    pub dst_image: vk::Image,
    /// Destination mip level
    pub dst_mip: u32,
    /// Destination region size
    pub dst_extent: vk::Extent2D,
    /// Filter used for scaling
    pub filter: vk::Filter,
}

/// What happens to the color attachment when a rendering pass begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorLoad {
    /// Keep the current contents
    Load,
    /// Clear to the given color
    Clear([f32; 4]),
}

/// Attachments of a dynamic rendering pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderingAttachments {
    /// Color attachment view, in `COLOR_ATTACHMENT_OPTIMAL`
    pub color_view: vk::ImageView,
    /// Color load behaviour
    pub color_load: ColorLoad,
    /// Depth attachment view, cleared to 0 for reversed Z
    pub depth_view: Option<vk::ImageView>,
    /// Render area
    pub extent: vk::Extent2D,
}

/// A single descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform or storage buffer binding
    Buffer {
        /// Binding slot
        binding: u32,
        /// Descriptor type
        ty: vk::DescriptorType,
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset into the buffer
        offset: vk::DeviceSize,
        /// Byte range bound
        range: vk::DeviceSize,
    },
    /// Sampled, storage, or combined image binding
    Image {
        /// Binding slot
        binding: u32,
        /// Descriptor type
        ty: vk::DescriptorType,
        /// Image view, or null for a bare sampler
        view: vk::ImageView,
        /// Sampler, or null for storage images
        sampler: vk::Sampler,
        /// Layout the image is in when read
        layout: vk::ImageLayout,
    },
}

/// Color blending applied by a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Blending off
    Disabled,
    /// `src * src_alpha + dst`
    Additive,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    AlphaBlend,
}

/// Depth test state of a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    /// Write depth on pass
    pub write: bool,
    /// Comparison used for the test
    pub compare: vk::CompareOp,
}

/// Full description of a dynamic-rendering graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Vertex stage module, entry point `main`
    pub vertex_module: vk::ShaderModule,
    /// Fragment stage module, entry point `main`
    pub fragment_module: vk::ShaderModule,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Fill mode
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding considered front facing
    pub front_face: vk::FrontFace,
    /// Color blending
    pub blend: BlendMode,
    /// Depth test, or `None` to disable it
    pub depth: Option<DepthState>,
    /// Color attachment format
    pub color_format: vk::Format,
    /// Depth attachment format, `UNDEFINED` when there is none
    pub depth_format: vk::Format,
}

/// Kinds of GPU object the engine creates and later disposes of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `vk::Buffer` with its allocation
    Buffer,
    /// `vk::Image` with its view and allocation
    Image,
    /// `vk::Sampler`
    Sampler,
    /// `vk::DescriptorPool`
    DescriptorPool,
    /// `vk::DescriptorSetLayout`
    DescriptorSetLayout,
    /// `vk::Pipeline`
    Pipeline,
    /// `vk::PipelineLayout`
    PipelineLayout,
    /// `vk::ShaderModule`
    ShaderModule,
    /// `vk::Fence`
    Fence,
    /// `vk::Semaphore`
    Semaphore,
    /// `vk::CommandPool`
    CommandPool,
}
