//! Backend-neutral rendering API
//!
//! The [`GpuDevice`] trait is the single seam between the engine core and a
//! concrete graphics backend, together with the error taxonomy and the owned
//! descriptions that cross it.

mod device;
mod error;
mod types;

pub use device::GpuDevice;
pub use error::{ErrorSeverity, VulkanError, VulkanResult};
pub use types::{
    AllocatedBuffer, AllocatedImage, AllocationId, BlendMode, BlitRegion, ColorLoad, DepthState,
    DescriptorWrite, GraphicsPipelineDesc, ImageDesc, ImageTransition, MemoryResidency,
    RenderingAttachments, ResourceKind, SamplerDesc, SubmitDesc,
};
