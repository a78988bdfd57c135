//! GPU resources: buffers, images, descriptors and draw targets

mod defaults;
mod descriptors;
mod gpu_types;
mod manager;
mod targets;

pub use defaults::{DefaultResources, CHECKERBOARD_SIZE};
pub use descriptors::{
    DescriptorAllocatorGrowable, DescriptorLayoutBuilder, DescriptorWriter, PoolSizeRatio,
    MAX_SETS_PER_POOL,
};
pub use gpu_types::{ComputePushConstants, GpuDrawPushConstants, GpuSceneData, MaterialConstants, Vertex};
pub use manager::{generate_mipmaps, mip_level_count, MeshGpuBuffers, ResourceManager};
pub use targets::{dispatch_groups, draw_extent, DrawTargets, DEPTH_FORMAT, DRAW_FORMAT, WORKGROUP_SIZE};
