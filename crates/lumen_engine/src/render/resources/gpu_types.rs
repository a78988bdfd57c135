//! Plain-old-data layouts shared with the shaders
//!
//! Field order and sizes must match the GLSL declarations in
//! `resources/shaders`.

use ash::vk;

use crate::foundation::math::{mat4_to_cols, Mat4};

/// Interleaved vertex pulled through the buffer device address
///
/// UVs are split across the padding slots of the two `vec3`s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U
    pub uv_x: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub uv_y: f32,
    /// Vertex color
    pub color: [f32; 4],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            uv_x: 0.0,
            normal: [1.0, 0.0, 0.0],
            uv_y: 0.0,
            color: [1.0; 4],
        }
    }
}

/// Per-draw push constants for the mesh pipelines
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuDrawPushConstants {
    /// Object-to-world matrix, column major
    pub world_matrix: [[f32; 4]; 4],
    /// Device address of the vertex buffer
    pub vertex_buffer: vk::DeviceAddress,
}

unsafe impl bytemuck::Pod for GpuDrawPushConstants {}
unsafe impl bytemuck::Zeroable for GpuDrawPushConstants {}

impl GpuDrawPushConstants {
    /// Build from a world transform and vertex buffer address
    pub fn new(world: &Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix: mat4_to_cols(world),
            vertex_buffer,
        }
    }
}

/// Frame-global uniform bound at set 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuSceneData {
    /// World-to-view matrix
    pub view: [[f32; 4]; 4],
    /// Projection matrix
    pub proj: [[f32; 4]; 4],
    /// `proj * view`
    pub view_proj: [[f32; 4]; 4],
    /// Ambient light color
    pub ambient_color: [f32; 4],
    /// Sun direction in xyz, intensity in w
    pub sunlight_direction: [f32; 4],
    /// Sun color
    pub sunlight_color: [f32; 4],
}

unsafe impl bytemuck::Pod for GpuSceneData {}
unsafe impl bytemuck::Zeroable for GpuSceneData {}

impl Default for GpuSceneData {
    fn default() -> Self {
        let identity = mat4_to_cols(&Mat4::identity());
        Self {
            view: identity,
            proj: identity,
            view_proj: identity,
            ambient_color: [0.1, 0.1, 0.1, 1.0],
            sunlight_direction: [0.0, 1.0, 0.5, 1.0],
            sunlight_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Free-form parameters pushed to a background compute effect
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComputePushConstants {
    /// Effect parameter block 1
    pub data1: [f32; 4],
    /// Effect parameter block 2
    pub data2: [f32; 4],
    /// Effect parameter block 3
    pub data3: [f32; 4],
    /// Effect parameter block 4
    pub data4: [f32; 4],
}

unsafe impl bytemuck::Pod for ComputePushConstants {}
unsafe impl bytemuck::Zeroable for ComputePushConstants {}

/// Per-material uniform block, padded to 256 bytes for offset alignment
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialConstants {
    /// Base color factor
    pub color_factors: [f32; 4],
    /// Metallic in x, roughness in y
    pub metal_rough_factors: [f32; 4],
    /// Padding up to 256 bytes
    pub extra: [[f32; 4]; 14],
}

unsafe impl bytemuck::Pod for MaterialConstants {}
unsafe impl bytemuck::Zeroable for MaterialConstants {}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            color_factors: [1.0; 4],
            metal_rough_factors: [1.0, 0.5, 0.0, 0.0],
            extra: [[0.0; 4]; 14],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layout_sizes_match_shaders() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(size_of::<GpuDrawPushConstants>(), 72);
        assert_eq!(size_of::<GpuSceneData>(), 3 * 64 + 3 * 16);
        assert_eq!(size_of::<ComputePushConstants>(), 64);
        assert_eq!(size_of::<MaterialConstants>(), 256);
    }

    #[test]
    fn test_push_constants_carry_translation() {
        let world = Mat4::new_translation(&crate::foundation::math::Vec3::new(1.0, 2.0, 3.0));
        let push = GpuDrawPushConstants::new(&world, 0xABCD);
        assert_eq!(push.world_matrix[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(push.vertex_buffer, 0xABCD);
    }
}
