//! Per-frame draw lists, visibility culling and batch ordering

use ash::vk::{self, Handle};

use crate::foundation::math::{Mat4, Vec3};
use crate::render::material::{MaterialInstance, MaterialPass};

use super::mesh::Bounds;

/// One surface to draw this frame
#[derive(Debug, Clone, Copy)]
pub struct RenderObject {
    /// Number of indices
    pub index_count: u32,
    /// First index in `index_buffer`
    pub first_index: u32,
    /// Index buffer to bind
    pub index_buffer: vk::Buffer,
    /// Material to bind
    pub material: MaterialInstance,
    /// Local-space bounds used for culling
    pub bounds: Bounds,
    /// World transform
    pub transform: Mat4,
    /// Device address of the vertex buffer
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// Draws collected for one frame, split by pass
#[derive(Debug, Default)]
pub struct DrawContext {
    /// Opaque surfaces, in collection order
    pub opaque: Vec<RenderObject>,
    /// Transparent surfaces, in collection order
    pub transparent: Vec<RenderObject>,
}

impl DrawContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every draw
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    /// Add a draw to the list its material's pass selects
    pub fn push(&mut self, object: RenderObject) {
        match object.material.pass {
            MaterialPass::Transparent => self.transparent.push(object),
            MaterialPass::MainColor | MaterialPass::Other => self.opaque.push(object),
        }
    }

    /// Total draws collected
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }

    /// Indices of visible opaque draws, ordered by pipeline then index buffer.
    ///
    /// The sort is stable, so draws sharing both keys keep collection order.
    pub fn sorted_opaque_indices(&self, view_proj: &Mat4) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .opaque
            .iter()
            .enumerate()
            .filter(|(_, object)| is_visible(object, view_proj))
            .map(|(i, _)| i)
            .collect();

        indices.sort_by_key(|&i| {
            let object = &self.opaque[i];
            (object.material.pipeline.pipeline.as_raw(), object.index_buffer.as_raw())
        });
        indices
    }

    /// Indices of visible transparent draws, in collection order
    pub fn visible_transparent_indices(&self, view_proj: &Mat4) -> Vec<usize> {
        self.transparent
            .iter()
            .enumerate()
            .filter(|(_, object)| is_visible(object, view_proj))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Conservative clip-space box test.
///
/// Projects the eight bounding-box corners and rejects the object only when
/// the projected box lies entirely outside [-1,1] x [-1,1] x [0,1] on one
/// axis. A box crossing the camera plane cannot be projected meaningfully and
/// counts as visible; a box wholly behind it does not.
pub fn is_visible(object: &RenderObject, view_proj: &Mat4) -> bool {
    let matrix = view_proj * object.transform;

    let mut min = Vec3::repeat(f32::MAX);
    let mut max = Vec3::repeat(f32::MIN);
    let mut behind = 0;

    for corner in object.bounds.corners() {
        let clip = matrix * corner.push(1.0);
        if clip.w <= f32::EPSILON {
            behind += 1;
            continue;
        }
        let ndc = clip.xyz() / clip.w;
        min = min.inf(&ndc);
        max = max.sup(&ndc);
    }

    match behind {
        8 => false,
        0 => !(min.z > 1.0 || max.z < 0.0 || min.x > 1.0 || max.x < -1.0 || min.y > 1.0 || max.y < -1.0),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants::DEG_TO_RAD, perspective_reverse_z, perspective_rh_zo};
    use crate::render::material::MaterialPipeline;

    fn material(pipeline: u64, pass: MaterialPass) -> MaterialInstance {
        MaterialInstance {
            pipeline: MaterialPipeline {
                pipeline: vk::Pipeline::from_raw(pipeline),
                layout: vk::PipelineLayout::from_raw(1),
            },
            material_set: vk::DescriptorSet::from_raw(pipeline * 10),
            pass,
        }
    }

    fn object_at(position: Vec3, half: f32, pipeline: u64, index_buffer: u64) -> RenderObject {
        RenderObject {
            index_count: 3,
            first_index: 0,
            index_buffer: vk::Buffer::from_raw(index_buffer),
            material: material(pipeline, MaterialPass::MainColor),
            bounds: Bounds::from_min_max(Vec3::repeat(-half), Vec3::repeat(half)),
            transform: Mat4::new_translation(&position),
            vertex_buffer_address: 0,
        }
    }

    fn view_proj() -> Mat4 {
        // camera at the origin looking down -Z
        perspective_reverse_z(70.0 * DEG_TO_RAD, 16.0 / 9.0, 0.1, 10000.0)
    }

    #[test]
    fn test_object_in_front_is_visible() {
        assert!(is_visible(&object_at(Vec3::new(0.0, 0.0, -10.0), 1.0, 1, 1), &view_proj()));
    }

    #[test]
    fn test_object_behind_camera_is_culled() {
        let behind = object_at(Vec3::new(0.0, 0.0, 10.0), 1.0, 1, 1);
        assert!(!is_visible(&behind, &view_proj()));

        // and under a conventional forward-Z projection
        let conventional = perspective_rh_zo(70.0 * DEG_TO_RAD, 1.0, 0.1, 100.0);
        assert!(!is_visible(&behind, &conventional));
    }

    #[test]
    fn test_object_straddling_frustum_edge_is_kept() {
        // tan(35 deg) * 10 * aspect is roughly 12.4: the box crosses the right edge
        let straddling = object_at(Vec3::new(12.4, 0.0, -10.0), 1.0, 1, 1);
        assert!(is_visible(&straddling, &view_proj()));

        let outside = object_at(Vec3::new(40.0, 0.0, -10.0), 1.0, 1, 1);
        assert!(!is_visible(&outside, &view_proj()));
    }

    #[test]
    fn test_object_crossing_camera_plane_is_kept() {
        let around_camera = object_at(Vec3::zeros(), 2.0, 1, 1);
        assert!(is_visible(&around_camera, &view_proj()));
    }

    #[test]
    fn test_opaque_sorted_by_pipeline_then_index_buffer() {
        let mut ctx = DrawContext::new();
        let front = Vec3::new(0.0, 0.0, -10.0);
        ctx.push(object_at(front, 1.0, 2, 5));
        ctx.push(object_at(front, 1.0, 1, 9));
        ctx.push(object_at(front, 1.0, 2, 3));
        ctx.push(object_at(front, 1.0, 1, 4));
        ctx.push(object_at(Vec3::new(0.0, 0.0, 50.0), 1.0, 1, 1));

        assert_eq!(ctx.sorted_opaque_indices(&view_proj()), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_transparent_keeps_encounter_order() {
        let mut ctx = DrawContext::new();
        let front = Vec3::new(0.0, 0.0, -10.0);
        for (pipeline, buffer) in [(3, 1), (1, 2), (2, 3)] {
            let mut object = object_at(front, 1.0, pipeline, buffer);
            object.material.pass = MaterialPass::Transparent;
            ctx.push(object);
        }
        let mut hidden = object_at(Vec3::new(0.0, 0.0, 10.0), 1.0, 1, 1);
        hidden.material.pass = MaterialPass::Transparent;
        ctx.push(hidden);

        assert!(ctx.opaque.is_empty());
        assert_eq!(ctx.visible_transparent_indices(&view_proj()), vec![0, 1, 2]);
        assert_eq!(ctx.len(), 4);

        ctx.clear();
        assert!(ctx.is_empty());
    }
}
