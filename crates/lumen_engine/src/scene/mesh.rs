//! Uploaded meshes and their surfaces

use crate::foundation::math::Vec3;
use crate::render::material::MaterialInstance;
use crate::render::resources::MeshGpuBuffers;

/// Local-space bounding volume of a surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Box center
    pub origin: Vec3,
    /// Half size along each axis
    pub extents: Vec3,
    /// Radius of the enclosing sphere
    pub sphere_radius: f32,
}

impl Bounds {
    /// Box spanning `min..max`
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let extents = (max - min) * 0.5;
        Self {
            origin: (max + min) * 0.5,
            extents,
            sphere_radius: extents.norm(),
        }
    }

    /// Smallest box containing every point, or `None` for no points
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
        Some(Self::from_min_max(min, max))
    }

    /// The eight box corners
    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::zeros(); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let sign = |bit: usize| if i & bit == 0 { -1.0 } else { 1.0 };
            *corner = self.origin
                + Vec3::new(
                    sign(1) * self.extents.x,
                    sign(2) * self.extents.y,
                    sign(4) * self.extents.z,
                );
        }
        corners
    }
}

/// Index range of one primitive drawn with one material
#[derive(Debug, Clone, Copy)]
pub struct GeoSurface {
    /// First index in the mesh's index buffer
    pub start_index: u32,
    /// Number of indices
    pub count: u32,
    /// Bounds of the vertices this surface references
    pub bounds: Bounds,
    /// Material the surface is drawn with
    pub material: MaterialInstance,
}

/// A named mesh: one set of GPU buffers split into surfaces
#[derive(Debug, Clone)]
pub struct MeshAsset {
    /// Name from the source asset
    pub name: String,
    /// Surfaces in source order
    pub surfaces: Vec<GeoSurface>,
    /// Index and vertex buffers
    pub buffers: MeshGpuBuffers,
}
