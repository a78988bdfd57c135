//! GPU resources owned by one imported scene

use std::collections::HashMap;

use ash::vk;

use crate::foundation::math::Mat4;
use crate::render::api::{AllocatedBuffer, AllocatedImage, GpuDevice};
use crate::render::material::MaterialInstance;
use crate::render::resources::{DefaultResources, DescriptorAllocatorGrowable};

use super::draw_context::DrawContext;
use super::graph::{NodeId, SceneGraph};
use super::mesh::MeshAsset;

/// Everything one imported asset put on the GPU, plus its node tree
///
/// The scene must outlive every frame that recorded its draws; unload it
/// only after the device is idle.
#[derive(Debug)]
pub struct LoadedScene {
    /// Source name, usually the file stem
    pub name: String,
    /// Meshes, indexed by [`MeshId`](super::graph::MeshId)
    pub meshes: Vec<MeshAsset>,
    /// Images decoded from the asset, by name
    pub images: HashMap<String, AllocatedImage>,
    /// Material instances, by name
    pub materials: HashMap<String, MaterialInstance>,
    /// Named nodes
    pub nodes: HashMap<String, NodeId>,
    /// Node hierarchy
    pub graph: SceneGraph,
    /// Samplers created for the asset
    pub samplers: Vec<vk::Sampler>,
    /// Uniform buffer holding every material's constants
    pub material_data: Option<AllocatedBuffer>,
    /// Pools the material sets came from
    pub descriptors: DescriptorAllocatorGrowable,
}

impl LoadedScene {
    /// Empty scene drawing from `descriptors`
    pub fn new(name: impl Into<String>, descriptors: DescriptorAllocatorGrowable) -> Self {
        Self {
            name: name.into(),
            meshes: Vec::new(),
            images: HashMap::new(),
            materials: HashMap::new(),
            nodes: HashMap::new(),
            graph: SceneGraph::new(),
            samplers: Vec::new(),
            material_data: None,
            descriptors,
        }
    }

    /// Append this scene's draws to `ctx`
    pub fn collect_draws(&self, top_matrix: &Mat4, ctx: &mut DrawContext) {
        self.graph.collect_draws(top_matrix, &self.meshes, ctx);
    }

    /// Release every GPU object the scene owns.
    ///
    /// Order: descriptor pools, buffers, images, samplers. Shared default
    /// images are left alone. The device must be idle.
    pub fn destroy<D: GpuDevice>(mut self, device: &mut D, defaults: &DefaultResources) {
        log::debug!("Destroying scene '{}'", self.name);

        self.descriptors.destroy(device);

        if let Some(buffer) = self.material_data.take() {
            device.destroy_buffer(buffer);
        }
        for mesh in self.meshes.drain(..) {
            device.destroy_buffer(mesh.buffers.index_buffer);
            device.destroy_buffer(mesh.buffers.vertex_buffer);
        }

        for (_, image) in self.images.drain() {
            if defaults.contains(image.image) {
                continue;
            }
            device.destroy_image(image);
        }

        for sampler in self.samplers.drain(..) {
            device.destroy_sampler(sampler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{MemoryResidency, ResourceKind};
    use crate::render::frame::DeletionQueue;
    use crate::render::resources::{PoolSizeRatio, ResourceManager, Vertex};
    use crate::render::testing::{DeviceCall, MockDevice};

    #[test]
    fn test_teardown_order_and_default_images_survive() {
        let mut device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        let mut resources = ResourceManager::new(&mut device, &mut queue).unwrap();
        let defaults = DefaultResources::new(&mut device, &mut resources, &mut queue).unwrap();

        let descriptors = DescriptorAllocatorGrowable::new(
            &mut device,
            1,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0)],
        )
        .unwrap();
        let mut scene = LoadedScene::new("test", descriptors);

        let buffers = resources
            .upload_mesh(&mut device, &[0, 1, 2], &[Vertex::default(); 3])
            .unwrap();
        scene.meshes.push(MeshAsset {
            name: "tri".to_string(),
            surfaces: Vec::new(),
            buffers,
        });
        scene.material_data = Some(
            device
                .create_buffer(256, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryResidency::HostVisible)
                .unwrap(),
        );
        let texture = resources
            .create_image(
                &mut device,
                vk::Extent3D { width: 1, height: 1, depth: 1 },
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED,
                Some(&[1, 2, 3, 4]),
                false,
            )
            .unwrap();
        scene.images.insert("albedo".to_string(), texture);
        scene.images.insert("missing".to_string(), defaults.error_checkerboard);
        scene.samplers.push(device.create_sampler(&crate::render::api::SamplerDesc::NEAREST).unwrap());

        device.calls.clear();
        scene.destroy(&mut device, &defaults);

        let kinds: Vec<ResourceKind> = device
            .calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Destroy(kind, _) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::DescriptorPool,
                ResourceKind::Buffer,
                ResourceKind::Buffer,
                ResourceKind::Buffer,
                ResourceKind::Image,
                ResourceKind::Sampler,
            ]
        );

        // only the engine defaults remain until the global queue flushes
        assert_eq!(device.outstanding_allocations(), 4);
        queue.flush(&mut device);
        device.assert_no_leaks();
    }
}
