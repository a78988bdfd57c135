//! glTF 2.0 import into GPU-resident scenes

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ash::vk;
use base64::Engine as _;
use gltf::texture::{MagFilter, MinFilter};
use thiserror::Error;

use crate::foundation::math::{Mat4, Quat, Transform, Vec3};
use crate::render::api::{AllocatedImage, GpuDevice, MemoryResidency, SamplerDesc, VulkanError};
use crate::render::material::{MaterialInstance, MaterialPass, MaterialResources, MetallicRoughnessMaterial};
use crate::render::resources::{
    DefaultResources, DescriptorAllocatorGrowable, MaterialConstants, PoolSizeRatio, ResourceManager, Vertex,
};

use super::graph::{MeshId, NodeKind};
use super::loaded_scene::LoadedScene;
use super::mesh::{Bounds, GeoSurface, MeshAsset};

/// Why a scene could not be imported
#[derive(Error, Debug)]
pub enum SceneLoadError {
    /// The file could not be read or parsed
    #[error("Failed to import glTF {path}: {source}")]
    Import {
        /// File that failed
        path: PathBuf,
        /// Parser error
        #[source]
        source: gltf::Error,
    },

    /// A GPU upload failed
    #[error(transparent)]
    Gpu(#[from] VulkanError),

    /// The file parsed but cannot be drawn
    #[error("Invalid glTF content: {0}")]
    Invalid(String),
}

const SCENE_POOL_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 1.0),
];

/// Renderer state a scene import writes into
pub struct SceneUploader<'a> {
    /// Buffer and image creation
    pub resources: &'a mut ResourceManager,
    /// Fallback textures and samplers
    pub defaults: &'a DefaultResources,
    /// Material model the scene's materials are written with
    pub material: &'a mut MetallicRoughnessMaterial,
}

/// Nearest-family filters map to nearest, everything else to linear
pub fn extract_filter(filter: Option<MinFilter>) -> vk::Filter {
    match filter.unwrap_or(MinFilter::Nearest) {
        MinFilter::Nearest | MinFilter::NearestMipmapNearest | MinFilter::NearestMipmapLinear => vk::Filter::NEAREST,
        MinFilter::Linear | MinFilter::LinearMipmapNearest | MinFilter::LinearMipmapLinear => vk::Filter::LINEAR,
    }
}

fn extract_mag_filter(filter: Option<MagFilter>) -> vk::Filter {
    match filter.unwrap_or(MagFilter::Nearest) {
        MagFilter::Nearest => vk::Filter::NEAREST,
        MagFilter::Linear => vk::Filter::LINEAR,
    }
}

/// `*MipmapNearest` selects nearest mips, everything else linear
pub fn extract_mipmap_mode(filter: Option<MinFilter>) -> vk::SamplerMipmapMode {
    match filter.unwrap_or(MinFilter::Nearest) {
        MinFilter::NearestMipmapNearest | MinFilter::LinearMipmapNearest => vk::SamplerMipmapMode::NEAREST,
        _ => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Local transform of a node: the matrix as given, or T * R * S
pub fn node_local_transform(transform: gltf::scene::Transform) -> Mat4 {
    match transform {
        gltf::scene::Transform::Matrix { matrix } => {
            let columns: Vec<f32> = matrix.iter().flatten().copied().collect();
            Mat4::from_column_slice(&columns)
        }
        gltf::scene::Transform::Decomposed { translation, rotation, scale } => {
            let [x, y, z, w] = rotation;
            Transform::new(
                Vec3::from(translation),
                Quat::from_quaternion(nalgebra::Quaternion::new(w, x, y, z)),
                Vec3::from(scale),
            )
            .to_matrix()
        }
    }
}

fn unique_key<V>(map: &HashMap<String, V>, name: Option<&str>, kind: &str, index: usize) -> String {
    match name {
        Some(name) if !name.is_empty() && !map.contains_key(name) => name.to_string(),
        Some(name) if !name.is_empty() => format!("{}#{}", name, index),
        _ => format!("{}_{}", kind, index),
    }
}

/// Payload of a `data:<mime>;base64,<payload>` URI
fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        log::warn!("Unsupported data URI encoding: data:{}", header);
        return None;
    }
    match base64::engine::general_purpose::STANDARD.decode(payload) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("Failed to decode base64 data URI: {}", e);
            None
        }
    }
}

/// Decode one image to tightly packed RGBA8
fn decode_image(image: &gltf::Image<'_>, base: Option<&Path>, buffers: &[gltf::buffer::Data]) -> Option<image::RgbaImage> {
    let decoded = match image.source() {
        gltf::image::Source::View { view, .. } => {
            let data = buffers.get(view.buffer().index())?;
            let start = view.offset();
            let bytes = data.0.get(start..start + view.length())?;
            image::load_from_memory(bytes)
        }
        gltf::image::Source::Uri { uri, .. } if uri.starts_with("data:") => {
            let bytes = decode_data_uri(uri)?;
            image::load_from_memory(&bytes)
        }
        gltf::image::Source::Uri { uri, .. } => {
            let path = base.map_or_else(|| PathBuf::from(uri), |base| base.join(uri));
            image::open(path)
        }
    };

    match decoded {
        Ok(decoded) => Some(decoded.to_rgba8()),
        Err(e) => {
            log::warn!("Failed to decode glTF image {}: {}", image.index(), e);
            None
        }
    }
}

/// Import the glTF or GLB file at `path`.
///
/// Images that fail to decode are replaced by the checkerboard. Any GPU
/// object created before a failure is released before returning the error.
pub fn load_gltf<D: GpuDevice>(
    device: &mut D,
    uploader: SceneUploader<'_>,
    path: impl AsRef<Path>,
) -> Result<LoadedScene, SceneLoadError> {
    let path = path.as_ref();
    log::info!("Loading glTF: {}", path.display());

    let gltf = gltf::Gltf::open(path).map_err(|source| SceneLoadError::Import {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent();
    let buffers = gltf::import_buffers(&gltf.document, base, gltf.blob.clone()).map_err(|source| {
        SceneLoadError::Import {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let material_count = gltf.document.materials().len().max(1) as u32;
    let descriptors = DescriptorAllocatorGrowable::new(device, material_count, &SCENE_POOL_RATIOS)?;

    let name = path
        .file_stem()
        .map_or_else(|| "scene".to_string(), |stem| stem.to_string_lossy().into_owned());
    let mut scene = LoadedScene::new(name, descriptors);

    let defaults = uploader.defaults;
    match populate(device, uploader, &gltf.document, base, &buffers, &mut scene) {
        Ok(()) => {
            log::info!(
                "Loaded '{}': {} meshes, {} materials, {} nodes",
                scene.name,
                scene.meshes.len(),
                scene.materials.len(),
                scene.graph.len()
            );
            Ok(scene)
        }
        Err(e) => {
            log::error!("Scene import failed, releasing partial scene: {}", e);
            scene.destroy(device, defaults);
            Err(e)
        }
    }
}

fn populate<D: GpuDevice>(
    device: &mut D,
    uploader: SceneUploader<'_>,
    document: &gltf::Document,
    base: Option<&Path>,
    buffers: &[gltf::buffer::Data],
    scene: &mut LoadedScene,
) -> Result<(), SceneLoadError> {
    let SceneUploader { resources, defaults, material } = uploader;

    for sampler in document.samplers() {
        let desc = SamplerDesc {
            mag_filter: extract_mag_filter(sampler.mag_filter()),
            min_filter: extract_filter(sampler.min_filter()),
            mipmap_mode: extract_mipmap_mode(sampler.min_filter()),
        };
        scene.samplers.push(device.create_sampler(&desc)?);
    }

    let mut images: Vec<AllocatedImage> = Vec::with_capacity(document.images().len());
    for image in document.images() {
        let Some(pixels) = decode_image(&image, base, buffers) else {
            log::warn!("glTF failed to load texture {}, using the checkerboard", image.index());
            images.push(defaults.error_checkerboard);
            continue;
        };

        let uploaded = resources.create_image(
            device,
            vk::Extent3D {
                width: pixels.width(),
                height: pixels.height(),
                depth: 1,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            Some(pixels.as_raw()),
            false,
        )?;
        let key = unique_key(&scene.images, image.name(), "image", image.index());
        scene.images.insert(key, uploaded);
        images.push(uploaded);
    }

    let materials = write_materials(device, resources, defaults, material, document, &images, scene)?;

    for mesh in document.meshes() {
        let asset = build_mesh(device, resources, &mesh, buffers, &materials)?;
        scene.meshes.push(asset);
    }

    let mut node_ids = Vec::with_capacity(document.nodes().len());
    for node in document.nodes() {
        let kind = node.mesh().map_or(NodeKind::Group, |mesh| NodeKind::Mesh(MeshId(mesh.index())));
        let key = unique_key(&scene.nodes, node.name(), "node", node.index());
        let id = scene.graph.add_node(key.clone(), kind, node_local_transform(node.transform()));
        scene.nodes.insert(key, id);
        node_ids.push(id);
    }

    for node in document.nodes() {
        for child in node.children() {
            scene
                .graph
                .set_parent(node_ids[child.index()], node_ids[node.index()])
                .map_err(|e| SceneLoadError::Invalid(e.to_string()))?;
        }
    }
    scene.graph.refresh_transforms();

    Ok(())
}

fn write_materials<D: GpuDevice>(
    device: &mut D,
    resources: &mut ResourceManager,
    defaults: &DefaultResources,
    material: &mut MetallicRoughnessMaterial,
    document: &gltf::Document,
    images: &[AllocatedImage],
    scene: &mut LoadedScene,
) -> Result<Vec<MaterialInstance>, SceneLoadError> {
    let count = document.materials().len().max(1);
    let stride = std::mem::size_of::<MaterialConstants>();

    let data = resources.create_buffer(
        device,
        (stride * count) as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryResidency::HostVisible,
    )?;
    let data_buffer = data.buffer;
    scene.material_data = Some(data.clone());

    let texture = |info: Option<gltf::texture::Texture<'_>>| -> (vk::ImageView, vk::Sampler) {
        let Some(texture) = info else {
            return (defaults.white.view, defaults.linear_sampler);
        };
        let view = images
            .get(texture.source().index())
            .map_or(defaults.error_checkerboard.view, |image| image.view);
        let sampler = texture
            .sampler()
            .index()
            .and_then(|i| scene.samplers.get(i).copied())
            .unwrap_or(defaults.linear_sampler);
        (view, sampler)
    };

    let mut written: Vec<(Option<String>, MaterialInstance)> = Vec::with_capacity(count);

    if document.materials().len() == 0 {
        data.write(0, &MaterialConstants::default())?;
        let resources = MaterialResources {
            color_view: defaults.white.view,
            color_sampler: defaults.linear_sampler,
            metal_rough_view: defaults.white.view,
            metal_rough_sampler: defaults.linear_sampler,
            data_buffer,
            data_buffer_offset: 0,
        };
        let instance = material.write_material(device, MaterialPass::MainColor, &resources, &mut scene.descriptors)?;
        written.push((Some("default".to_string()), instance));
    }

    for (index, mat) in document.materials().enumerate() {
        let pbr = mat.pbr_metallic_roughness();
        let constants = MaterialConstants {
            color_factors: pbr.base_color_factor(),
            metal_rough_factors: [pbr.metallic_factor(), pbr.roughness_factor(), 0.0, 0.0],
            ..Default::default()
        };
        data.write(index * stride, &constants)?;

        let pass = if mat.alpha_mode() == gltf::material::AlphaMode::Blend {
            MaterialPass::Transparent
        } else {
            MaterialPass::MainColor
        };

        let (color_view, color_sampler) = texture(pbr.base_color_texture().map(|info| info.texture()));
        let (metal_rough_view, metal_rough_sampler) =
            texture(pbr.metallic_roughness_texture().map(|info| info.texture()));

        let material_resources = MaterialResources {
            color_view,
            color_sampler,
            metal_rough_view,
            metal_rough_sampler,
            data_buffer,
            data_buffer_offset: (index * stride) as vk::DeviceSize,
        };
        let instance = material.write_material(device, pass, &material_resources, &mut scene.descriptors)?;
        written.push((mat.name().map(str::to_string), instance));
    }

    let mut instances = Vec::with_capacity(written.len());
    for (index, (name, instance)) in written.into_iter().enumerate() {
        let key = unique_key(&scene.materials, name.as_deref(), "material", index);
        scene.materials.insert(key, instance);
        instances.push(instance);
    }
    Ok(instances)
}

fn build_mesh<D: GpuDevice>(
    device: &mut D,
    resources: &mut ResourceManager,
    mesh: &gltf::Mesh<'_>,
    buffers: &[gltf::buffer::Data],
    materials: &[MaterialInstance],
) -> Result<MeshAsset, SceneLoadError> {
    let name = mesh.name().map_or_else(|| format!("mesh_{}", mesh.index()), str::to_string);

    let mut indices: Vec<u32> = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut surfaces = Vec::new();

    for primitive in mesh.primitives() {
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));

        let initial_vertex = vertices.len();
        let Some(positions) = reader.read_positions() else {
            log::warn!("Primitive {} of '{}' has no positions, skipping", primitive.index(), name);
            continue;
        };
        vertices.extend(positions.map(|position| Vertex {
            position,
            ..Default::default()
        }));
        let added = &mut vertices[initial_vertex..];

        if let Some(normals) = reader.read_normals() {
            for (vertex, normal) in added.iter_mut().zip(normals) {
                vertex.normal = normal;
            }
        }
        if let Some(uvs) = reader.read_tex_coords(0) {
            for (vertex, [u, v]) in added.iter_mut().zip(uvs.into_f32()) {
                vertex.uv_x = u;
                vertex.uv_y = v;
            }
        }
        if let Some(colors) = reader.read_colors(0) {
            for (vertex, color) in added.iter_mut().zip(colors.into_rgba_f32()) {
                vertex.color = color;
            }
        }

        let start_index = indices.len() as u32;
        let offset = initial_vertex as u32;
        match reader.read_indices() {
            Some(read) => indices.extend(read.into_u32().map(|i| i + offset)),
            None => indices.extend(offset..vertices.len() as u32),
        }
        let count = indices.len() as u32 - start_index;

        let bounds = Bounds::from_points(vertices[initial_vertex..].iter().map(|v| Vec3::from(v.position)))
            .ok_or_else(|| SceneLoadError::Invalid(format!("primitive of '{}' has no vertices", name)))?;

        let material = primitive
            .material()
            .index()
            .and_then(|i| materials.get(i))
            .or_else(|| materials.first())
            .copied()
            .ok_or_else(|| SceneLoadError::Invalid("scene has no materials".to_string()))?;

        surfaces.push(GeoSurface {
            start_index,
            count,
            bounds,
            material,
        });
    }

    if surfaces.is_empty() {
        return Err(SceneLoadError::Invalid(format!("mesh '{}' has no drawable primitives", name)));
    }

    let buffers = resources.upload_mesh(device, &indices, &vertices)?;
    Ok(MeshAsset { name, surfaces, buffers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ShaderConfig};
    use crate::render::api::DescriptorWrite;
    use crate::render::testing::{dummy_shader_dir, DeviceCall, MockDevice};
    use crate::render::{NullOverlay, Renderer};
    use approx::assert_relative_eq;
    use base64::Engine as _;

    #[test]
    fn test_filter_mapping() {
        assert_eq!(extract_filter(Some(MinFilter::NearestMipmapLinear)), vk::Filter::NEAREST);
        assert_eq!(extract_filter(Some(MinFilter::LinearMipmapNearest)), vk::Filter::LINEAR);
        assert_eq!(extract_filter(None), vk::Filter::NEAREST);
        assert_eq!(extract_mag_filter(Some(MagFilter::Linear)), vk::Filter::LINEAR);
    }

    #[test]
    fn test_mipmap_mode_mapping() {
        assert_eq!(extract_mipmap_mode(Some(MinFilter::LinearMipmapNearest)), vk::SamplerMipmapMode::NEAREST);
        assert_eq!(extract_mipmap_mode(Some(MinFilter::NearestMipmapLinear)), vk::SamplerMipmapMode::LINEAR);
        assert_eq!(extract_mipmap_mode(Some(MinFilter::Linear)), vk::SamplerMipmapMode::LINEAR);
    }

    #[test]
    fn test_decomposed_transform_is_trs() {
        let transform = gltf::scene::Transform::Decomposed {
            translation: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [2.0, 2.0, 2.0],
        };
        let m = node_local_transform(transform);
        let p = m.transform_point(&nalgebra::Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p.coords, Vec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn test_matrix_transform_is_column_major() {
        let transform = gltf::scene::Transform::Matrix {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [7.0, 8.0, 9.0, 1.0],
            ],
        };
        let m = node_local_transform(transform);
        assert_eq!(m[(0, 3)], 7.0);
        assert_eq!(m[(2, 3)], 9.0);
    }

    #[test]
    fn test_unique_key_disambiguates() {
        let mut map = HashMap::new();
        assert_eq!(unique_key(&map, Some("rock"), "mesh", 0), "rock");
        map.insert("rock".to_string(), ());
        assert_eq!(unique_key(&map, Some("rock"), "mesh", 3), "rock#3");
        assert_eq!(unique_key(&map, None, "mesh", 4), "mesh_4");
        assert_eq!(unique_key(&map, Some(""), "node", 5), "node_5");
    }

    fn png_data_uri(width: u32, height: u32) -> String {
        let pixels = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
        let mut png = std::io::Cursor::new(Vec::new());
        pixels.write_to(&mut png, image::ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png.into_inner())
        )
    }

    /// A mesh-less glTF with one textured material
    fn write_textured_gltf(tag: &str, image_uri: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lumen_gltf_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let json = format!(
            r#"{{
                "asset": {{ "version": "2.0" }},
                "images": [{{ "name": "albedo", "uri": "{}" }}],
                "textures": [{{ "source": 0 }}],
                "materials": [{{
                    "name": "painted",
                    "pbrMetallicRoughness": {{ "baseColorTexture": {{ "index": 0 }} }}
                }}]
            }}"#,
            image_uri
        );
        let path = dir.join("textured.gltf");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn renderer(tag: &str) -> Renderer<MockDevice> {
        let mut config = EngineConfig::default();
        config.shaders = ShaderConfig { directory: dummy_shader_dir(tag) };
        Renderer::new(MockDevice::new(), &config, Box::new(NullOverlay)).unwrap()
    }

    fn color_texture_bound(device: &MockDevice, target: vk::ImageView) -> bool {
        device.calls.iter().any(|call| match call {
            DeviceCall::UpdateDescriptorSet(_, writes) => writes
                .iter()
                .any(|w| matches!(w, DescriptorWrite::Image { binding: 1, view, .. } if *view == target)),
            _ => false,
        })
    }

    #[test]
    fn test_data_uri_payload_decodes() {
        assert_eq!(decode_data_uri("data:application/octet-stream;base64,AQID"), Some(vec![1, 2, 3]));
        assert_eq!(decode_data_uri("data:image/png,rawbytes"), None);
        assert_eq!(decode_data_uri("data:image/png;base64,@@@"), None);
        assert_eq!(decode_data_uri("textures/albedo.png"), None);
    }

    #[test]
    fn test_embedded_data_uri_image_is_uploaded() {
        let path = write_textured_gltf("embedded", &png_data_uri(4, 2));
        let mut renderer = renderer("gltf_embedded");

        let key = renderer.load_scene(&path).unwrap();
        let scene = renderer.scene(key).unwrap();
        assert_eq!(scene.images.len(), 1);

        let albedo = scene.images["albedo"];
        assert_eq!((albedo.extent.width, albedo.extent.height), (4, 2));
        assert_ne!(albedo.view, renderer.defaults().error_checkerboard.view);
        assert!(color_texture_bound(renderer.device(), albedo.view));

        renderer.destroy();
        renderer.device().assert_no_leaks();
    }

    #[test]
    fn test_corrupt_data_uri_falls_back_to_checkerboard() {
        let path = write_textured_gltf("corrupt", "data:image/png;base64,bm90IGEgcG5n");
        let mut renderer = renderer("gltf_corrupt");

        let key = renderer.load_scene(&path).unwrap();
        assert!(renderer.scene(key).unwrap().images.is_empty());
        let checkerboard = renderer.defaults().error_checkerboard.view;
        assert!(color_texture_bound(renderer.device(), checkerboard));

        renderer.destroy();
        renderer.device().assert_no_leaks();
    }

    #[test]
    fn test_missing_file_is_import_error() {
        let err = gltf::Gltf::open("/no/such/scene.gltf").map_err(|source| SceneLoadError::Import {
            path: "/no/such/scene.gltf".into(),
            source,
        });
        assert!(matches!(err, Err(SceneLoadError::Import { .. })));
    }
}
