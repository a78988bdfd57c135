//! # Scene
//!
//! Persistent scene data and the per-frame draw list built from it.
//!
//! Nodes live in an arena ([`SceneGraph`]) and are addressed by [`NodeId`];
//! mesh-bearing nodes emit one [`RenderObject`] per surface into a
//! [`DrawContext`] each frame. [`LoadedScene`] owns every GPU resource of one
//! imported glTF file.

mod draw_context;
mod gltf_loader;
mod graph;
mod loaded_scene;
mod mesh;

pub use draw_context::{is_visible, DrawContext, RenderObject};
pub use gltf_loader::{
    extract_filter, extract_mipmap_mode, load_gltf, node_local_transform, SceneLoadError, SceneUploader,
};
pub use graph::{GraphError, MeshId, Node, NodeId, NodeKind, SceneGraph};
pub use loaded_scene::LoadedScene;
pub use mesh::{Bounds, GeoSurface, MeshAsset};
