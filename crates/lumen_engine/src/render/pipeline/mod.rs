//! Shader loading and pipeline construction

mod builder;
mod shader;

pub use builder::PipelineBuilder;
pub use shader::{load_shader_module, require_shader_module, spirv_words};

/// Gradient background compute shader
pub const GRADIENT_SHADER: &str = "gradient.spv";
/// Procedural sky background compute shader
pub const SKY_SHADER: &str = "sky.spv";
/// Mesh vertex shader, pulls vertices through a buffer device address
pub const MESH_VERT_SHADER: &str = "mesh_vert.spv";
/// Metallic-roughness fragment shader
pub const MESH_FRAG_SHADER: &str = "mesh_frag.spv";

/// Every compiled shader the renderer loads at startup
pub const REQUIRED_SHADERS: [&str; 4] = [GRADIENT_SHADER, SKY_SHADER, MESH_VERT_SHADER, MESH_FRAG_SHADER];
