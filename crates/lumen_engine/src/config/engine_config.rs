//! Engine configuration sections

use std::path::{Path, PathBuf};

use ash::vk;
use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::resources::MAX_SETS_PER_POOL;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Shader locations
    pub shaders: ShaderConfig,
    /// Startup scene
    pub scene: SceneConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Load from `path` if it exists, otherwise fall back to defaults.
    ///
    /// A file that exists but fails to parse is an error; a missing file is not.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let config = Self::load_from_file(path)?;
        config.validate()?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Set the window title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.window.title = title.into();
        self
    }

    /// Set the initial window size
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set the dynamic resolution scale
    pub fn with_render_scale(mut self, scale: f32) -> Self {
        self.renderer.render_scale = scale;
        self
    }

    /// Set the scene to load at startup
    pub fn with_scene(mut self, path: impl Into<PathBuf>, required: bool) -> Self {
        self.scene.path = Some(path.into());
        self.scene.required = required;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid {
                field: "window",
                reason: format!("size {}x{} must be non-zero", self.window.width, self.window.height),
            });
        }

        if !(self.renderer.render_scale > 0.0 && self.renderer.render_scale <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "renderer.render_scale",
                reason: format!("{} is outside (0, 1]", self.renderer.render_scale),
            });
        }

        if !(1..=MAX_SETS_PER_POOL).contains(&self.renderer.initial_descriptor_sets) {
            return Err(ConfigError::Invalid {
                field: "renderer.initial_descriptor_sets",
                reason: format!(
                    "{} is outside [1, {}]",
                    self.renderer.initial_descriptor_sets, MAX_SETS_PER_POOL
                ),
            });
        }

        if self.renderer.fence_timeout_ns == 0 {
            return Err(ConfigError::Invalid {
                field: "renderer.fence_timeout_ns",
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Window creation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Lumen".to_string(),
            width: 1700,
            height: 900,
            resizable: true,
        }
    }
}

/// Filter used when the offscreen target is blitted to the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlitFilter {
    /// Bilinear filtering
    Linear,
    /// Point sampling
    Nearest,
}

impl BlitFilter {
    /// Vulkan filter for this setting
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Self::Linear => vk::Filter::LINEAR,
            Self::Nearest => vk::Filter::NEAREST,
        }
    }
}

/// Renderer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Request the Khronos validation layer
    pub enable_validation: bool,
    /// Fraction of the draw extent actually rendered, in (0, 1]
    pub render_scale: f32,
    /// Filter used by the final blit
    pub blit_filter: BlitFilter,
    /// Background compute effect selected at startup
    pub background_effect: usize,
    /// Capacity of the first descriptor pool in every growable allocator
    pub initial_descriptor_sets: u32,
    /// Upper bound on the per-frame fence wait
    pub fence_timeout_ns: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            render_scale: 1.0,
            blit_filter: BlitFilter::Linear,
            background_effect: 0,
            initial_descriptor_sets: 1000,
            fence_timeout_ns: 1_000_000_000,
        }
    }
}

/// Compiled shader locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory holding the compiled `.spv` files
    pub directory: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("target/shaders"),
        }
    }
}

impl ShaderConfig {
    /// Full path of a compiled shader by file name
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }
}

/// Scene loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// glTF file to import
    pub path: Option<PathBuf>,
    /// Abort startup when the import fails
    pub required: bool,
}
