//! # Lumen Engine
//!
//! A Vulkan 1.3 real-time rendering core: a frame-in-flight loop, growable
//! descriptor allocation, deferred GPU resource deletion, a fixed
//! compute-then-geometry render sequence and glTF scene import.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lumen_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     logging::init();
//!     let config = EngineConfig::load_or_default("lumen.toml")?;
//!     let mut engine = Engine::new(config)?;
//!     let result = engine.run();
//!     engine.terminate();
//!     result
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod input;
pub mod render;
pub mod scene;

mod engine;

pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig},
        foundation::{
            logging,
            math::{Mat4, Vec3},
            time::{Stopwatch, Timer},
        },
        input::{InputEvent, KeyCode},
        render::{Camera, GpuDevice, Renderer, SceneKey, VulkanDevice, VulkanError},
        scene::{LoadedScene, SceneLoadError},
        Engine, EngineError,
    };
}
