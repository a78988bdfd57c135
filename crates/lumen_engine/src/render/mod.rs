//! Rendering core
//!
//! Everything GPU-facing lives here. The [`api`] module defines the device
//! seam, [`backends`] implements it with ash and VMA, and [`Renderer`] drives
//! the frame loop on top of it.

pub mod api;
pub mod backends;
pub mod frame;
pub mod material;
pub mod overlay;
pub mod pipeline;
pub mod primitives;
pub mod renderer;
pub mod resources;
pub mod systems;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ErrorSeverity, GpuDevice, VulkanError, VulkanResult};
pub use backends::VulkanDevice;
pub use overlay::{EngineStats, NullOverlay, Overlay, OverlayState, StatsOverlay};
pub use primitives::Camera;
pub use renderer::{Renderer, SceneKey};
pub use window::{Window, WindowError};
