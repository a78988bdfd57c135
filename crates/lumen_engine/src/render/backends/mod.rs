//! Backend implementations for the render module
//!
//! Currently only Vulkan is supported.

/// Vulkan rendering backend implementation
pub mod vulkan;

pub use vulkan::VulkanDevice;
