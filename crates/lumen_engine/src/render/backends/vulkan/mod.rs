//! Vulkan backend implementation
//!
//! Organized into context bring-up, swapchain management and the
//! [`GpuDevice`](crate::render::api::GpuDevice) implementation.

/// Instance, physical device and logical device
pub mod context;

/// Swapchain creation and presentation
pub mod swapchain;

/// Ash and VMA device
pub mod device;

pub use context::PhysicalDeviceInfo;
pub use device::VulkanDevice;
