//! Renderer error taxonomy

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Error type for every fallible GPU operation
#[derive(Error, Debug)]
pub enum VulkanError {
    /// Vulkan API error
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The surface changed and the swapchain must be rebuilt
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// A fence did not signal within the allowed time
    #[error("Fence wait exceeded {timeout_ns} ns")]
    FenceTimeout {
        /// Timeout that elapsed
        timeout_ns: u64,
    },

    /// Allocation failed even after retrying on a fresh pool
    #[error("Descriptor pool exhausted after retrying on a fresh pool")]
    DescriptorPoolExhausted,

    /// Initialization failed
    #[error("Vulkan initialization failed: {0}")]
    InitializationFailed(String),

    /// A compiled shader blob could not be loaded
    #[error("Failed to load shader module {path}")]
    ShaderLoad {
        /// Path of the blob
        path: PathBuf,
    },

    /// Invalid operation
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Reason for invalid operation
        reason: String,
    },

    /// Out of memory
    #[error("Out of GPU memory: requested {requested} bytes")]
    OutOfMemory {
        /// Requested size
        requested: u64,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// How the engine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Halt the engine
    Fatal,
    /// Report upward as "no value" and keep going
    Recoverable,
    /// Heals itself by rebuilding the swapchain
    Transient,
}

impl VulkanError {
    /// Classify this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SwapchainOutOfDate => ErrorSeverity::Transient,
            Self::ShaderLoad { .. } => ErrorSeverity::Recoverable,
            _ => ErrorSeverity::Fatal,
        }
    }

    /// Whether the swapchain must be recreated
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate)
    }

    /// Whether this is the out-of-memory or fragmentation signal a descriptor
    /// pool returns once it is full
    pub fn is_pool_full(&self) -> bool {
        matches!(
            self,
            Self::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(VulkanError::SwapchainOutOfDate.severity(), ErrorSeverity::Transient);
        assert_eq!(
            VulkanError::ShaderLoad { path: PathBuf::from("x.spv") }.severity(),
            ErrorSeverity::Recoverable
        );
        assert_eq!(VulkanError::FenceTimeout { timeout_ns: 1 }.severity(), ErrorSeverity::Fatal);
        assert_eq!(VulkanError::DescriptorPoolExhausted.severity(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_pool_full_detection() {
        assert!(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY).is_pool_full());
        assert!(VulkanError::Api(vk::Result::ERROR_FRAGMENTED_POOL).is_pool_full());
        assert!(!VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).is_pool_full());
    }
}
