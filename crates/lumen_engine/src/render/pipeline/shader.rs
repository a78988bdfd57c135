//! SPIR-V blob loading

use std::path::Path;

use ash::vk;

use crate::render::api::{GpuDevice, VulkanError, VulkanResult};

/// Reinterpret a SPIR-V byte blob as native-endian words.
///
/// Returns `None` when the length is not a whole number of words.
pub fn spirv_words(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
            .collect(),
    )
}

/// Load a compiled shader from disk and create a module from it.
///
/// Any failure (missing file, truncated blob, driver rejection) is logged and
/// reported as `None`.
pub fn load_shader_module<D: GpuDevice>(device: &mut D, path: impl AsRef<Path>) -> Option<vk::ShaderModule> {
    let path = path.as_ref();
    log::debug!("[SHADER] Loading shader from: {:?}", path);

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("[SHADER] Failed to read shader file {:?}: {}", path, e);
            return None;
        }
    };

    let Some(words) = spirv_words(&bytes) else {
        log::warn!("[SHADER] {:?} is not word aligned ({} bytes)", path, bytes.len());
        return None;
    };

    match device.create_shader_module(&words) {
        Ok(module) => Some(module),
        Err(e) => {
            log::warn!("[SHADER] vkCreateShaderModule failed for {:?}: {}", path, e);
            None
        }
    }
}

/// Load a shader the renderer cannot run without
pub fn require_shader_module<D: GpuDevice>(device: &mut D, path: impl AsRef<Path>) -> VulkanResult<vk::ShaderModule> {
    let path = path.as_ref();
    load_shader_module(device, path).ok_or_else(|| VulkanError::ShaderLoad { path: path.to_path_buf() })
}
