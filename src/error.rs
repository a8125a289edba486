//! Fatal error taxonomy.
//!
//! Capability errors are never retried. They are wrapped into
//! `anyhow::Error` on their way to the process entry point, so callers that
//! care can still `downcast_ref::<RendererError>()`.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Validation layer requested but not supported: {0}")]
    MissingValidationLayer(String),
    #[error("Failed to find GPUs with Vulkan support.")]
    NoVulkanDevice,
    #[error("Failed to find a suitable physical device.")]
    NoSuitableDevice,
    #[error("Surface reports no supported formats.")]
    NoSurfaceFormat,
    #[error("Failed to find supported format among {0:?}.")]
    NoSupportedFormat(Vec<vk::Format>),
    #[error("Failed to find suitable memory type (filter {type_filter:#b}, properties {properties:?}).")]
    NoMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("Unsupported image layout transition: {old:?} to {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("Unsupported window system: {0}")]
    UnsupportedWindowSystem(&'static str),
    #[error("SPIR-V code is empty after reading.")]
    EmptyShader,
}

/// Error type for physical device suitability checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SuitabilityError {
    #[error("{0}")]
    Static(&'static str),
    #[error("{0}")]
    Dynamic(String),
}
