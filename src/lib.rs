//! A Vulkan mesh viewer: negotiates a device for a window, uploads a textured
//! OBJ model, and draws it every frame, rebuilding the swapchain whenever the
//! window or surface changes.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod app;
pub mod assets;
pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod mesh;
pub mod negotiator;
pub mod pipeline;
pub mod renderer;
pub mod swapchain;
pub mod upload;
pub mod vk_window;

pub use config::RendererConfig;
pub use error::{RendererError, SuitabilityError};
pub use renderer::Renderer;
