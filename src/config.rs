//! Renderer configuration, parsed from the command line.

use std::path::PathBuf;

use clap::Parser;

/// Everything the renderer needs to know before it touches the driver.
///
/// Diagnostics are an explicit value here rather than compiled-in state; the
/// default still follows the build profile.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "mesh-viewer", version, about = "Render a textured OBJ mesh with Vulkan")]
pub struct RendererConfig {
    /// Enable the validation layer and route driver diagnostics to the log
    /// [default: on in debug builds].
    #[arg(long, overrides_with = "no_validation")]
    validation: bool,

    /// Disable the validation layer.
    #[arg(long, overrides_with = "validation")]
    no_validation: bool,

    /// Wavefront OBJ model to render.
    #[arg(long, default_value = "assets/models/viking_room.obj")]
    pub model: PathBuf,

    /// Texture applied to the model.
    #[arg(long, default_value = "assets/textures/viking_room.png")]
    pub texture: PathBuf,

    /// Compiled SPIR-V vertex shader.
    #[arg(long, default_value = "assets/shaders/shader.vert.spv")]
    pub vertex_shader: PathBuf,

    /// Compiled SPIR-V fragment shader.
    #[arg(long, default_value = "assets/shaders/shader.frag.spv")]
    pub fragment_shader: PathBuf,

    /// Initial window width in logical pixels.
    #[arg(long, default_value_t = 800)]
    pub width: u32,

    /// Initial window height in logical pixels.
    #[arg(long, default_value_t = 600)]
    pub height: u32,

    #[arg(long, default_value = "Vulkan")]
    pub title: String,
}

impl RendererConfig {
    /// Whether the validation layer is requested. The last of `--validation`
    /// and `--no-validation` wins; without either, debug builds validate.
    pub fn validation_enabled(&self) -> bool {
        match (self.validation, self.no_validation) {
            (true, _) => true,
            (_, true) => false,
            _ => cfg!(debug_assertions),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::parse_from(["mesh-viewer"])
    }
}
