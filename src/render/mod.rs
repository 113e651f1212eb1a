//! Image rendering.
//!
//! | Backend | How |
//! |---|---|
//! | **Placeholder** | category gradient drawn with `image`, JPEG encoded |
//! | **Command** | external program, prompt as last argument, image on stdout |
//! | **Fallback** | primary backend, placeholder when it fails |
//!
//! The module is split into:
//! - **Backend**: [`Renderer`] trait, request and error types
//! - **Prompt**: keyword + category → prompt text
//! - **Validate**: format and size checks, PNG → JPEG normalization

pub mod backend;
pub mod command;
pub mod placeholder;
pub mod prompt;
mod validate;

pub use backend::{FallbackRenderer, GenerationError, RenderRequest, Renderer};
pub use command::CommandRenderer;
pub use placeholder::PlaceholderRenderer;
pub use prompt::build_prompt;
pub use validate::{ValidatedImage, prepare_image, read_dimensions};

use crate::config::{GenerationConfig, RendererKind};
use std::time::Duration;

/// Build the renderer described by the generation config.
///
/// Returns `None` when `renderer = "command"` but no command is set
/// (rejected earlier by config validation).
pub fn renderer_from_config(config: &GenerationConfig) -> Option<Box<dyn Renderer>> {
    let placeholder = PlaceholderRenderer::new(config.jpeg_quality);
    match config.renderer {
        RendererKind::Placeholder => Some(Box::new(placeholder)),
        RendererKind::Command => {
            let command = CommandRenderer::from_argv(
                &config.command,
                Duration::from_secs(config.timeout_secs),
            )?;
            if config.fallback_to_placeholder {
                Some(Box::new(FallbackRenderer::new(
                    Box::new(command),
                    Box::new(placeholder),
                )))
            } else {
                Some(Box::new(command))
            }
        }
    }
}
