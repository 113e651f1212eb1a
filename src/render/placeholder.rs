//! Local placeholder renderer.
//!
//! Draws a vertical gradient in the category's palette with a horizontal
//! accent band whose position is derived from the keyword, then encodes it
//! as JPEG. Output is deterministic, so re-runs hit the store's no-op path.

use super::backend::{GenerationError, RenderRequest, Renderer};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use sha2::{Digest, Sha256};

/// Background and accent colours per category.
fn palette(category: &str) -> ([u8; 3], [u8; 3]) {
    match category {
        "business" => ([0x1E, 0x3A, 0x8A], [0x3B, 0x82, 0xF6]),
        "technology" => ([0x58, 0x1C, 0x87], [0x8B, 0x5C, 0xF6]),
        "lifestyle" => ([0x06, 0x5F, 0x46], [0x10, 0xB9, 0x81]),
        "food" => ([0x92, 0x40, 0x0E], [0xF5, 0x9E, 0x0B]),
        "nature" => ([0x14, 0x53, 0x2D], [0x22, 0xC5, 0x5E]),
        _ => ([0x37, 0x41, 0x51], [0x6B, 0x72, 0x80]),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaceholderRenderer {
    quality: u8,
}

impl PlaceholderRenderer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for PlaceholderRenderer {
    fn default() -> Self {
        Self::new(95)
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round() as u8
}

impl Renderer for PlaceholderRenderer {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, GenerationError> {
        let (width, height) = (request.width, request.height);
        if width == 0 || height == 0 {
            return Err(GenerationError::Failed(format!(
                "cannot render {width}x{height} image"
            )));
        }

        let (bg, accent) = palette(&request.category);
        let seed = Sha256::digest(request.keyword.as_str().as_bytes())[0] as u32;
        let band_height = (height / 12).max(1);
        let band_top = (height - band_height) * seed / 255;

        let img = RgbImage::from_fn(width, height, |_, y| {
            if y >= band_top && y < band_top + band_height {
                return Rgb(accent);
            }
            let t = y as f32 / height as f32 * 0.5;
            Rgb([
                lerp(bg[0], accent[0], t),
                lerp(bg[1], accent[1], t),
                lerp(bg[2], accent[2], t),
            ])
        });

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| GenerationError::Failed(format!("JPEG encode failed: {e}")))?;
        Ok(out)
    }
}
