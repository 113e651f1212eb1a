//! Checks on rendered bytes before they reach the store.
//!
//! Image artifacts are always JPEG (`images/<slug>.jpg`). JPEG output is
//! accepted as-is after a header-only dimension read; PNG output is decoded
//! and re-encoded; anything else is rejected.

use super::backend::GenerationError;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// A rendered image that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    /// JPEG bytes.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Read `(width, height)` from encoded image bytes without decoding pixels.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), GenerationError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| GenerationError::InvalidImage(e.to_string()))
}

/// Validate rendered bytes and normalize them to JPEG.
pub fn prepare_image(
    bytes: Vec<u8>,
    min_width: u32,
    min_height: u32,
    quality: u8,
) -> Result<ValidatedImage, GenerationError> {
    let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    let invalid = |e: image::ImageError| GenerationError::InvalidImage(e.to_string());

    let check = |width: u32, height: u32| {
        if width < min_width || height < min_height {
            Err(GenerationError::InvalidImage(format!(
                "{width}x{height} is below the minimum {min_width}x{min_height}"
            )))
        } else {
            Ok(())
        }
    };

    match reader.format() {
        Some(ImageFormat::Jpeg) => {
            let (width, height) = reader.into_dimensions().map_err(invalid)?;
            check(width, height)?;
            Ok(ValidatedImage {
                bytes,
                width,
                height,
            })
        }
        Some(ImageFormat::Png) => {
            let rgb = reader.decode().map_err(invalid)?.to_rgb8();
            let (width, height) = rgb.dimensions();
            check(width, height)?;
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(invalid)?;
            Ok(ValidatedImage {
                bytes: jpeg,
                width,
                height,
            })
        }
        Some(other) => Err(GenerationError::InvalidImage(format!(
            "unsupported format {other:?}"
        ))),
        None => Err(GenerationError::InvalidImage(
            "unrecognized image data".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{tiny_jpeg, tiny_png};

    #[test]
    fn jpeg_passes_through_unchanged() {
        let jpeg = tiny_jpeg(40, 30);
        let validated = prepare_image(jpeg.clone(), 16, 16, 90).unwrap();
        assert_eq!(validated.bytes, jpeg);
        assert_eq!((validated.width, validated.height), (40, 30));
    }

    #[test]
    fn png_is_transcoded_to_jpeg() {
        let validated = prepare_image(tiny_png(20, 24), 16, 16, 90).unwrap();
        assert_eq!(&validated.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!((validated.width, validated.height), (20, 24));
    }

    #[test]
    fn too_small_is_rejected() {
        let err = prepare_image(tiny_jpeg(40, 10), 16, 16, 90).unwrap_err();
        assert!(err.to_string().contains("40x10 is below the minimum 16x16"));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = prepare_image(b"not an image".to_vec(), 1, 1, 90).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidImage(_)));
    }

    #[test]
    fn read_dimensions_from_header() {
        assert_eq!(read_dimensions(&tiny_jpeg(40, 30)).unwrap(), (40, 30));
        assert!(read_dimensions(b"nope").is_err());
    }

    #[test]
    fn empty_output_is_rejected() {
        assert!(prepare_image(Vec::new(), 1, 1, 90).is_err());
    }
}
