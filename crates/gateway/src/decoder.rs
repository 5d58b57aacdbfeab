//! Upload validation and image decoding.

use image::{DynamicImage, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("failed to read image bytes: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Decode(#[from] image::ImageError),
}

/// A decoded upload in 3-channel RGB, whatever the source encoding was.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: RgbImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Case-sensitive prefix check on the declared type. The bytes themselves are
/// only checked by decoding.
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

pub fn decode(bytes: &[u8], content_type: &str) -> Result<DecodedImage, DecodeError> {
    if !is_image_content_type(content_type) {
        return Err(DecodeError::UnsupportedContentType(content_type.to_string()));
    }

    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;

    let image = match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.into_rgb8(),
    };

    Ok(DecodedImage { image })
}
