use image::{DynamicImage, ImageFormat};

use crate::error::ConvertError;

/// Raster formats accepted at the input boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Png,
    Jpeg,
    Bmp,
}

impl InputFormat {
    /// Identifies the format from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
        }
    }

    /// # Errors
    ///
    /// Returns [`ConvertError::UnsupportedImage`] when the payload is corrupt.
    pub fn decode(self, bytes: &[u8]) -> Result<DynamicImage, ConvertError> {
        image::load_from_memory_with_format(bytes, self.image_format())
            .map_err(|error| ConvertError::UnsupportedImage(format!("{self:?} decode failed: {error}")))
    }
}

/// Sniffs the format once and decodes with it.
///
/// # Errors
///
/// Returns [`ConvertError::UnsupportedImage`] for empty input, unknown
/// formats, or corrupt payloads.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::UnsupportedImage(
            "image data is empty".to_string(),
        ));
    }

    let format = InputFormat::sniff(bytes).ok_or_else(|| {
        ConvertError::UnsupportedImage("unrecognized image format (expected PNG, JPEG or BMP)".to_string())
    })?;
    format.decode(bytes)
}
