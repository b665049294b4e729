//! Image encoding: staged image file → base64 data URL for the request body.
//!
//! Vision endpoints accept images inline as `data:image/<fmt>;base64,...`.
//! JPEG and PNG files are sent byte-for-byte; any other format is decoded
//! and re-encoded as lossless PNG. Only the encoded bytes leave the
//! process, never the file path.

use crate::error::OcrError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A base64 payload ready to be placed in an `image_url` content part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// `jpeg` or `png`.
    pub format: &'static str,
    pub base64: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:image/{};base64,{}", self.format, self.base64)
    }
}

/// Read and encode an image file.
pub fn encode_image_file(path: &Path) -> Result<EncodedImage, OcrError> {
    let bytes = std::fs::read(path).map_err(|e| OcrError::ImageFile {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    encode_image_bytes(&bytes).map_err(|detail| OcrError::ImageFile {
        path: path.to_path_buf(),
        detail,
    })
}

/// Encode image bytes, keeping JPEG and PNG as they are.
pub fn encode_image_bytes(bytes: &[u8]) -> Result<EncodedImage, String> {
    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;
    let encoded = match format {
        ImageFormat::Jpeg => EncodedImage {
            format: "jpeg",
            base64: STANDARD.encode(bytes),
        },
        ImageFormat::Png => EncodedImage {
            format: "png",
            base64: STANDARD.encode(bytes),
        },
        other => {
            let img = image::load_from_memory_with_format(bytes, other)
                .map_err(|e| e.to_string())?;
            let png = png_bytes(&img).map_err(|e| e.to_string())?;
            EncodedImage {
                format: "png",
                base64: STANDARD.encode(png),
            }
        }
    };
    debug!(
        "Encoded {:?} image → {} bytes base64 ({})",
        format,
        encoded.base64.len(),
        encoded.format
    );
    Ok(encoded)
}

/// Lossless PNG bytes for an in-memory image.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
