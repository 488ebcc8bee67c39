//! Image decoding using the `image` crate

use crate::error::EngineError;
use image::RgbImage;
use std::path::Path;

/// Decode image bytes into an 8-bit RGB raster
///
/// The container format is sniffed from the bytes. Grayscale, alpha and 16-bit
/// images are converted to 8-bit RGB.
///
/// # Errors
///
/// Returns `EngineError::InvalidImage` if the bytes are empty, not a supported
/// image, or decode to an image without pixels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::InvalidImage("Empty image data".to_string()));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| EngineError::InvalidImage(format!("Cannot decode image: {}", e)))?;

    log::debug!(
        "Decoded {}x{} image ({:?})",
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(EngineError::InvalidImage("Image has no pixels".to_string()));
    }
    Ok(rgb)
}

/// Read and decode an image file
pub fn decode_image_file<P: AsRef<Path>>(path: P) -> Result<RgbImage, EngineError> {
    let path = path.as_ref();
    log::debug!("Decoding image file: {}", path.display());
    let bytes = std::fs::read(path)?;
    decode_image(&bytes)
}
