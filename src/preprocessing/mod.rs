//! Image preprocessing
//!
//! Deterministic image → tensor conversion in two variants:
//! - Normalized (per-channel mean/std) for inference
//! - Raw-scaled ([0, 1]) for the visualization underlay
//!
//! Both tensors are `1×3×R×R` and live on the engine device.

pub mod normalization;
pub mod tensor;

use crate::error::EngineError;
use candle_core::{Device, Tensor};
use image::RgbImage;
use normalization::ChannelNormalization;

/// Network-ready tensors for one image
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// Normalized input, shape (1, 3, R, R)
    pub normalized: Tensor,
    /// Unnormalized input in [0, 1], shape (1, 3, R, R)
    pub raw: Tensor,
    /// Side length R
    pub resolution: u32,
}

impl PreprocessedImage {
    /// Rebuild the R×R raster from the raw-scaled tensor
    pub fn visualization_underlay(&self) -> Result<RgbImage, EngineError> {
        let planes = self.raw.flatten_all()?.to_vec1::<f32>()?;
        tensor::from_planes(&planes, self.resolution, self.resolution).ok_or_else(|| {
            EngineError::InvalidInput("Raw tensor does not match the input resolution".to_string())
        })
    }
}

/// Preprocess a decoded image for inference
///
/// # Arguments
///
/// * `image` - Decoded RGB image of any size
/// * `resolution` - Side length R required by the primary backend
/// * `normalization` - Per-channel normalization constants
/// * `device` - Device the tensors are created on
///
/// # Errors
///
/// Returns `EngineError::InvalidImage` for an image without pixels and
/// `EngineError::InvalidInput` for a zero resolution.
pub fn preprocess(
    image: &RgbImage,
    resolution: u32,
    normalization: &ChannelNormalization,
    device: &Device,
) -> Result<PreprocessedImage, EngineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EngineError::InvalidImage("Image has no pixels".to_string()));
    }
    if resolution == 0 {
        return Err(EngineError::InvalidInput(
            "Input resolution must be positive".to_string(),
        ));
    }

    log::debug!(
        "Preprocessing {}x{} image to {}x{}",
        image.width(),
        image.height(),
        resolution,
        resolution
    );

    let resized = tensor::resize_square(image, resolution);
    let raw_planes = tensor::to_planes(&resized);
    let plane_len = (resolution * resolution) as usize;

    let mut normalized_planes = raw_planes.clone();
    normalization.apply(&mut normalized_planes, plane_len)?;

    let shape = (1, 3, resolution as usize, resolution as usize);
    let raw = Tensor::from_vec(raw_planes, shape, device)?;
    let normalized = Tensor::from_vec(normalized_planes, shape, device)?;

    Ok(PreprocessedImage {
        normalized,
        raw,
        resolution,
    })
}
