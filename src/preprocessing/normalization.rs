//! Per-channel input normalization
//!
//! Classifiers are trained on inputs scaled to [0, 1] and then standardized per
//! color channel: `x' = (x - mean[c]) / std[c]`. The published ImageNet constants
//! are the default.
//!
//! # Example
//!
//! ```
//! use ocular_triage::preprocessing::normalization::ChannelNormalization;
//!
//! let norm = ChannelNormalization::imagenet();
//! // One pixel per channel, planar RGB
//! let mut planes = vec![0.485f32, 0.456, 0.406];
//! norm.apply(&mut planes, 1)?;
//! assert!(planes.iter().all(|v| v.abs() < 1e-6));
//! # Ok::<(), ocular_triage::EngineError>(())
//! ```

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Mean/standard-deviation normalization constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelNormalization {
    /// Per-channel mean (RGB)
    pub mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub std: [f32; 3],
}

impl Default for ChannelNormalization {
    fn default() -> Self {
        Self::imagenet()
    }
}

impl ChannelNormalization {
    /// ImageNet constants
    pub fn imagenet() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Ensure every standard deviation is finite and positive
    pub fn validate(&self) -> Result<(), EngineError> {
        for (c, (&m, &s)) in self.mean.iter().zip(self.std.iter()).enumerate() {
            if !m.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "Normalization mean of channel {} is not finite",
                    c
                )));
            }
            if !s.is_finite() || s <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "Normalization std of channel {} must be positive, got {}",
                    c, s
                )));
            }
        }
        Ok(())
    }

    /// Normalize planar (C×H×W) RGB data in place
    ///
    /// # Arguments
    ///
    /// * `planes` - Three consecutive channel planes of `plane_len` values each
    /// * `plane_len` - Pixels per channel (H·W)
    pub fn apply(&self, planes: &mut [f32], plane_len: usize) -> Result<(), EngineError> {
        if planes.len() != 3 * plane_len {
            return Err(EngineError::InvalidInput(format!(
                "Expected {} values for 3 planes of {}, got {}",
                3 * plane_len,
                plane_len,
                planes.len()
            )));
        }
        self.validate()?;

        for (c, plane) in planes.chunks_mut(plane_len.max(1)).enumerate().take(3) {
            let mean = self.mean[c];
            let inv_std = 1.0 / self.std[c];
            for v in plane.iter_mut() {
                *v = (*v - mean) * inv_std;
            }
        }
        Ok(())
    }
}
