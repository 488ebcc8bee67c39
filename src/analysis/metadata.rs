//! Inference metadata structures

use serde::Serialize;

/// Inference metadata
#[derive(Debug, Clone, Serialize)]
pub struct InferenceMetadata {
    /// Engine version
    pub engine_version: String,

    /// Names of the models that contributed to the fused distribution
    pub models_used: Vec<String>,

    /// Number of auxiliary models configured but not loaded
    pub models_unavailable: usize,

    /// Side length of the network input in pixels
    pub input_resolution: u32,

    /// Original image width in pixels
    pub image_width: u32,

    /// Original image height in pixels
    pub image_height: u32,

    /// Stochastic passes run for Monte-Carlo dropout (0 when not used)
    pub mc_samples: usize,

    /// Processing time in milliseconds
    pub processing_time_ms: f32,
}

impl Default for InferenceMetadata {
    fn default() -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            models_used: vec![],
            models_unavailable: 0,
            input_resolution: 0,
            image_width: 0,
            image_height: 0,
            mc_samples: 0,
            processing_time_ms: 0.0,
        }
    }
}
