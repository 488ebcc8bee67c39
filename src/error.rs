//! Error types for the diagnostic inference engine

use thiserror::Error;

/// Errors that can occur while loading models or running a diagnosis
#[derive(Debug, Error)]
pub enum EngineError {
    /// The primary model could not be loaded; the engine must not serve requests
    #[error("Fatal initialization error: {0}")]
    FatalInitialization(String),

    /// Input bytes are not a decodable color image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// No loaded model could be used for prediction
    #[error("No model available: {0}")]
    NoModelAvailable(String),

    /// Grad-CAM hooks did not capture an activation or gradient
    #[error("Attribution capture failed: {0}")]
    AttributionCapture(String),

    /// A model file exists but could not be turned into a network
    #[error("Failed to load model '{name}': {reason}")]
    ModelLoad {
        /// Configured model name
        name: String,
        /// Underlying cause
        reason: String,
    },

    /// Configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed to an engine function
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tensor backend error
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error while rendering artifacts
    #[error("Encoding error: {0}")]
    Encoding(#[from] image::ImageError),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EngineError::InvalidImage("truncated PNG".to_string());
        assert_eq!(err.to_string(), "Invalid image: truncated PNG");

        let err = EngineError::ModelLoad {
            name: "resnet50".to_string(),
            reason: "missing tensor fc.1.weight".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load model 'resnet50': missing tensor fc.1.weight"
        );
    }
}
