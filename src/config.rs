//! Configuration parameters for the inference engine
//!
//! The defaults mirror the production deployment: an AlexNet primary at
//! weight 0.7 and a ResNet-50 auxiliary at weight 0.3, 227×227 input with the
//! ImageNet normalization constants, and 10 Monte-Carlo dropout passes.
//!
//! A configuration can also be read from TOML:
//!
//! ```
//! use ocular_triage::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     input_resolution = 224
//!
//!     [[models]]
//!     name = "resnet50"
//!     architecture = "resnet50"
//!     role = "primary"
//!     weights = "model/resnet50_best.safetensors"
//!     fusion_weight = 1.0
//! "#)?;
//!
//! assert_eq!(config.input_resolution, 224);
//! assert_eq!(config.models.len(), 1);
//! # Ok::<(), ocular_triage::EngineError>(())
//! ```

use crate::error::EngineError;
use crate::ml::network::Architecture;
use crate::preprocessing::normalization::ChannelNormalization;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Role of a model in the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Mandatory model; also the one instrumented for attribution
    Primary,
    /// Optional ensemble member, skipped when unavailable
    Auxiliary,
}

/// One configured classifier backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Unique name used in logs and audit output
    pub name: String,

    /// Network architecture the weights belong to
    pub architecture: Architecture,

    /// Primary or auxiliary
    pub role: ModelRole,

    /// Path to the safetensors weights file
    pub weights: PathBuf,

    /// Static fusion weight (>= 0)
    pub fusion_weight: f32,

    /// Dropout probability in front of the classification layer(s)
    ///
    /// 0.0 builds a head without dropout (plain torchvision naming for ResNet),
    /// which also means Monte-Carlo dropout has nothing to resample.
    #[serde(default = "default_head_dropout")]
    pub head_dropout: f32,
}

fn default_head_dropout() -> f32 {
    0.5
}

/// Monte-Carlo dropout parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McDropoutConfig {
    /// Number of stochastic forward passes (default: 10, minimum 2)
    pub samples: usize,

    /// Seed for the dropout masks (default: None = seeded from entropy)
    ///
    /// With a fixed seed two runs on the same input give identical results.
    pub seed: Option<u64>,
}

impl Default for McDropoutConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            seed: None,
        }
    }
}

/// Grad-CAM rendering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Generate heatmaps at all (default: true)
    pub enabled: bool,

    /// Weight of the original image in the overlay (default: 0.4)
    pub original_weight: f32,

    /// Weight of the color-mapped heatmap in the overlay (default: 0.6)
    pub heatmap_weight: f32,

    /// Range below which the raw map is treated as constant (default: 1e-8)
    pub epsilon: f32,

    /// Gap in pixels between the panels of the comparison image (default: 10)
    pub panel_gap: u32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            original_weight: 0.4,
            heatmap_weight: 0.6,
            epsilon: 1e-8,
            panel_gap: 10,
        }
    }
}

/// Thresholds used to flag predictions for closer human review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    /// Confidence below this raises `LowConfidence` (default: 0.6)
    pub low_confidence_threshold: f32,

    /// Confidence at or above this counts as high (default: 0.85)
    pub high_confidence_threshold: f32,

    /// Uncertainty above this raises `HighUncertainty` (default: 0.05, None disables)
    pub high_uncertainty_threshold: Option<f32>,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.6,
            high_confidence_threshold: 0.85,
            high_uncertainty_threshold: Some(0.05),
        }
    }
}

/// Compute device selection, resolved once when the engine starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    /// Always run on the CPU
    #[default]
    Cpu,
    /// First CUDA device when available, CPU otherwise
    Auto,
    /// A specific CUDA device (fails if unavailable)
    Cuda(usize),
}

/// Engine configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Preprocessing
    /// Side length R of the square network input (default: 227)
    pub input_resolution: u32,

    /// Per-channel normalization constants (default: ImageNet)
    pub normalization: ChannelNormalization,

    // Models
    /// Configured roster; exactly one entry must be primary
    pub models: Vec<ModelSpec>,

    /// Device to load models on (default: CPU)
    pub device: DeviceSelection,

    // Uncertainty
    /// Monte-Carlo dropout parameters
    pub mc_dropout: McDropoutConfig,

    // Attribution
    /// Grad-CAM parameters
    pub attribution: AttributionConfig,

    // Review
    /// Review thresholds
    pub review: ReviewPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_resolution: 227,
            normalization: ChannelNormalization::imagenet(),
            models: vec![
                ModelSpec {
                    name: "alexnet".to_string(),
                    architecture: Architecture::AlexNet,
                    role: ModelRole::Primary,
                    weights: PathBuf::from("model/retina_alexnet_state.safetensors"),
                    fusion_weight: 0.7,
                    head_dropout: 0.5,
                },
                ModelSpec {
                    name: "resnet50".to_string(),
                    architecture: Architecture::ResNet50,
                    role: ModelRole::Auxiliary,
                    weights: PathBuf::from("model/resnet50_best.safetensors"),
                    fusion_weight: 0.3,
                    head_dropout: 0.5,
                },
            ],
            device: DeviceSelection::Cpu,
            mc_dropout: McDropoutConfig::default(),
            attribution: AttributionConfig::default(),
            review: ReviewPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    ///
    /// Missing fields take their default values. The result is validated.
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    ///
    /// Relative weight paths are resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        log::debug!("Loading engine configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            for spec in &mut config.models {
                if spec.weights.is_relative() {
                    spec.weights = base.join(&spec.weights);
                }
            }
        }
        Ok(config)
    }

    /// The single primary model spec
    pub fn primary(&self) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.role == ModelRole::Primary)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if:
    /// - There is not exactly one primary model
    /// - A fusion weight is negative or not finite
    /// - Model names are not unique
    /// - A dropout probability is outside [0, 1)
    /// - The input resolution or MC sample count is too small
    /// - Overlay weights are negative
    pub fn validate(&self) -> Result<(), EngineError> {
        let primaries = self
            .models
            .iter()
            .filter(|m| m.role == ModelRole::Primary)
            .count();
        if primaries != 1 {
            return Err(EngineError::InvalidConfig(format!(
                "Exactly one primary model is required, found {}",
                primaries
            )));
        }

        let mut names = HashSet::new();
        for spec in &self.models {
            if !names.insert(spec.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "Duplicate model name '{}'",
                    spec.name
                )));
            }
            if !spec.fusion_weight.is_finite() || spec.fusion_weight < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "Fusion weight of '{}' must be a finite value >= 0, got {}",
                    spec.name, spec.fusion_weight
                )));
            }
            if !(0.0..1.0).contains(&spec.head_dropout) {
                return Err(EngineError::InvalidConfig(format!(
                    "Dropout probability of '{}' must be in [0, 1), got {}",
                    spec.name, spec.head_dropout
                )));
            }
        }

        let min_resolution = self
            .models
            .iter()
            .map(|m| m.architecture.min_input_resolution())
            .max()
            .unwrap_or(1);
        if (self.input_resolution as usize) < min_resolution {
            return Err(EngineError::InvalidConfig(format!(
                "Input resolution {} is below the minimum of {} for the configured architectures",
                self.input_resolution, min_resolution
            )));
        }

        if self.mc_dropout.samples < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "Monte-Carlo dropout needs at least 2 samples, got {}",
                self.mc_dropout.samples
            )));
        }

        if self.attribution.original_weight < 0.0 || self.attribution.heatmap_weight < 0.0 {
            return Err(EngineError::InvalidConfig(
                "Overlay weights must be non-negative".to_string(),
            ));
        }

        self.normalization.validate()
    }
}
