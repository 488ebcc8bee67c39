//! Diagnostic engine facade
//!
//! Owns the model registry and runs the per-request pipeline:
//!
//! ```text
//! bytes → decode → preprocess → ensemble → uncertainty → attribution → review
//! ```
//!
//! Decoding, preprocessing and the ensemble prediction fail the request.
//! Uncertainty and attribution are optional stages: their failures are logged,
//! the field is left empty and a review flag is raised.

use crate::analysis::confidence::{compute_review_flags, ConfidenceLevel, StageOutcome};
use crate::analysis::metadata::InferenceMetadata;
use crate::analysis::result::{ConfidenceSource, PredictionResult};
use crate::attribution::{self, AttributionArtifact};
use crate::config::{DeviceSelection, EngineConfig, ModelRole};
use crate::error::EngineError;
use crate::io::decoder::{decode_image, decode_image_file};
use crate::ml::ensemble::predict_ensemble;
use crate::ml::registry::{ModelDescriptor, ModelRegistry};
use crate::ml::uncertainty::{estimate_uncertainty, UncertaintyEstimate};
use crate::preprocessing::preprocess;
use candle_core::Device;
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Per-request options
#[derive(Debug, Clone)]
pub struct PredictOptions {
    /// Generate the Grad-CAM artifact (also requires `attribution.enabled`)
    pub attribution: bool,
    /// Distribution the reported class and confidence come from
    pub confidence_source: ConfidenceSource,
    /// Include per-model distributions in the result
    pub keep_per_model: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            attribution: true,
            confidence_source: ConfidenceSource::Deterministic,
            keep_per_model: true,
        }
    }
}

/// Result of one engine call
#[derive(Debug, Clone)]
pub struct Diagnosis {
    /// Prediction with uncertainty and review flags
    pub prediction: PredictionResult,
    /// Heatmap artifact, absent when disabled or when attribution failed
    pub attribution: Option<AttributionArtifact>,
}

/// Readiness snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// Whether predictions are served
    pub ready: bool,
    /// Whether the primary model is loaded
    pub primary_loaded: bool,
    /// Loaded auxiliary models
    pub auxiliary_loaded: usize,
    /// Configured auxiliary models
    pub auxiliary_configured: usize,
    /// Device the models run on
    pub device: String,
    /// Initialization failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Configured models with their load status
    pub roster: Vec<ModelDescriptor>,
}

#[derive(Debug)]
enum EngineState {
    Ready(ModelRegistry),
    Failed(String),
}

/// Diagnostic inference engine
///
/// Shareable across threads; every call is synchronous.
///
/// # Example
///
/// ```no_run
/// use ocular_triage::{DiagnosticEngine, EngineConfig};
///
/// let engine = DiagnosticEngine::try_new(EngineConfig::default())?;
/// let bytes = std::fs::read("eye.jpg")?;
/// let diagnosis = engine.predict(&bytes)?;
///
/// println!(
///     "{} ({:.1}%)",
///     diagnosis.prediction.predicted_class,
///     diagnosis.prediction.confidence * 100.0
/// );
/// # Ok::<(), ocular_triage::EngineError>(())
/// ```
#[derive(Debug)]
pub struct DiagnosticEngine {
    config: EngineConfig,
    device: Device,
    state: EngineState,
}

/// Resolve the configured device
pub fn resolve_device(selection: DeviceSelection) -> Result<Device, EngineError> {
    let device = match selection {
        DeviceSelection::Cpu => Device::Cpu,
        DeviceSelection::Auto => Device::cuda_if_available(0)?,
        DeviceSelection::Cuda(ordinal) => Device::new_cuda(ordinal)?,
    };
    log::debug!("Using device {:?}", device);
    Ok(device)
}

fn device_name(device: &Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        other => format!("{:?}", other.location()).to_lowercase(),
    }
}

impl DiagnosticEngine {
    /// Start the engine, failing if the primary model cannot be loaded
    ///
    /// # Errors
    ///
    /// Returns `EngineError::FatalInitialization` when the device or the primary
    /// model is unavailable, and `EngineError::InvalidConfig` for an
    /// inconsistent configuration.
    pub fn try_new(config: EngineConfig) -> Result<Self, EngineError> {
        let device = resolve_device(config.device)
            .map_err(|e| EngineError::FatalInitialization(format!("Device unavailable: {}", e)))?;
        let registry = ModelRegistry::load(&config, &device)?;
        Ok(Self {
            config,
            device,
            state: EngineState::Ready(registry),
        })
    }

    /// Start the engine, keeping it in a not-ready state on failure
    ///
    /// Every prediction on a not-ready engine returns
    /// `EngineError::FatalInitialization` without attempting inference.
    pub fn new(config: EngineConfig) -> Self {
        match Self::try_new(config.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Engine is not ready: {}", e);
                Self {
                    config,
                    device: Device::Cpu,
                    state: EngineState::Failed(e.to_string()),
                }
            }
        }
    }

    /// Wrap an already built registry
    pub fn from_registry(config: EngineConfig, registry: ModelRegistry) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            device: registry.device().clone(),
            config,
            state: EngineState::Ready(registry),
        })
    }

    /// Whether predictions are served
    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    /// Readiness snapshot for health endpoints and logs
    pub fn health(&self) -> EngineHealth {
        match &self.state {
            EngineState::Ready(registry) => EngineHealth {
                ready: true,
                primary_loaded: registry.primary_model().is_some(),
                auxiliary_loaded: registry.auxiliary_loaded(),
                auxiliary_configured: registry.auxiliary_configured(),
                device: device_name(&self.device),
                failure: None,
                roster: registry.roster().to_vec(),
            },
            EngineState::Failed(reason) => EngineHealth {
                ready: false,
                primary_loaded: false,
                auxiliary_loaded: 0,
                auxiliary_configured: self
                    .config
                    .models
                    .iter()
                    .filter(|m| m.role == ModelRole::Auxiliary)
                    .count(),
                device: device_name(&self.device),
                failure: Some(reason.clone()),
                roster: Vec::new(),
            },
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Model registry of a ready engine
    pub fn registry(&self) -> Result<&ModelRegistry, EngineError> {
        match &self.state {
            EngineState::Ready(registry) => Ok(registry),
            EngineState::Failed(reason) => Err(EngineError::FatalInitialization(reason.clone())),
        }
    }

    /// Diagnose encoded image bytes with default options
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Diagnosis, EngineError> {
        self.predict_with(image_bytes, &PredictOptions::default())
    }

    /// Diagnose encoded image bytes
    ///
    /// # Errors
    ///
    /// - `EngineError::FatalInitialization` on a not-ready engine
    /// - `EngineError::InvalidImage` for undecodable bytes
    /// - `EngineError::NoModelAvailable` if the ensemble cannot run
    pub fn predict_with(&self, image_bytes: &[u8], options: &PredictOptions) -> Result<Diagnosis, EngineError> {
        let registry = self.registry()?;
        let start = Instant::now();
        let image = decode_image(image_bytes)?;
        self.diagnose(registry, &image, options, start)
    }

    /// Diagnose an image file
    pub fn predict_file<P: AsRef<Path>>(&self, path: P, options: &PredictOptions) -> Result<Diagnosis, EngineError> {
        let registry = self.registry()?;
        let start = Instant::now();
        let image = decode_image_file(path)?;
        self.diagnose(registry, &image, options, start)
    }

    /// Diagnose an already decoded image
    pub fn predict_image(&self, image: &RgbImage, options: &PredictOptions) -> Result<Diagnosis, EngineError> {
        let registry = self.registry()?;
        self.diagnose(registry, image, options, Instant::now())
    }

    fn diagnose(
        &self,
        registry: &ModelRegistry,
        image: &RgbImage,
        options: &PredictOptions,
        start: Instant,
    ) -> Result<Diagnosis, EngineError> {
        let config = &self.config;
        log::debug!("Diagnosing {}x{} image", image.width(), image.height());

        // Preprocessing and prediction are mandatory
        let input = preprocess(
            image,
            config.input_resolution,
            &config.normalization,
            registry.device(),
        )?;
        let ensemble = predict_ensemble(registry, &input.normalized)?;

        let uncertainty =
            match estimate_uncertainty(registry, &input.normalized, &ensemble, &config.mc_dropout) {
                Ok(estimate) => estimate,
                Err(e) => {
                    log::warn!("Uncertainty estimation failed, continuing without it: {}", e);
                    UncertaintyEstimate::default()
                }
            };

        let (predicted_class, confidence, confidence_source) =
            match (options.confidence_source, uncertainty.smoothed.as_ref()) {
                (ConfidenceSource::McSmoothed, Some(smoothed)) => {
                    let (class, p) = smoothed.argmax();
                    (class, p, ConfidenceSource::McSmoothed)
                }
                _ => (
                    ensemble.predicted_class,
                    ensemble.confidence,
                    ConfidenceSource::Deterministic,
                ),
            };

        let attribution_requested = options.attribution && config.attribution.enabled;
        let attribution = if attribution_requested {
            let artifact = registry.primary().and_then(|primary| {
                attribution::explain(
                    primary,
                    &input,
                    predicted_class,
                    image,
                    &config.attribution,
                )
            });
            match artifact {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    log::warn!("Attribution failed, returning prediction without heatmap: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let outcome = StageOutcome {
            confidence,
            uncertainty: uncertainty.value,
            uncertainty_attempted: true,
            models_unavailable: registry.unavailable(),
            attribution_requested,
            attribution_present: attribution.is_some(),
        };
        let flags = compute_review_flags(&outcome, &config.review);

        let processing_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        log::debug!(
            "Predicted {} ({:.3}) in {:.1} ms",
            predicted_class,
            confidence,
            processing_time_ms
        );

        let metadata = InferenceMetadata {
            models_used: ensemble
                .per_model
                .iter()
                .map(|m| m.model.clone())
                .collect(),
            models_unavailable: registry.unavailable(),
            input_resolution: config.input_resolution,
            image_width: image.width(),
            image_height: image.height(),
            mc_samples: uncertainty.samples,
            processing_time_ms,
            ..InferenceMetadata::default()
        };

        let prediction = PredictionResult {
            predicted_class,
            confidence,
            confidence_level: ConfidenceLevel::from_confidence(confidence, &config.review),
            uncertainty: uncertainty.value,
            uncertainty_method: uncertainty.method,
            confidence_source,
            distribution: ensemble.distribution,
            smoothed_distribution: uncertainty.smoothed,
            per_model_distributions: options.keep_per_model.then_some(ensemble.per_model),
            flags,
            metadata,
        };

        Ok(Diagnosis {
            prediction,
            attribution,
        })
    }
}
