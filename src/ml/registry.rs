//! Model registry
//!
//! Built once at engine start from the configured roster and immutable
//! afterwards. The primary model is mandatory; auxiliaries are loaded
//! opportunistically and recorded as missing or failed otherwise.

use super::network::{Architecture, Network};
use crate::config::{EngineConfig, ModelRole, ModelSpec};
use crate::error::EngineError;
use candle_core::Device;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of loading one configured model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LoadStatus {
    /// Weights loaded and usable
    Loaded,
    /// Weights file absent
    Missing,
    /// Weights present but unusable
    Failed(String),
}

impl LoadStatus {
    /// Whether the model can be used for inference
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded)
    }
}

/// Registry entry for one configured model
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    /// Configured name
    pub name: String,
    /// Primary or auxiliary
    pub role: ModelRole,
    /// Architecture the weights were loaded into
    pub architecture: Architecture,
    /// Weights file
    pub weights: PathBuf,
    /// Static fusion weight
    pub fusion_weight: f32,
    /// Load outcome
    pub load_status: LoadStatus,
}

impl ModelDescriptor {
    fn from_spec(spec: &ModelSpec, load_status: LoadStatus) -> Self {
        Self {
            name: spec.name.clone(),
            role: spec.role,
            architecture: spec.architecture,
            weights: spec.weights.clone(),
            fusion_weight: spec.fusion_weight,
            load_status,
        }
    }
}

/// A usable model: its descriptor and the shared network
#[derive(Debug, Clone)]
pub struct LoadedModel {
    /// Registry entry
    pub descriptor: ModelDescriptor,
    /// Shared read-only network
    pub network: Arc<Network>,
}

/// Immutable snapshot of the configured models
#[derive(Debug)]
pub struct ModelRegistry {
    loaded: Vec<LoadedModel>,
    roster: Vec<ModelDescriptor>,
    device: Device,
}

impl ModelRegistry {
    /// Load every configured model
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration (validated here)
    /// * `device` - Device the weights are placed on
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for an inconsistent roster and
    /// `EngineError::FatalInitialization` if the primary model cannot be
    /// loaded or the loaded fusion weights sum to zero. Auxiliary failures are
    /// recorded in the roster instead.
    pub fn load(config: &EngineConfig, device: &Device) -> Result<Self, EngineError> {
        config.validate()?;

        let mut loaded = Vec::new();
        let mut roster = Vec::new();

        // Primary first so it leads both lists
        let mut specs: Vec<&ModelSpec> = config.models.iter().collect();
        specs.sort_by_key(|s| s.role != ModelRole::Primary);

        for spec in specs {
            let primary = spec.role == ModelRole::Primary;
            match load_spec(spec, device) {
                Ok(Some(network)) => {
                    log::debug!("Loaded model '{}' ({})", spec.name, spec.architecture);
                    let descriptor = ModelDescriptor::from_spec(spec, LoadStatus::Loaded);
                    roster.push(descriptor.clone());
                    loaded.push(LoadedModel {
                        descriptor,
                        network: Arc::new(network),
                    });
                }
                Ok(None) if primary => {
                    let err = EngineError::FatalInitialization(format!(
                        "Primary model '{}' unavailable: weights not found at {}",
                        spec.name,
                        spec.weights.display()
                    ));
                    log::error!("{}", err);
                    return Err(err);
                }
                Ok(None) => {
                    log::debug!(
                        "Auxiliary model '{}' not found at {}, continuing without it",
                        spec.name,
                        spec.weights.display()
                    );
                    roster.push(ModelDescriptor::from_spec(spec, LoadStatus::Missing));
                }
                Err(err) if primary => {
                    let err =
                        EngineError::FatalInitialization(format!("Primary model unavailable: {}", err));
                    log::error!("{}", err);
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("{}, continuing without it", err);
                    let reason = match err {
                        EngineError::ModelLoad { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    roster.push(ModelDescriptor::from_spec(spec, LoadStatus::Failed(reason)));
                }
            }
        }

        let registry = Self::from_parts(loaded, roster, device.clone())?;
        log::info!(
            "Model registry ready: {} of {} models loaded ({} auxiliary unavailable)",
            registry.loaded.len(),
            registry.roster.len(),
            registry.unavailable()
        );
        Ok(registry)
    }

    /// Build a registry from networks that are already in memory
    ///
    /// The first entry is the primary; the rest are auxiliaries. Useful for
    /// embedding callers that manage weights themselves.
    pub fn from_networks(
        models: Vec<(String, f32, Network)>,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let mut loaded = Vec::with_capacity(models.len());
        for (i, (name, fusion_weight, network)) in models.into_iter().enumerate() {
            if !fusion_weight.is_finite() || fusion_weight < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "Fusion weight of '{}' must be a finite value >= 0, got {}",
                    name, fusion_weight
                )));
            }
            let descriptor = ModelDescriptor {
                name,
                role: if i == 0 {
                    ModelRole::Primary
                } else {
                    ModelRole::Auxiliary
                },
                architecture: network.architecture(),
                weights: PathBuf::new(),
                fusion_weight,
                load_status: LoadStatus::Loaded,
            };
            loaded.push(LoadedModel {
                descriptor,
                network: Arc::new(network),
            });
        }
        let roster = loaded.iter().map(|m| m.descriptor.clone()).collect();
        Self::from_parts(loaded, roster, device.clone())
    }

    fn from_parts(
        loaded: Vec<LoadedModel>,
        roster: Vec<ModelDescriptor>,
        device: Device,
    ) -> Result<Self, EngineError> {
        if loaded.is_empty() {
            return Err(EngineError::FatalInitialization(
                "No primary model was provided".to_string(),
            ));
        }
        let weight_sum: f32 = loaded.iter().map(|m| m.descriptor.fusion_weight).sum();
        if weight_sum <= 0.0 {
            let err = EngineError::FatalInitialization(
                "Fusion weights of the loaded models sum to zero".to_string(),
            );
            log::error!("{}", err);
            return Err(err);
        }
        Ok(Self {
            loaded,
            roster,
            device,
        })
    }

    /// Loaded models, primary first, in configuration order otherwise
    pub fn loaded_models(&self) -> &[LoadedModel] {
        &self.loaded
    }

    /// The primary model
    pub fn primary_model(&self) -> Option<&LoadedModel> {
        self.loaded
            .first()
            .filter(|m| m.descriptor.role == ModelRole::Primary)
    }

    /// The primary network
    pub fn primary(&self) -> Result<&Arc<Network>, EngineError> {
        self.primary_model().map(|m| &m.network).ok_or_else(|| {
            EngineError::NoModelAvailable("Registry holds no primary model".to_string())
        })
    }

    /// Every configured model with its load status
    pub fn roster(&self) -> &[ModelDescriptor] {
        &self.roster
    }

    /// Loaded auxiliary models
    pub fn auxiliary_loaded(&self) -> usize {
        self.loaded
            .iter()
            .filter(|m| m.descriptor.role == ModelRole::Auxiliary)
            .count()
    }

    /// Configured auxiliary models
    pub fn auxiliary_configured(&self) -> usize {
        self.roster
            .iter()
            .filter(|d| d.role == ModelRole::Auxiliary)
            .count()
    }

    /// Configured models that are not loaded
    pub fn unavailable(&self) -> usize {
        self.roster.len() - self.loaded.len()
    }

    /// Device all models live on
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Load one configured model; `None` when its weights file does not exist
fn load_spec(spec: &ModelSpec, device: &Device) -> Result<Option<Network>, EngineError> {
    if !spec.weights.is_file() {
        return Ok(None);
    }
    Network::from_safetensors(&spec.weights, spec.architecture, spec.head_dropout, device)
        .map(Some)
        .map_err(|e| EngineError::ModelLoad {
            name: spec.name.clone(),
            reason: e.to_string(),
        })
}
