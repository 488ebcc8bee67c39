//! # Ocular Triage
//!
//! Diagnostic inference engine for ocular photographs. A single image is
//! classified by a weighted ensemble of convolutional networks, the prediction
//! is annotated with an uncertainty estimate, and a Grad-CAM heatmap shows
//! which regions drove it.
//!
//! ## Features
//!
//! - **Ensemble fusion**: softmax outputs of a primary and optional auxiliary
//!   models combined with static fusion weights
//! - **Uncertainty**: cross-model variance, or Monte-Carlo dropout with a
//!   single model
//! - **Attribution**: Grad-CAM with scoped capture hooks, jet color map and a
//!   three-panel comparison PNG
//! - **Review flags**: low confidence, high uncertainty, degraded ensemble
//!
//! ## Quick Start
//!
//! ```no_run
//! use ocular_triage::{DiagnosticEngine, EngineConfig};
//!
//! let engine = DiagnosticEngine::try_new(EngineConfig::from_file("engine.toml")?)?;
//! let diagnosis = engine.predict(&std::fs::read("eye.jpg")?)?;
//!
//! let prediction = &diagnosis.prediction;
//! println!("{} (confidence: {:.2})", prediction.predicted_class, prediction.confidence);
//! println!("{}", prediction.recommendation());
//! # Ok::<(), ocular_triage::EngineError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Image bytes → Decode → Preprocessing → Ensemble → Uncertainty → Attribution → Review
//! ```
//!
//! Decoding, preprocessing and the ensemble are mandatory stages; uncertainty
//! and attribution degrade to absent values plus a review flag.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod attribution;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod ml;
pub mod preprocessing;

// Re-export main types
pub use analysis::confidence::ConfidenceLevel;
pub use analysis::labels::ClassLabel;
pub use analysis::result::{
    ClassDistribution, ConfidenceSource, ModelDistribution, PredictionResult, ReviewFlag,
    UncertaintyMethod,
};
pub use attribution::AttributionArtifact;
pub use config::{EngineConfig, ModelRole, ModelSpec};
pub use engine::{Diagnosis, DiagnosticEngine, EngineHealth, PredictOptions};
pub use error::EngineError;
pub use io::artifact_store::ArtifactStore;
pub use ml::network::Architecture;
pub use ml::registry::{LoadStatus, ModelDescriptor, ModelRegistry};
