//! Prediction result types

use super::confidence::ConfidenceLevel;
use super::labels::ClassLabel;
use super::metadata::InferenceMetadata;
use crate::error::EngineError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

/// Probability distribution over the closed label set
///
/// Values are stored in classifier output order. A distribution is only ever
/// built from validated probabilities: every entry lies in [0, 1] and the
/// entries sum to 1. Inputs within [`ClassDistribution::SUM_TOLERANCE`] of 1 are
/// accepted and re-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
    probabilities: [f32; ClassLabel::COUNT],
}

impl ClassDistribution {
    /// Accepted deviation of the probability sum from 1.0
    pub const SUM_TOLERANCE: f32 = 1e-3;

    /// Sum deviation above which accepted inputs are rescaled to sum to 1
    const RENORMALIZE_ABOVE: f32 = 1e-6;

    /// Build a distribution from probabilities in classifier output order
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` if the slice has the wrong length,
    /// contains non-finite or out-of-range values, or does not sum to 1.
    pub fn from_probabilities(values: &[f32]) -> Result<Self, EngineError> {
        if values.len() != ClassLabel::COUNT {
            return Err(EngineError::InvalidInput(format!(
                "Distribution must have {} entries, got {}",
                ClassLabel::COUNT,
                values.len()
            )));
        }

        let mut probabilities = [0.0f32; ClassLabel::COUNT];
        for (i, &p) in values.iter().enumerate() {
            if !p.is_finite() || p < -Self::SUM_TOLERANCE || p > 1.0 + Self::SUM_TOLERANCE {
                return Err(EngineError::InvalidInput(format!(
                    "Probability for '{}' out of range: {}",
                    ClassLabel::ALL[i],
                    p
                )));
            }
            probabilities[i] = p.clamp(0.0, 1.0);
        }

        let total: f32 = probabilities.iter().sum();
        if (total - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(EngineError::InvalidInput(format!(
                "Probabilities must sum to 1.0, got {:.6}",
                total
            )));
        }
        if (total - 1.0).abs() > Self::RENORMALIZE_ABOVE {
            for p in probabilities.iter_mut() {
                *p /= total;
            }
        }

        Ok(Self { probabilities })
    }

    /// Uniform distribution (maximum ignorance)
    #[cfg(test)]
    pub(crate) fn uniform() -> Self {
        Self {
            probabilities: [1.0 / ClassLabel::COUNT as f32; ClassLabel::COUNT],
        }
    }

    /// Probability assigned to `label`
    pub fn probability(&self, label: ClassLabel) -> f32 {
        self.probabilities[label.index()]
    }

    /// Probabilities in classifier output order
    pub fn as_slice(&self) -> &[f32] {
        &self.probabilities
    }

    /// Iterate `(label, probability)` pairs in classifier output order
    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, f32)> + '_ {
        ClassLabel::ALL
            .iter()
            .copied()
            .zip(self.probabilities.iter().copied())
    }

    /// Most probable label and its probability
    ///
    /// Ties resolve to the label with the lowest output index.
    pub fn argmax(&self) -> (ClassLabel, f32) {
        let mut best = 0;
        for i in 1..ClassLabel::COUNT {
            if self.probabilities[i] > self.probabilities[best] {
                best = i;
            }
        }
        (ClassLabel::ALL[best], self.probabilities[best])
    }

    /// Sum of all entries (1.0 up to floating error)
    pub fn total(&self) -> f32 {
        self.probabilities.iter().sum()
    }
}

impl Serialize for ClassDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ClassLabel::COUNT))?;
        for (label, p) in self.iter() {
            map.serialize_entry(label.as_str(), &p)?;
        }
        map.end()
    }
}

/// Per-model distribution kept for audit
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelDistribution {
    /// Model name from the registry roster
    pub model: String,
    /// Fusion weight the model contributed with
    pub fusion_weight: f32,
    /// Softmax output of the model
    pub distribution: ClassDistribution,
}

/// How the uncertainty score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyMethod {
    /// Variance of unweighted probabilities across ensemble members
    CrossModelVariance,
    /// Variance across stochastic dropout passes of a single model
    McDropout,
}

/// Which distribution the reported class and confidence come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    /// Single deterministic pass of the ensemble (authoritative)
    #[default]
    Deterministic,
    /// Mean of the Monte-Carlo dropout passes, when they ran
    McSmoothed,
}

/// Flags raised for the human verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewFlag {
    /// Confidence below the review threshold; check image quality first
    LowConfidence,
    /// Uncertainty above the review threshold
    HighUncertainty,
    /// Some configured auxiliary models are not loaded
    DegradedEnsemble,
    /// Uncertainty could not be estimated
    UncertaintyUnavailable,
    /// Heatmap could not be generated
    AttributionUnavailable,
}

/// Complete prediction for one image
///
/// Built once per call and handed to the caller; the engine keeps no reference.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PredictionResult {
    /// Predicted triage class
    pub predicted_class: ClassLabel,

    /// Probability of the predicted class (0.0-1.0)
    pub confidence: f32,

    /// Bucket of `confidence` under the review policy
    pub confidence_level: ConfidenceLevel,

    /// Uncertainty score (>= 0), absent when it could not be estimated
    pub uncertainty: Option<f32>,

    /// Method behind `uncertainty`
    pub uncertainty_method: Option<UncertaintyMethod>,

    /// Distribution `predicted_class` and `confidence` were taken from
    pub confidence_source: ConfidenceSource,

    /// Fused ensemble distribution
    pub distribution: ClassDistribution,

    /// Mean distribution of the Monte-Carlo dropout passes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed_distribution: Option<ClassDistribution>,

    /// Per-model distributions for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_model_distributions: Option<Vec<ModelDistribution>>,

    /// Review flags for the verifier
    pub flags: Vec<ReviewFlag>,

    /// Inference metadata
    pub metadata: InferenceMetadata,
}

impl PredictionResult {
    /// Explanation text for the predicted class
    pub fn explanation(&self) -> &'static str {
        self.predicted_class.explanation()
    }

    /// Recommendation text for the predicted class
    pub fn recommendation(&self) -> &'static str {
        self.predicted_class.recommendation()
    }

    /// Whether `flag` was raised
    pub fn has_flag(&self, flag: ReviewFlag) -> bool {
        self.flags.contains(&flag)
    }
}
