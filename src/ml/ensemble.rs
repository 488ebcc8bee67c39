//! Weighted ensemble fusion
//!
//! Each loaded model's softmax output is scaled by its fusion weight, the
//! scaled distributions are summed, and the sum is divided by the total weight
//! of the models that actually contributed. A missing auxiliary therefore
//! re-normalizes the remaining weights instead of shrinking the distribution.

use super::layers::DropoutMode;
use super::registry::ModelRegistry;
use crate::analysis::labels::ClassLabel;
use crate::analysis::result::{ClassDistribution, ModelDistribution};
use crate::error::EngineError;
use candle_core::Tensor;

/// Fused prediction over the loaded models
#[derive(Debug, Clone)]
pub struct EnsembleOutput {
    /// Fused distribution
    pub distribution: ClassDistribution,
    /// Arg-max of the fused distribution (ties resolve to the lowest index)
    pub predicted_class: ClassLabel,
    /// Fused probability of `predicted_class`
    pub confidence: f32,
    /// Unweighted per-model distributions, primary first
    pub per_model: Vec<ModelDistribution>,
}

/// Fuse per-model distributions with their weights
///
/// # Arguments
///
/// * `members` - Pairs of (fusion weight, distribution)
///
/// # Errors
///
/// Returns `EngineError::NoModelAvailable` when there is nothing to fuse or the
/// weights sum to zero.
pub fn fuse_distributions(members: &[(f32, &ClassDistribution)]) -> Result<ClassDistribution, EngineError> {
    if members.is_empty() {
        let err = EngineError::NoModelAvailable("Ensemble has no members".to_string());
        log::error!("{}", err);
        return Err(err);
    }

    let weight_sum: f32 = members.iter().map(|(w, _)| *w).sum();
    if weight_sum.is_nan() || weight_sum <= 0.0 {
        let err = EngineError::NoModelAvailable(format!(
            "Fusion weights of the loaded models sum to {}",
            weight_sum
        ));
        log::error!("{}", err);
        return Err(err);
    }

    let mut fused = [0.0f32; ClassLabel::COUNT];
    for (weight, distribution) in members {
        for (acc, p) in fused.iter_mut().zip(distribution.as_slice()) {
            *acc += weight * p;
        }
    }
    for value in fused.iter_mut() {
        *value /= weight_sum;
    }

    ClassDistribution::from_probabilities(&fused)
}

/// Run every loaded model on `input` and fuse the results
///
/// Models run in inference mode (dropout off, batch normalization on running
/// statistics).
pub fn predict_ensemble(registry: &ModelRegistry, input: &Tensor) -> Result<EnsembleOutput, EngineError> {
    let models = registry.loaded_models();
    if models.is_empty() {
        let err = EngineError::NoModelAvailable("No models are loaded".to_string());
        log::error!("{}", err);
        return Err(err);
    }

    let mut per_model = Vec::with_capacity(models.len());
    for model in models {
        let probs = model
            .network
            .predict_proba(input, &mut DropoutMode::Inference)?;
        let distribution = ClassDistribution::from_probabilities(&probs)?;
        log::debug!(
            "Model '{}' (weight {:.2}) predicts {} ({:.3})",
            model.descriptor.name,
            model.descriptor.fusion_weight,
            distribution.argmax().0,
            distribution.argmax().1
        );
        per_model.push(ModelDistribution {
            model: model.descriptor.name.clone(),
            fusion_weight: model.descriptor.fusion_weight,
            distribution,
        });
    }

    let members: Vec<(f32, &ClassDistribution)> = per_model
        .iter()
        .map(|m| (m.fusion_weight, &m.distribution))
        .collect();
    let distribution = fuse_distributions(&members)?;
    let (predicted_class, confidence) = distribution.argmax();

    Ok(EnsembleOutput {
        distribution,
        predicted_class,
        confidence,
        per_model,
    })
}
