//! Predictive uncertainty
//!
//! The strategy depends on how many models are loaded:
//!
//! - **Two or more**: cross-model variance. For each class, the sample variance
//!   of the (unweighted) per-model probabilities; the uncertainty is the mean
//!   over classes.
//! - **Exactly one**: Monte-Carlo dropout. The model's dropout layers are
//!   sampled on N forward passes of the same input while batch normalization
//!   stays on its running statistics. The uncertainty is the mean over classes
//!   of the per-class sample variance across passes.
//!
//! Both use the n−1 denominator.

use super::ensemble::EnsembleOutput;
use super::layers::DropoutMode;
use super::network::Network;
use super::registry::ModelRegistry;
use crate::analysis::labels::ClassLabel;
use crate::analysis::result::{ClassDistribution, UncertaintyMethod};
use crate::config::McDropoutConfig;
use crate::error::EngineError;
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Uncertainty attached to a prediction
#[derive(Debug, Clone, Default)]
pub struct UncertaintyEstimate {
    /// Scalar uncertainty (>= 0), absent when it cannot be estimated
    pub value: Option<f32>,
    /// How `value` was computed
    pub method: Option<UncertaintyMethod>,
    /// Mean distribution of the Monte-Carlo passes
    pub smoothed: Option<ClassDistribution>,
    /// Stochastic passes performed (0 for cross-model variance)
    pub samples: usize,
}

/// Result of Monte-Carlo dropout sampling
#[derive(Debug, Clone)]
pub struct McDropoutOutcome {
    /// Mean distribution over the passes
    pub mean: ClassDistribution,
    /// Mean over classes of the per-class sample variance
    pub uncertainty: f32,
    /// Number of passes
    pub samples: usize,
}

/// Mean over classes of the per-class sample variance (n−1 denominator)
///
/// Returns `None` for fewer than two samples.
pub fn mean_class_variance<S: AsRef<[f32]>>(samples: &[S]) -> Option<f32> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f32;
    let classes = samples[0].as_ref().len();
    if classes == 0 || samples.iter().any(|s| s.as_ref().len() != classes) {
        return None;
    }

    let mut total = 0.0f32;
    for c in 0..classes {
        let mean = samples.iter().map(|s| s.as_ref()[c]).sum::<f32>() / n;
        let var = samples
            .iter()
            .map(|s| {
                let d = s.as_ref()[c] - mean;
                d * d
            })
            .sum::<f32>()
            / (n - 1.0);
        total += var;
    }
    Some((total / classes as f32).max(0.0))
}

/// Disagreement between per-model distributions
///
/// Returns `None` for fewer than two distributions.
pub fn cross_model_variance(distributions: &[&ClassDistribution]) -> Option<f32> {
    let samples: Vec<&[f32]> = distributions.iter().map(|d| d.as_slice()).collect();
    mean_class_variance(samples.as_slice())
}

/// Monte-Carlo dropout on one network
///
/// # Arguments
///
/// * `network` - Model to sample
/// * `input` - Normalized input tensor
/// * `config` - Sample count and optional seed
///
/// # Returns
///
/// `None` when the network has no active dropout layer.
///
/// # Errors
///
/// Returns `EngineError::InvalidConfig` for fewer than two samples and
/// propagates forward-pass failures.
pub fn mc_dropout(
    network: &Network,
    input: &Tensor,
    config: &McDropoutConfig,
) -> Result<Option<McDropoutOutcome>, EngineError> {
    if config.samples < 2 {
        return Err(EngineError::InvalidConfig(format!(
            "Monte-Carlo dropout needs at least 2 samples, got {}",
            config.samples
        )));
    }
    if network.dropout_layers() == 0 {
        log::debug!("No active dropout layer; skipping Monte-Carlo dropout");
        return Ok(None);
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut samples = Vec::with_capacity(config.samples);
    for _ in 0..config.samples {
        let probs = network.predict_proba(input, &mut DropoutMode::Stochastic(&mut rng))?;
        samples.push(probs);
    }

    let mut mean = [0.0f32; ClassLabel::COUNT];
    for sample in &samples {
        for (acc, p) in mean.iter_mut().zip(sample) {
            *acc += p;
        }
    }
    for value in mean.iter_mut() {
        *value /= samples.len() as f32;
    }

    let uncertainty = mean_class_variance(samples.as_slice()).ok_or_else(|| {
        EngineError::InvalidInput("Monte-Carlo samples have inconsistent lengths".to_string())
    })?;

    log::debug!(
        "Monte-Carlo dropout: {} passes, uncertainty {:.6}",
        samples.len(),
        uncertainty
    );

    Ok(Some(McDropoutOutcome {
        mean: ClassDistribution::from_probabilities(&mean)?,
        uncertainty,
        samples: samples.len(),
    }))
}

/// Pick and run the uncertainty strategy for the loaded roster
///
/// # Arguments
///
/// * `registry` - Loaded models
/// * `input` - Normalized input tensor
/// * `ensemble` - Deterministic prediction for the same input
/// * `config` - Monte-Carlo dropout parameters
pub fn estimate_uncertainty(
    registry: &ModelRegistry,
    input: &Tensor,
    ensemble: &EnsembleOutput,
    config: &McDropoutConfig,
) -> Result<UncertaintyEstimate, EngineError> {
    if ensemble.per_model.len() >= 2 {
        let distributions: Vec<&ClassDistribution> =
            ensemble.per_model.iter().map(|m| &m.distribution).collect();
        let value = cross_model_variance(&distributions);
        log::debug!(
            "Cross-model variance over {} models: {:?}",
            distributions.len(),
            value
        );
        return Ok(UncertaintyEstimate {
            value,
            method: value.map(|_| UncertaintyMethod::CrossModelVariance),
            smoothed: None,
            samples: 0,
        });
    }

    let primary = registry.primary()?;
    Ok(match mc_dropout(primary, input, config)? {
        Some(outcome) => UncertaintyEstimate {
            value: Some(outcome.uncertainty),
            method: Some(UncertaintyMethod::McDropout),
            smoothed: Some(outcome.mean),
            samples: outcome.samples,
        },
        None => UncertaintyEstimate::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::network::Architecture;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn network(dropout: f32) -> Network {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Network::new(Architecture::ResNet18, dropout, vb).unwrap()
    }

    fn input() -> Tensor {
        Tensor::randn(0f32, 1.0, (1, 3, 32, 32), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_sample_variance_uses_unbiased_estimator() {
        let samples = vec![vec![0.0f32, 1.0], vec![1.0, 0.0]];
        // Per class: mean 0.5, squared deviations 0.25 + 0.25, / (n-1) = 0.5
        let value = mean_class_variance(samples.as_slice()).unwrap();
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_variance_needs_two_samples() {
        assert!(mean_class_variance(&[vec![0.5f32, 0.5]]).is_none());
        let d = ClassDistribution::uniform();
        assert!(cross_model_variance(&[&d]).is_none());
    }

    #[test]
    fn test_identical_models_have_zero_variance() {
        let d = ClassDistribution::uniform();
        assert_eq!(cross_model_variance(&[&d, &d, &d]), Some(0.0));
    }

    #[test]
    fn test_mc_dropout_is_seed_deterministic() {
        let net = network(0.5);
        let xs = input();
        let config = McDropoutConfig {
            samples: 5,
            seed: Some(1234),
        };

        let a = mc_dropout(&net, &xs, &config).unwrap().unwrap();
        let b = mc_dropout(&net, &xs, &config).unwrap().unwrap();
        assert_eq!(a.uncertainty, b.uncertainty);
        assert_eq!(a.mean, b.mean);
        assert!(a.uncertainty >= 0.0);
        assert_eq!(a.samples, 5);
        assert!((a.mean.total() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_mc_dropout_absent_without_dropout() {
        let net = network(0.0);
        let config = McDropoutConfig {
            samples: 3,
            seed: Some(1),
        };
        assert!(mc_dropout(&net, &input(), &config).unwrap().is_none());
    }

    #[test]
    fn test_mc_dropout_rejects_single_sample() {
        let net = network(0.5);
        let config = McDropoutConfig {
            samples: 1,
            seed: None,
        };
        assert!(matches!(
            mc_dropout(&net, &input(), &config),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
