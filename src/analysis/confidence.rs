//! Confidence assessment module
//!
//! Turns the raw numbers of a prediction into something a human verifier can act
//! on: a coarse confidence level and a list of review flags.
//!
//! # Review Flags
//!
//! 1. **LowConfidence**: fused confidence below the review threshold (default 0.6).
//!    Verifiers are asked to check image quality (blur, darkness) before signing off.
//! 2. **HighUncertainty**: uncertainty above the configured threshold
//! 3. **DegradedEnsemble**: configured auxiliary models are not loaded
//! 4. **UncertaintyUnavailable** / **AttributionUnavailable**: an optional stage
//!    was requested but produced nothing
//!
//! # Example
//!
//! ```
//! use ocular_triage::analysis::confidence::{ConfidenceLevel, StageOutcome, compute_review_flags};
//! use ocular_triage::analysis::result::ReviewFlag;
//! use ocular_triage::config::ReviewPolicy;
//!
//! let outcome = StageOutcome {
//!     confidence: 0.42,
//!     uncertainty: Some(0.01),
//!     uncertainty_attempted: true,
//!     models_unavailable: 0,
//!     attribution_requested: true,
//!     attribution_present: true,
//! };
//! let policy = ReviewPolicy::default();
//! let flags = compute_review_flags(&outcome, &policy);
//!
//! assert_eq!(flags, vec![ReviewFlag::LowConfidence]);
//! assert_eq!(ConfidenceLevel::from_confidence(0.42, &policy), ConfidenceLevel::Low);
//! ```

use super::result::ReviewFlag;
use crate::config::ReviewPolicy;
use serde::Serialize;

/// Coarse confidence bucket shown to verifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// At or above the high-confidence threshold
    High,
    /// Between the two thresholds
    Medium,
    /// Below the review threshold
    Low,
}

impl ConfidenceLevel {
    /// Bucket a confidence value according to `policy`
    pub fn from_confidence(confidence: f32, policy: &ReviewPolicy) -> Self {
        if confidence < policy.low_confidence_threshold {
            ConfidenceLevel::Low
        } else if confidence >= policy.high_confidence_threshold {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::Medium
        }
    }

    /// Human-readable description: "High", "Medium", or "Low"
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }
}

/// What the individual stages of one prediction produced
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Reported confidence (0.0-1.0)
    pub confidence: f32,
    /// Uncertainty score, if one was computed
    pub uncertainty: Option<f32>,
    /// Whether an uncertainty estimate was expected
    pub uncertainty_attempted: bool,
    /// Configured auxiliary models that are not loaded
    pub models_unavailable: usize,
    /// Whether the caller asked for a heatmap
    pub attribution_requested: bool,
    /// Whether a heatmap was produced
    pub attribution_present: bool,
}

/// Compute review flags for a prediction
///
/// Flags are returned in a fixed order (confidence, uncertainty, roster,
/// optional stages) so reports stay stable across runs.
pub fn compute_review_flags(outcome: &StageOutcome, policy: &ReviewPolicy) -> Vec<ReviewFlag> {
    let mut flags = Vec::new();

    if outcome.confidence < policy.low_confidence_threshold {
        flags.push(ReviewFlag::LowConfidence);
    }

    if let (Some(u), Some(threshold)) = (outcome.uncertainty, policy.high_uncertainty_threshold) {
        if u > threshold {
            flags.push(ReviewFlag::HighUncertainty);
        }
    }

    if outcome.models_unavailable > 0 {
        flags.push(ReviewFlag::DegradedEnsemble);
    }

    if outcome.uncertainty_attempted && outcome.uncertainty.is_none() {
        flags.push(ReviewFlag::UncertaintyUnavailable);
    }

    if outcome.attribution_requested && !outcome.attribution_present {
        flags.push(ReviewFlag::AttributionUnavailable);
    }

    log::debug!(
        "Review assessment: confidence={:.3}, uncertainty={:?}, flags={:?}",
        outcome.confidence,
        outcome.uncertainty,
        flags
    );

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(confidence: f32, uncertainty: Option<f32>) -> StageOutcome {
        StageOutcome {
            confidence,
            uncertainty,
            uncertainty_attempted: true,
            models_unavailable: 0,
            attribution_requested: true,
            attribution_present: true,
        }
    }

    #[test]
    fn test_clean_prediction_has_no_flags() {
        let flags = compute_review_flags(&outcome(0.93, Some(0.001)), &ReviewPolicy::default());
        assert!(flags.is_empty());
    }

    #[test]
    fn test_low_confidence_boundary() {
        let policy = ReviewPolicy::default();
        let flags = compute_review_flags(&outcome(0.6, Some(0.0)), &policy);
        assert!(!flags.contains(&ReviewFlag::LowConfidence));

        let flags = compute_review_flags(&outcome(0.599, Some(0.0)), &policy);
        assert!(flags.contains(&ReviewFlag::LowConfidence));
    }

    #[test]
    fn test_high_uncertainty_only_when_threshold_set() {
        let mut policy = ReviewPolicy::default();
        policy.high_uncertainty_threshold = None;
        let flags = compute_review_flags(&outcome(0.9, Some(10.0)), &policy);
        assert!(flags.is_empty());

        policy.high_uncertainty_threshold = Some(0.02);
        let flags = compute_review_flags(&outcome(0.9, Some(0.03)), &policy);
        assert_eq!(flags, vec![ReviewFlag::HighUncertainty]);
    }

    #[test]
    fn test_degraded_stages() {
        let mut o = outcome(0.9, None);
        o.models_unavailable = 1;
        o.attribution_present = false;
        let flags = compute_review_flags(&o, &ReviewPolicy::default());
        assert_eq!(
            flags,
            vec![
                ReviewFlag::DegradedEnsemble,
                ReviewFlag::UncertaintyUnavailable,
                ReviewFlag::AttributionUnavailable,
            ]
        );
    }

    #[test]
    fn test_confidence_levels() {
        let policy = ReviewPolicy::default();
        assert_eq!(ConfidenceLevel::from_confidence(0.95, &policy), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_confidence(0.7, &policy), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.3, &policy), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::Medium.as_str(), "Medium");
    }
}
