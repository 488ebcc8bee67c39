//! Gradient-weighted class activation maps
//!
//! Channel weights are the spatial mean of the gradient; the map is the ReLU of
//! the weighted sum of activation channels, rescaled to [0, 1] by its own
//! min/max.

use crate::error::EngineError;
use candle_core::{DType, Tensor};

/// Class-activation map at the resolution of the attribution layer
#[derive(Debug, Clone, PartialEq)]
pub struct ClassActivationMap {
    /// Map width (layer columns)
    pub width: usize,
    /// Map height (layer rows)
    pub height: usize,
    /// Row-major values in [0, 1]
    pub values: Vec<f32>,
}

impl ClassActivationMap {
    /// Whether every value is zero
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }
}

/// Rescale `values` to [0, 1] in place
///
/// When the range is at most `epsilon` the map carries no spatial information
/// and is set to zeros.
pub fn normalize_unit_interval(values: &mut [f32], epsilon: f32) {
    if values.is_empty() {
        return;
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    let range = max - min;
    if !range.is_finite() || range <= epsilon {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    for v in values.iter_mut() {
        *v = (*v - min) / range;
    }
}

/// Compute the map from flat C×H×W activation and gradient buffers
///
/// # Arguments
///
/// * `activations` - Layer output, channel-major
/// * `gradients` - Gradient of the class score with respect to the layer output
/// * `channels`, `height`, `width` - Layer shape
/// * `epsilon` - Constant-map threshold for the normalization
pub fn compute_cam(
    activations: &[f32],
    gradients: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    epsilon: f32,
) -> Result<ClassActivationMap, EngineError> {
    let spatial = height * width;
    if spatial == 0 || channels == 0 {
        return Err(EngineError::AttributionCapture(
            "Attribution layer has no spatial extent".to_string(),
        ));
    }
    if activations.len() != channels * spatial || gradients.len() != activations.len() {
        return Err(EngineError::AttributionCapture(format!(
            "Captured buffers do not match layer shape {}x{}x{} ({} activations, {} gradients)",
            channels,
            height,
            width,
            activations.len(),
            gradients.len()
        )));
    }

    let weights: Vec<f32> = gradients
        .chunks(spatial)
        .map(|g| g.iter().sum::<f32>() / spatial as f32)
        .collect();

    let mut values = vec![0.0f32; spatial];
    for (channel, weight) in weights.iter().enumerate() {
        let plane = &activations[channel * spatial..(channel + 1) * spatial];
        for (acc, a) in values.iter_mut().zip(plane) {
            *acc += weight * a;
        }
    }
    for v in values.iter_mut() {
        *v = v.max(0.0);
    }

    normalize_unit_interval(&mut values, epsilon);

    Ok(ClassActivationMap {
        width,
        height,
        values,
    })
}

/// Compute the map from captured 1×C×H×W tensors
pub fn class_activation_map(
    activation: &Tensor,
    gradient: &Tensor,
    epsilon: f32,
) -> Result<ClassActivationMap, EngineError> {
    if activation.dims() != gradient.dims() {
        return Err(EngineError::AttributionCapture(format!(
            "Activation shape {:?} differs from gradient shape {:?}",
            activation.dims(),
            gradient.dims()
        )));
    }
    let (_, channels, height, width) = activation.dims4()?;
    let activations = activation.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    let gradients = gradient.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    log::debug!("Grad-CAM over {} channels at {}x{}", channels, width, height);
    compute_cam(&activations, &gradients, channels, height, width, epsilon)
}
