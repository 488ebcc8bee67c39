//! Grad-CAM attribution
//!
//! Explains a prediction by highlighting the image regions that drove the
//! target class score:
//!
//! 1. Arm capture hooks on the primary network (scoped guard)
//! 2. Forward, take the raw score of the target class, backward from it
//! 3. Weight the captured activation channels by their mean gradient
//! 4. ReLU, normalize to [0, 1], upsample to the original resolution
//! 5. Color-map, blend onto the original and render a captioned three-panel comparison
//!
//! The hooks are released before any rendering happens and on every error path.

pub mod caption;
pub mod colormap;
pub mod grad_cam;
pub mod render;

use crate::analysis::labels::ClassLabel;
use crate::config::AttributionConfig;
use crate::error::EngineError;
use crate::ml::layers::DropoutMode;
use crate::ml::network::Network;
use crate::preprocessing::PreprocessedImage;
use candle_core::{IndexOp, Tensor};
use image::RgbImage;
pub use render::HeatmapLayer;

/// Captions of the comparison panels, left to right
pub const PANEL_CAPTIONS: [&str; 3] = [
    "Original Image",
    "GradCAM Heatmap",
    "Overlay Visualization",
];

/// Visual explanation of one prediction
#[derive(Debug, Clone)]
pub struct AttributionArtifact {
    /// Class the map explains
    pub target: ClassLabel,
    /// Decoded input at its original resolution
    pub original: RgbImage,
    /// Input as the network saw it, R×R, rebuilt from the raw-scaled tensor
    pub network_view: RgbImage,
    /// Normalized map at the original resolution
    pub heatmap_layer: HeatmapLayer,
    /// Color-mapped `heatmap_layer`
    pub heatmap_rgb: RgbImage,
    /// Blend of `original` and `heatmap_rgb`
    pub overlay: RgbImage,
    /// PNG of original | heatmap | overlay
    pub rendered_comparison: Vec<u8>,
}

/// Capture activation and gradient of the attribution layer for `target`
///
/// The capture guard lives only inside this function.
fn capture(network: &Network, input: &Tensor, target: ClassLabel) -> Result<(Tensor, Tensor), EngineError> {
    let hooks = network.install_capture_hooks()?;
    let logits = network.forward(input, &mut DropoutMode::Inference)?;
    let score = logits.i((0, target.index()))?;
    hooks.backward(&score)?;
    hooks.captured()
}

/// Generate the Grad-CAM artifact for `target`
///
/// # Arguments
///
/// * `network` - Primary network (its attribution lock is taken for the capture)
/// * `input` - Preprocessed input (normalized tensor for the pass, raw tensor for the network view)
/// * `target` - Class to explain, normally the predicted class
/// * `original` - Decoded input image; sets the heatmap resolution
/// * `config` - Overlay weights, epsilon and panel gap
///
/// # Errors
///
/// Returns `EngineError::AttributionCapture` when the hooks record nothing and
/// propagates tensor or encoding failures.
pub fn explain(
    network: &Network,
    input: &PreprocessedImage,
    target: ClassLabel,
    original: &RgbImage,
    config: &AttributionConfig,
) -> Result<AttributionArtifact, EngineError> {
    let (activation, gradient) = capture(network, &input.normalized, target)?;
    let cam = grad_cam::class_activation_map(&activation, &gradient, config.epsilon)?;
    if cam.is_blank() {
        log::debug!("Activation map for '{}' is blank", target);
    }

    let heatmap_layer = render::upsample(&cam, original.width(), original.height())?;
    let heatmap_rgb = colormap::colorize(&heatmap_layer);
    let overlay = render::overlay(
        original,
        &heatmap_rgb,
        config.original_weight,
        config.heatmap_weight,
    )?;
    let [original_caption, heatmap_caption, overlay_caption] = PANEL_CAPTIONS;
    let comparison = render::compose_panels(
        &[
            (original_caption, original),
            (heatmap_caption, &heatmap_rgb),
            (overlay_caption, &overlay),
        ],
        config.panel_gap,
    );
    let rendered_comparison = render::encode_png(&comparison)?;

    log::debug!(
        "Attribution for '{}' rendered at {}x{} ({} PNG bytes)",
        target,
        original.width(),
        original.height(),
        rendered_comparison.len()
    );

    Ok(AttributionArtifact {
        target,
        original: original.clone(),
        network_view: input.visualization_underlay()?,
        heatmap_layer,
        heatmap_rgb,
        overlay,
        rendered_comparison,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::network::Architecture;
    use crate::preprocessing::normalization::ChannelNormalization;
    use crate::preprocessing::preprocess;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use image::Rgb;

    fn network(architecture: Architecture) -> Network {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Network::new(architecture, 0.0, vb).unwrap()
    }

    fn fundus(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 60])
        })
    }

    fn prepared(image: &RgbImage, resolution: u32) -> PreprocessedImage {
        preprocess(image, resolution, &ChannelNormalization::imagenet(), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_explain_matches_original_resolution() {
        let net = network(Architecture::ResNet18);
        let original = fundus(90, 50);
        let input = prepared(&original, 64);

        let artifact = explain(
            &net,
            &input,
            ClassLabel::Glaucoma,
            &original,
            &AttributionConfig::default(),
        )
        .unwrap();

        assert_eq!(artifact.target, ClassLabel::Glaucoma);
        assert_eq!(artifact.network_view.dimensions(), (64, 64));
        assert_eq!(artifact.heatmap_layer.dimensions(), (90, 50));
        assert_eq!(artifact.heatmap_rgb.dimensions(), (90, 50));
        assert_eq!(artifact.overlay.dimensions(), (90, 50));
        assert!(artifact
            .heatmap_layer
            .pixels()
            .all(|p| (0.0..=1.0).contains(&p.0[0])));

        let comparison = image::load_from_memory(&artifact.rendered_comparison).unwrap();
        assert_eq!(comparison.width(), 90 * 3 + 20);
        assert_eq!(comparison.height(), 50 + caption::CAPTION_HEIGHT);
        assert!(!net.hooks_installed());
    }

    #[test]
    fn test_explain_on_alexnet_at_default_resolution() {
        let net = network(Architecture::AlexNet);
        let original = fundus(300, 200);
        let input = prepared(&original, 227);

        let artifact = explain(
            &net,
            &input,
            ClassLabel::Cataract,
            &original,
            &AttributionConfig::default(),
        )
        .unwrap();

        assert_eq!(artifact.heatmap_layer.dimensions(), (300, 200));
        assert_eq!(artifact.network_view.dimensions(), (227, 227));
        assert!(!artifact.rendered_comparison.is_empty());
        assert!(!net.hooks_installed());
    }

    #[test]
    fn test_failed_capture_leaves_no_hooks() {
        let net = network(Architecture::ResNet18);
        // Wrong channel count makes the forward pass fail inside the guard
        let input = PreprocessedImage {
            normalized: Tensor::zeros((1, 1, 64, 64), DType::F32, &Device::Cpu).unwrap(),
            raw: Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap(),
            resolution: 64,
        };
        let original = RgbImage::new(8, 8);
        assert!(explain(
            &net,
            &input,
            ClassLabel::Normal,
            &original,
            &AttributionConfig::default()
        )
        .is_err());
        assert!(!net.hooks_installed());
    }

    #[test]
    fn test_forward_pass_unchanged_by_attribution() {
        let net = network(Architecture::ResNet18);
        let original = fundus(64, 64);
        let input = prepared(&original, 64);
        let before = net
            .predict_proba(&input.normalized, &mut DropoutMode::Inference)
            .unwrap();

        explain(&net, &input, ClassLabel::Normal, &original, &AttributionConfig::default()).unwrap();
        let after = net
            .predict_proba(&input.normalized, &mut DropoutMode::Inference)
            .unwrap();
        assert_eq!(before, after);
    }
}
