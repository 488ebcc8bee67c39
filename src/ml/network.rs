//! Classifier networks and scoped capture hooks
//!
//! A [`Network`] splits every architecture at its attribution layer: a
//! convolutional trunk producing the last spatial feature map, and a head that
//! pools and classifies it. Grad-CAM needs that map and the gradient of a class
//! score with respect to it, which [`CaptureHooks`] records for one
//! instrumented pass.
//!
//! # Hook lifecycle
//!
//! 1. [`Network::install_capture_hooks`] takes the per-model attribution lock
//!    and arms the hooks for the calling thread.
//! 2. Forward passes on that thread record the feature map as a fresh graph
//!    root. Passes on other threads are unaffected.
//! 3. [`CaptureHooks::backward`] differentiates a score and records the
//!    gradient at the root.
//! 4. Dropping the guard clears all hook state, then releases the lock. This
//!    happens on every exit path, including unwinding.

use super::alexnet::AlexNet;
use super::layers::DropoutMode;
use super::resnet::ResNet;
use crate::analysis::labels::ClassLabel;
use crate::error::EngineError;
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Supported classifier architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// AlexNet (torchvision layout)
    #[serde(rename = "alexnet")]
    AlexNet,
    /// ResNet-18
    #[serde(rename = "resnet18")]
    ResNet18,
    /// ResNet-50
    #[serde(rename = "resnet50")]
    ResNet50,
}

impl Architecture {
    /// Stable identifier used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::AlexNet => "alexnet",
            Architecture::ResNet18 => "resnet18",
            Architecture::ResNet50 => "resnet50",
        }
    }

    /// Layer whose output and gradient drive Grad-CAM
    pub fn attribution_layer(&self) -> &'static str {
        match self {
            Architecture::AlexNet => "features.11",
            Architecture::ResNet18 | Architecture::ResNet50 => "layer4",
        }
    }

    /// Smallest square input the architecture can process
    ///
    /// Below this the pooling stages run out of spatial extent.
    pub fn min_input_resolution(&self) -> usize {
        match self {
            Architecture::AlexNet => 63,
            Architecture::ResNet18 | Architecture::ResNet50 => 32,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Backbone {
    AlexNet(AlexNet),
    ResNet(ResNet),
}

impl Backbone {
    fn features(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Backbone::AlexNet(net) => net.features(xs),
            Backbone::ResNet(net) => net.features(xs),
        }
    }

    fn head(&self, features: &Tensor, mode: &mut DropoutMode<'_>) -> candle_core::Result<Tensor> {
        match self {
            Backbone::AlexNet(net) => net.head(features, mode),
            Backbone::ResNet(net) => net.head(features, mode),
        }
    }

    fn dropout_layers(&self) -> usize {
        match self {
            Backbone::AlexNet(net) => net.dropout_layers(),
            Backbone::ResNet(net) => net.dropout_layers(),
        }
    }
}

/// Hook state while a capture guard is alive
struct HookBuffers {
    owner: ThreadId,
    activation: Option<Var>,
    gradient: Option<Tensor>,
}

/// A loaded classifier producing one score per [`ClassLabel`]
pub struct Network {
    architecture: Architecture,
    backbone: Backbone,
    device: Device,
    hooks: Mutex<Option<HookBuffers>>,
    attribution_lock: Mutex<()>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("architecture", &self.architecture)
            .field("device", &self.device)
            .field("dropout_layers", &self.dropout_layers())
            .field("hooks_installed", &self.hooks_installed())
            .finish()
    }
}

impl Network {
    /// Build a network from a weight source
    ///
    /// # Arguments
    ///
    /// * `architecture` - Which layout the weights follow
    /// * `head_dropout` - Dropout probability in front of the classifier
    /// * `vb` - Weight source rooted at the state dict top level
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Tensor` when a weight is missing or has the wrong shape.
    pub fn new(architecture: Architecture, head_dropout: f32, vb: VarBuilder) -> Result<Self, EngineError> {
        let device = vb.device().clone();
        let classes = ClassLabel::COUNT;
        let backbone = match architecture {
            Architecture::AlexNet => Backbone::AlexNet(AlexNet::new(vb, classes, head_dropout)?),
            Architecture::ResNet18 => Backbone::ResNet(ResNet::resnet18(vb, classes, head_dropout)?),
            Architecture::ResNet50 => Backbone::ResNet(ResNet::resnet50(vb, classes, head_dropout)?),
        };
        Ok(Self {
            architecture,
            backbone,
            device,
            hooks: Mutex::new(None),
            attribution_lock: Mutex::new(()),
        })
    }

    /// Load a network from a safetensors file
    ///
    /// Weights stored in another float type are converted to f32.
    pub fn from_safetensors<P: AsRef<Path>>(
        path: P,
        architecture: Architecture,
        head_dropout: f32,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        log::debug!("Loading {} weights from {}", architecture, path.display());
        let bytes = std::fs::read(path)?;
        let vb = VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)?;
        Self::new(architecture, head_dropout, vb)
    }

    /// Architecture of this network
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Device holding the weights
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of dropout layers Monte-Carlo sampling can resample
    pub fn dropout_layers(&self) -> usize {
        self.backbone.dropout_layers()
    }

    /// Raw class scores for an N×3×R×R input
    ///
    /// Batch normalization always uses running statistics. Dropout follows `mode`.
    pub fn forward(&self, xs: &Tensor, mode: &mut DropoutMode<'_>) -> Result<Tensor, EngineError> {
        let features = self.backbone.features(xs)?;
        let features = self.tap_features(features)?;
        Ok(self.backbone.head(&features, mode)?)
    }

    /// Softmax probabilities for a single-image input
    pub fn predict_proba(&self, xs: &Tensor, mode: &mut DropoutMode<'_>) -> Result<Vec<f32>, EngineError> {
        let logits = self.forward(xs, mode)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok(probs.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// Arm the capture hooks for the calling thread
    ///
    /// Blocks while another thread holds a guard on this network.
    pub fn install_capture_hooks(&self) -> Result<CaptureHooks<'_>, EngineError> {
        let serial = self
            .attribution_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut hooks = self.lock_hooks();
        *hooks = Some(HookBuffers {
            owner: thread::current().id(),
            activation: None,
            gradient: None,
        });
        drop(hooks);
        log::debug!(
            "Capture hooks installed on {} ({})",
            self.architecture,
            self.architecture.attribution_layer()
        );
        Ok(CaptureHooks {
            network: self,
            _serial: serial,
        })
    }

    /// Whether any capture hook is currently armed
    pub fn hooks_installed(&self) -> bool {
        self.lock_hooks().is_some()
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Option<HookBuffers>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward hook: re-root the feature map when armed for this thread
    fn tap_features(&self, features: Tensor) -> Result<Tensor, EngineError> {
        let mut hooks = self.lock_hooks();
        match hooks.as_mut() {
            Some(buffers) if buffers.owner == thread::current().id() => {
                let root = Var::from_tensor(&features)?;
                let tensor = root.as_tensor().clone();
                buffers.activation = Some(root);
                buffers.gradient = None;
                Ok(tensor)
            }
            _ => Ok(features),
        }
    }

    fn clear_hooks(&self) {
        *self.lock_hooks() = None;
    }
}

/// Scoped capture hooks on one [`Network`]
///
/// Holds the network's attribution lock for its whole lifetime.
pub struct CaptureHooks<'a> {
    network: &'a Network,
    _serial: MutexGuard<'a, ()>,
}

impl CaptureHooks<'_> {
    /// Network the hooks are installed on
    pub fn network(&self) -> &Network {
        self.network
    }

    /// Backward hook: differentiate `score` and record the gradient at the captured layer
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AttributionCapture` when no activation was captured
    /// or the score does not depend on it.
    pub fn backward(&self, score: &Tensor) -> Result<(), EngineError> {
        let root = {
            let hooks = self.network.lock_hooks();
            hooks
                .as_ref()
                .and_then(|b| b.activation.as_ref())
                .map(|v| v.as_tensor().clone())
        };
        let root = root.ok_or_else(|| {
            EngineError::AttributionCapture("Forward hook captured no activation".to_string())
        })?;

        let grads = score.backward()?;
        let gradient = grads.get(&root).cloned().ok_or_else(|| {
            EngineError::AttributionCapture("Backward hook captured no gradient".to_string())
        })?;

        if let Some(buffers) = self.network.lock_hooks().as_mut() {
            buffers.gradient = Some(gradient);
        }
        Ok(())
    }

    /// Captured activation and gradient, both N×C×H×W
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AttributionCapture` if either is missing.
    pub fn captured(&self) -> Result<(Tensor, Tensor), EngineError> {
        let hooks = self.network.lock_hooks();
        let buffers = hooks.as_ref().ok_or_else(|| {
            EngineError::AttributionCapture("Capture hooks are not installed".to_string())
        })?;
        let activation = buffers
            .activation
            .as_ref()
            .map(|v| v.as_tensor().clone())
            .ok_or_else(|| EngineError::AttributionCapture("No activation captured".to_string()))?;
        let gradient = buffers
            .gradient
            .clone()
            .ok_or_else(|| EngineError::AttributionCapture("No gradient captured".to_string()))?;
        Ok((activation, gradient))
    }
}

impl Drop for CaptureHooks<'_> {
    fn drop(&mut self) {
        self.network.clear_hooks();
        log::debug!("Capture hooks removed from {}", self.network.architecture);
    }
}
