//! AlexNet classifier
//!
//! Layer names follow the torchvision state dict (`features.{0,3,6,8,10}`,
//! `classifier.{1,4,6}`) so exported weights load without renaming. The last
//! classification layer is sized to the label set.

use super::layers::{adaptive_avg_pool2d, strided_max_pool, DropoutMode, McDropout};
use candle_core::{Result, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder};

/// Output side of the adaptive pooling stage in front of the classifier
const POOLED_SIDE: usize = 6;

/// Channels produced by the last convolution
const FEATURE_CHANNELS: usize = 256;

/// Width of the two hidden fully-connected layers
const HIDDEN: usize = 4096;

/// AlexNet feature extractor and classifier
#[derive(Debug)]
pub struct AlexNet {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    conv4: Conv2d,
    conv5: Conv2d,
    dropout: McDropout,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

fn conv(vb: VarBuilder, in_c: usize, out_c: usize, kernel: usize, stride: usize, padding: usize) -> Result<Conv2d> {
    let config = Conv2dConfig {
        padding,
        stride,
        ..Default::default()
    };
    conv2d(in_c, out_c, kernel, config, vb)
}

impl AlexNet {
    /// Build the network from a weight source
    ///
    /// # Arguments
    ///
    /// * `vb` - Weights, rooted at the state dict top level
    /// * `num_classes` - Size of the final layer
    /// * `dropout` - Probability of both classifier dropout layers
    pub fn new(vb: VarBuilder, num_classes: usize, dropout: f32) -> Result<Self> {
        let f = vb.pp("features");
        let c = vb.pp("classifier");
        Ok(Self {
            conv1: conv(f.pp("0"), 3, 64, 11, 4, 2)?,
            conv2: conv(f.pp("3"), 64, 192, 5, 1, 2)?,
            conv3: conv(f.pp("6"), 192, 384, 3, 1, 1)?,
            conv4: conv(f.pp("8"), 384, 256, 3, 1, 1)?,
            conv5: conv(f.pp("10"), 256, FEATURE_CHANNELS, 3, 1, 1)?,
            dropout: McDropout::new(dropout),
            fc1: linear(FEATURE_CHANNELS * POOLED_SIDE * POOLED_SIDE, HIDDEN, c.pp("1"))?,
            fc2: linear(HIDDEN, HIDDEN, c.pp("4"))?,
            fc3: linear(HIDDEN, num_classes, c.pp("6"))?,
        })
    }

    /// Convolutional trunk up to the ReLU after the fifth convolution
    ///
    /// Output is N×256×H'×W', the last spatial map before pooling.
    pub fn features(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv1.forward(xs)?.relu()?.max_pool2d_with_stride(3, 2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d_with_stride(3, 2)?;
        let xs = self.conv3.forward(&xs)?.relu()?;
        let xs = self.conv4.forward(&xs)?.relu()?;
        self.conv5.forward(&xs)?.relu()
    }

    /// Pooling and classifier on top of [`AlexNet::features`], returning raw scores
    ///
    /// Grad-CAM backpropagates through this pool, so it uses the differentiable
    /// [`strided_max_pool`].
    pub fn head(&self, features: &Tensor, mode: &mut DropoutMode<'_>) -> Result<Tensor> {
        let xs = strided_max_pool(features, 3, 2)?;
        let xs = adaptive_avg_pool2d(&xs, POOLED_SIDE, POOLED_SIDE)?.flatten_from(1)?;
        let xs = self.dropout.forward(&xs, mode)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, mode)?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        self.fc3.forward(&xs)
    }

    /// Number of dropout layers that resample under Monte-Carlo dropout
    pub fn dropout_layers(&self) -> usize {
        if self.dropout.is_active() {
            2
        } else {
            0
        }
    }
}
