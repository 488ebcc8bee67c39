//! ResNet classifiers (18-layer basic blocks, 50-layer bottlenecks)
//!
//! Layer names follow the torchvision state dict. With a non-zero head dropout
//! the classifier is `fc = Sequential(Dropout, Linear)`, so the final layer is
//! stored as `fc.1`; without dropout it is the plain `fc`.

use super::layers::{global_avg_pool, padded_max_pool, DropoutMode, McDropout};
use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, Module, ModuleT,
    VarBuilder,
};

const BN_EPS: f64 = 1e-5;

/// Residual block flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3×3 convolutions
    Basic,
    /// 1×1 → 3×3 → 1×1 with 4× channel expansion
    Bottleneck,
}

impl BlockKind {
    fn expansion(self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }
}

/// Convolution followed by batch normalization
#[derive(Debug)]
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBn {
    #[allow(clippy::too_many_arguments)]
    fn new(
        vb: &VarBuilder,
        conv_name: &str,
        bn_name: &str,
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        Ok(Self {
            conv: conv2d_no_bias(in_c, out_c, kernel, config, vb.pp(conv_name))?,
            bn: batch_norm(out_c, BN_EPS, vb.pp(bn_name))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // Running statistics only
        self.bn.forward_t(&self.conv.forward(xs)?, false)
    }
}

#[derive(Debug)]
struct Block {
    stages: Vec<ConvBn>,
    downsample: Option<ConvBn>,
}

impl Block {
    fn new(vb: VarBuilder, kind: BlockKind, in_c: usize, planes: usize, stride: usize) -> Result<Self> {
        let out_c = planes * kind.expansion();
        let stages = match kind {
            BlockKind::Basic => vec![
                ConvBn::new(&vb, "conv1", "bn1", in_c, planes, 3, stride, 1)?,
                ConvBn::new(&vb, "conv2", "bn2", planes, planes, 3, 1, 1)?,
            ],
            BlockKind::Bottleneck => vec![
                ConvBn::new(&vb, "conv1", "bn1", in_c, planes, 1, 1, 0)?,
                ConvBn::new(&vb, "conv2", "bn2", planes, planes, 3, stride, 1)?,
                ConvBn::new(&vb, "conv3", "bn3", planes, out_c, 1, 1, 0)?,
            ],
        };
        let downsample = if stride != 1 || in_c != out_c {
            Some(ConvBn::new(&vb, "downsample.0", "downsample.1", in_c, out_c, 1, stride, 0)?)
        } else {
            None
        };
        Ok(Self { stages, downsample })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let last = self.stages.len() - 1;
        let mut out = xs.clone();
        for (i, stage) in self.stages.iter().enumerate() {
            out = stage.forward(&out)?;
            if i < last {
                out = out.relu()?;
            }
        }
        let identity = match &self.downsample {
            Some(ds) => ds.forward(xs)?,
            None => xs.clone(),
        };
        (out + identity)?.relu()
    }
}

/// ResNet feature extractor and classifier
#[derive(Debug)]
pub struct ResNet {
    stem: ConvBn,
    layers: Vec<Vec<Block>>,
    dropout: McDropout,
    fc: Linear,
}

impl ResNet {
    /// Build a ResNet from a weight source
    ///
    /// # Arguments
    ///
    /// * `vb` - Weights, rooted at the state dict top level
    /// * `kind` - Block flavor
    /// * `depths` - Blocks per stage (`[2, 2, 2, 2]` for ResNet-18, `[3, 4, 6, 3]` for ResNet-50)
    /// * `num_classes` - Size of the final layer
    /// * `dropout` - Probability of the dropout in front of `fc`
    pub fn new(
        vb: VarBuilder,
        kind: BlockKind,
        depths: [usize; 4],
        num_classes: usize,
        dropout: f32,
    ) -> Result<Self> {
        let stem = ConvBn::new(&vb, "conv1", "bn1", 3, 64, 7, 2, 3)?;

        let mut in_c = 64;
        let mut layers = Vec::with_capacity(4);
        for (stage, &depth) in depths.iter().enumerate() {
            let planes = 64 << stage;
            let stride = if stage == 0 { 1 } else { 2 };
            let vb_layer = vb.pp(format!("layer{}", stage + 1));
            let mut blocks = Vec::with_capacity(depth);
            for j in 0..depth {
                let block_stride = if j == 0 { stride } else { 1 };
                blocks.push(Block::new(vb_layer.pp(j.to_string()), kind, in_c, planes, block_stride)?);
                in_c = planes * kind.expansion();
            }
            layers.push(blocks);
        }

        let fc_vb = if dropout > 0.0 { vb.pp("fc").pp("1") } else { vb.pp("fc") };
        let fc = linear(in_c, num_classes, fc_vb)?;

        Ok(Self {
            stem,
            layers,
            dropout: McDropout::new(dropout),
            fc,
        })
    }

    /// 18-layer variant
    pub fn resnet18(vb: VarBuilder, num_classes: usize, dropout: f32) -> Result<Self> {
        Self::new(vb, BlockKind::Basic, [2, 2, 2, 2], num_classes, dropout)
    }

    /// 50-layer variant
    pub fn resnet50(vb: VarBuilder, num_classes: usize, dropout: f32) -> Result<Self> {
        Self::new(vb, BlockKind::Bottleneck, [3, 4, 6, 3], num_classes, dropout)
    }

    /// Stem and residual stages; the output is the `layer4` map
    pub fn features(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = padded_max_pool(&self.stem.forward(xs)?.relu()?)?;
        for layer in &self.layers {
            for block in layer {
                xs = block.forward(&xs)?;
            }
        }
        Ok(xs)
    }

    /// Global pooling and classifier, returning raw scores
    pub fn head(&self, features: &Tensor, mode: &mut DropoutMode<'_>) -> Result<Tensor> {
        let xs = global_avg_pool(features)?;
        let xs = self.dropout.forward(&xs, mode)?;
        self.fc.forward(&xs)
    }

    /// Number of dropout layers that resample under Monte-Carlo dropout
    pub fn dropout_layers(&self) -> usize {
        usize::from(self.dropout.is_active())
    }
}
