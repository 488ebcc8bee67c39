//! Layers shared by the classifier architectures

use candle_core::{Result, Tensor, D};
use rand::rngs::StdRng;
use rand::Rng;

/// How dropout layers behave during a forward pass
///
/// Batch normalization is not affected by this mode: it always uses its running
/// statistics.
pub enum DropoutMode<'a> {
    /// Dropout is the identity (deterministic inference)
    Inference,
    /// Dropout samples a fresh mask from the given generator on every call
    Stochastic(&'a mut StdRng),
}

/// Dropout that can stay active at inference time for Monte-Carlo sampling
///
/// Masks come from a caller-provided [`StdRng`] so sampling is reproducible
/// under a fixed seed. Kept activations are scaled by `1 / (1 - p)`.
#[derive(Debug, Clone)]
pub struct McDropout {
    p: f32,
}

impl McDropout {
    /// Create a dropout layer with drop probability `p`
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// Whether the layer can change its input at all
    pub fn is_active(&self) -> bool {
        self.p > 0.0
    }

    /// Apply the layer
    pub fn forward(&self, xs: &Tensor, mode: &mut DropoutMode<'_>) -> Result<Tensor> {
        if !self.is_active() {
            return Ok(xs.clone());
        }
        let rng = match mode {
            DropoutMode::Inference => return Ok(xs.clone()),
            DropoutMode::Stochastic(rng) => rng,
        };

        let keep = 1.0 - self.p;
        let scale = 1.0 / keep;
        let mask: Vec<f32> = (0..xs.elem_count())
            .map(|_| if rng.gen::<f32>() < keep { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_vec(mask, xs.dims(), xs.device())?.to_dtype(xs.dtype())?;
        xs.mul(&mask)
    }
}

/// Average-pool an N×C×H×W tensor to a fixed `out_h`×`out_w` grid
///
/// Bin boundaries follow the usual adaptive pooling rule
/// (`floor(i·H/out)` to `ceil((i+1)·H/out)`), so inputs smaller than the
/// output grid repeat cells.
pub fn adaptive_avg_pool2d(xs: &Tensor, out_h: usize, out_w: usize) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    if h == out_h && w == out_w {
        return Ok(xs.clone());
    }

    let mut rows = Vec::with_capacity(out_h);
    for i in 0..out_h {
        let h0 = i * h / out_h;
        let h1 = ((i + 1) * h).div_ceil(out_h);
        let band = xs.narrow(2, h0, h1 - h0)?;

        let mut cells = Vec::with_capacity(out_w);
        for j in 0..out_w {
            let w0 = j * w / out_w;
            let w1 = ((j + 1) * w).div_ceil(out_w);
            let cell = band
                .narrow(3, w0, w1 - w0)?
                .mean_keepdim(3)?
                .mean_keepdim(2)?;
            cells.push(cell);
        }
        rows.push(Tensor::cat(&cells, 3)?);
    }
    Tensor::cat(&rows, 2)
}

/// Global average pooling: N×C×H×W → N×C
pub fn global_avg_pool(xs: &Tensor) -> Result<Tensor> {
    xs.mean(D::Minus1)?.mean(D::Minus1)
}

/// Max pooling built from strided gathers so it can be differentiated
///
/// Equivalent to `max_pool2d_with_stride(kernel, stride)` without padding.
/// Each kernel offset gathers its strided window with `index_select` and the
/// windows are reduced with element-wise `maximum`. Used wherever a backward
/// pass must cross the pool and the kernel differs from the stride.
pub fn strided_max_pool(xs: &Tensor, kernel: usize, stride: usize) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    if kernel == 0 || stride == 0 || h < kernel || w < kernel {
        candle_core::bail!(
            "cannot max-pool a {}x{} map with kernel {} and stride {}",
            h,
            w,
            kernel,
            stride
        );
    }
    let out_h = (h - kernel) / stride + 1;
    let out_w = (w - kernel) / stride + 1;
    let offsets = |len: usize, start: usize| -> Result<Tensor> {
        let index: Vec<u32> = (0..len).map(|i| (i * stride + start) as u32).collect();
        Tensor::from_vec(index, len, xs.device())
    };

    let mut pooled: Option<Tensor> = None;
    for di in 0..kernel {
        let rows = xs.index_select(&offsets(out_h, di)?, 2)?;
        for dj in 0..kernel {
            let window = rows.index_select(&offsets(out_w, dj)?, 3)?;
            pooled = Some(match pooled {
                Some(acc) => acc.maximum(&window)?,
                None => window,
            });
        }
    }
    pooled.ok_or_else(|| candle_core::Error::Msg("empty pooling kernel".to_string()))
}

/// 3×3 stride-2 max pooling with one pixel of padding
///
/// Zero padding equals `-inf` padding here because callers only pool
/// post-ReLU activations.
pub fn padded_max_pool(xs: &Tensor) -> Result<Tensor> {
    xs.pad_with_zeros(D::Minus1, 1, 1)?
        .pad_with_zeros(D::Minus2, 1, 1)?
        .max_pool2d_with_stride(3, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_dropout_identity_in_inference() {
        let xs = Tensor::ones((2, 8), candle_core::DType::F32, &Device::Cpu).unwrap();
        let dropout = McDropout::new(0.5);
        let ys = dropout.forward(&xs, &mut DropoutMode::Inference).unwrap();
        assert_eq!(ys.to_vec2::<f32>().unwrap(), xs.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_dropout_is_reproducible_with_seed() {
        let xs = Tensor::ones((1, 64), candle_core::DType::F32, &Device::Cpu).unwrap();
        let dropout = McDropout::new(0.5);

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = dropout
            .forward(&xs, &mut DropoutMode::Stochastic(&mut rng_a))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let b = dropout
            .forward(&xs, &mut DropoutMode::Stochastic(&mut rng_b))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert_eq!(a, b);
        // Kept units are rescaled by 1 / (1 - p)
        assert!(a.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(a.iter().any(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_probability_dropout_is_inactive() {
        let dropout = McDropout::new(0.0);
        assert!(!dropout.is_active());
        let xs = Tensor::new(&[[1.0f32, 2.0, 3.0]], &Device::Cpu).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let ys = dropout
            .forward(&xs, &mut DropoutMode::Stochastic(&mut rng))
            .unwrap();
        assert_eq!(ys.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_adaptive_avg_pool_shapes() {
        let xs = Tensor::arange(0f32, 16.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap();
        let pooled = adaptive_avg_pool2d(&xs, 2, 2).unwrap();
        assert_eq!(pooled.dims(), &[1, 1, 2, 2]);
        let values = pooled.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![2.5, 4.5, 10.5, 12.5]);

        let upsampled = adaptive_avg_pool2d(&xs, 6, 6).unwrap();
        assert_eq!(upsampled.dims(), &[1, 1, 6, 6]);
    }

    #[test]
    fn test_strided_max_pool_matches_builtin_pool() {
        let xs = Tensor::randn(0f32, 1.0, (1, 4, 13, 13), &Device::Cpu).unwrap();
        let ours = strided_max_pool(&xs, 3, 2).unwrap();
        let builtin = xs.max_pool2d_with_stride(3, 2).unwrap();
        assert_eq!(ours.dims(), &[1, 4, 6, 6]);
        assert_eq!(
            ours.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            builtin.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_strided_max_pool_backpropagates() {
        let xs = candle_core::Var::from_tensor(
            &Tensor::arange(0f32, 25.0, &Device::Cpu)
                .unwrap()
                .reshape((1, 1, 5, 5))
                .unwrap(),
        )
        .unwrap();
        let pooled = strided_max_pool(xs.as_tensor(), 3, 2).unwrap();
        assert_eq!(
            pooled.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![12.0, 14.0, 22.0, 24.0]
        );

        let grads = pooled.sum_all().unwrap().backward().unwrap();
        let grad = grads
            .get(xs.as_tensor())
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        // Only the window maxima receive gradient
        assert_eq!(grad.iter().filter(|&&g| g != 0.0).count(), 4);
        assert_eq!(grad[24], 1.0);
    }

    #[test]
    fn test_strided_max_pool_rejects_small_maps() {
        let xs = Tensor::zeros((1, 1, 2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(strided_max_pool(&xs, 3, 2).is_err());
    }

    #[test]
    fn test_global_avg_pool() {
        let xs = Tensor::ones((2, 3, 4, 5), candle_core::DType::F32, &Device::Cpu).unwrap();
        let pooled = global_avg_pool(&xs).unwrap();
        assert_eq!(pooled.dims(), &[2, 3]);
    }
}
