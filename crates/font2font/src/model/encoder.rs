//! Downsampling half of the generator, also reused by the energy discriminator.
//!
//! Eight stride-2 convolutions take a `width x width` image down to `1 x 1`.
//! Every stage activation is kept so the decoder can mirror it through skip
//! connections.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;

/// Number of stride-2 stages in the encoder (and the decoder).
pub const STAGES: usize = 8;

/// Channel multiplier of each encoder stage relative to the base width.
pub const STAGE_MULTIPLIERS: [usize; STAGES] = [1, 2, 4, 8, 8, 8, 8, 8];

pub(crate) const KERNEL: usize = 5;
pub(crate) const LEAKY_SLOPE: f64 = 0.2;

/// Spatial side of every encoder stage for a `width x width` input.
///
/// Each stride-2 stage rounds up, so at width 128 the last two stages are
/// both `1 x 1`.
pub fn stage_sizes(width: usize) -> [usize; STAGES] {
    let mut sizes = [0; STAGES];
    let mut side = width;
    for size in sizes.iter_mut() {
        side = side.div_ceil(2);
        *size = side;
    }
    sizes
}

pub(crate) fn weight_init() -> Initializer {
    Initializer::Normal { mean: 0.0, std: 0.02 }
}

/// Configuration for [`Encoder`].
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Channels of the input image.
    pub in_channels: usize,
    /// Width of the first stage; later stages multiply it.
    pub base_dim: usize,
}

/// Stack of 8 stride-2 convolutions.
///
/// Stage 1 is a bare convolution; stages 2..=8 are leaky relu, convolution,
/// batch norm.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub(crate) convs: Vec<Conv2d<B>>,
    /// One norm per stage from the second onward.
    norms: Vec<BatchNorm<B, 2>>,
}

/// Result of an encoder pass.
#[derive(Debug, Clone)]
pub struct Encoded<B: Backend> {
    /// Output of the last stage, shape `(batch, 8 * base_dim, 1, 1)`.
    pub bottleneck: Tensor<B, 4>,
    /// Activation of every stage; `layers[0]` is stage 1.
    pub layers: Vec<Tensor<B, 4>>,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let mut convs = Vec::with_capacity(STAGES);
        let mut norms = Vec::with_capacity(STAGES - 1);
        let mut in_channels = self.in_channels;

        for (stage, multiplier) in STAGE_MULTIPLIERS.iter().enumerate() {
            let out_channels = self.base_dim * multiplier;
            convs.push(
                Conv2dConfig::new([in_channels, out_channels], [KERNEL, KERNEL])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(2, 2))
                    .with_initializer(weight_init())
                    .init(device),
            );
            if stage > 0 {
                norms.push(BatchNormConfig::new(out_channels).init(device));
            }
            in_channels = out_channels;
        }

        Encoder { convs, norms }
    }
}

impl<B: Backend> Encoder<B> {
    /// Run all stages.
    ///
    /// # Shapes
    /// - `images`: `(batch, in_channels, width, width)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Encoded<B> {
        let mut layers = Vec::with_capacity(STAGES);
        let mut x = self.convs[0].forward(images);
        layers.push(x.clone());

        for (conv, norm) in self.convs.iter().skip(1).zip(&self.norms) {
            x = norm.forward(conv.forward(leaky_relu(x, LEAKY_SLOPE)));
            layers.push(x.clone());
        }

        Encoded { bottleneck: x, layers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_stage_sizes_round_up() {
        assert_eq!(stage_sizes(128), [64, 32, 16, 8, 4, 2, 1, 1]);
        assert_eq!(stage_sizes(256), [128, 64, 32, 16, 8, 4, 2, 1]);
        assert_eq!(stage_sizes(384), [192, 96, 48, 24, 12, 6, 3, 2]);
    }

    #[test]
    fn test_stage_shapes_follow_stage_sizes() {
        let device = Default::default();
        let encoder = EncoderConfig::new(2, 3).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 2, 128, 128], &device);

        let encoded = encoder.forward(images);
        assert_eq!(encoded.layers.len(), STAGES);
        for (stage, (layer, side)) in encoded.layers.iter().zip(stage_sizes(128)).enumerate() {
            let channels = 3 * STAGE_MULTIPLIERS[stage];
            assert_eq!(layer.dims(), [2, channels, side, side], "stage {}", stage + 1);
        }
        assert_eq!(encoded.bottleneck.dims(), [2, 24, 1, 1]);
    }
}
