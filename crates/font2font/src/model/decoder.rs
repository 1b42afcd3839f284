//! Upsampling half of the generator.

use burn::nn::conv::{ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, tanh};

use super::encoder::{stage_sizes, weight_init, KERNEL, STAGES, STAGE_MULTIPLIERS};

/// Decoder stages (counted from the first) that apply dropout.
const DROPOUT_STAGES: usize = 3;

#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Base width shared with the mirrored encoder.
    pub base_dim: usize,
    /// Channels of the reconstructed image.
    pub out_channels: usize,
    /// Concatenate mirrored encoder activations after stages 1..=7.
    #[config(default = true)]
    pub skip_connections: bool,
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Eight stride-2 transposed convolutions ending in tanh.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub(crate) deconvs: Vec<ConvTranspose2d<B>>,
    /// Norms for stages 1..=7; the last stage is not normalized.
    norms: Vec<BatchNorm<B, 2>>,
    pub(crate) dropout: Dropout,
    skip_connections: bool,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        let mut deconvs = Vec::with_capacity(STAGES);
        let mut norms = Vec::with_capacity(STAGES - 1);
        let mut in_channels = self.base_dim * STAGE_MULTIPLIERS[STAGES - 1];

        for stage in 0..STAGES {
            let last = stage == STAGES - 1;
            let out_channels = if last {
                self.out_channels
            } else {
                // Mirror of encoder stage 7 - stage.
                self.base_dim * STAGE_MULTIPLIERS[STAGES - 2 - stage]
            };
            deconvs.push(
                ConvTranspose2dConfig::new([in_channels, out_channels], [KERNEL, KERNEL])
                    .with_stride([2, 2])
                    .with_padding([2, 2])
                    .with_padding_out([1, 1])
                    .with_initializer(weight_init())
                    .init(device),
            );
            if !last {
                norms.push(BatchNormConfig::new(out_channels).init(device));
            }
            in_channels = if self.skip_connections {
                out_channels * 2
            } else {
                out_channels
            };
        }

        Decoder {
            deconvs,
            norms,
            dropout: DropoutConfig::new(self.dropout).init(),
            skip_connections: self.skip_connections,
        }
    }
}

impl<B: Backend> Decoder<B> {
    /// Decode a bottleneck back to a `width x width` image.
    ///
    /// Every stage is cropped to the side of its mirrored encoder stage, so
    /// widths whose encoder rounds up (128, 384, ...) line up with the skips.
    /// `skips` are the encoder stage activations (`skips[0]` is stage 1); they
    /// are ignored when the decoder was built without skip connections.
    ///
    /// # Shapes
    /// - `bottleneck`: `(batch, 8 * base_dim, 1, 1)`
    /// - output: `(batch, out_channels, width, width)` with values in `[-1, 1]`
    pub fn forward(&self, bottleneck: Tensor<B, 4>, skips: &[Tensor<B, 4>], width: usize) -> Tensor<B, 4> {
        let sizes = stage_sizes(width);
        let last = self.deconvs.len() - 1;
        let mut x = bottleneck;

        for (stage, deconv) in self.deconvs.iter().enumerate() {
            if stage == last {
                x = crop(deconv.forward(relu(x)), width);
                break;
            }
            x = crop(deconv.forward(relu(x)), sizes[last - 1 - stage]);
            x = self.norms[stage].forward(x);
            if stage < DROPOUT_STAGES {
                x = self.dropout.forward(x);
            }
            if self.skip_connections {
                x = Tensor::cat(vec![x, skips[last - 1 - stage].clone()], 1);
            }
        }

        tanh(x)
    }
}

/// Keep the top-left `side x side` window.
fn crop<B: Backend>(x: Tensor<B, 4>, side: usize) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if height == side && width == side {
        return x;
    }
    x.narrow(2, 0, side.min(height)).narrow(3, 0, side.min(width))
}
