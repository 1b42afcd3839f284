//! Judges that sit opposite the generator.
//!
//! Both discriminators see the source glyph concatenated with a candidate
//! target on the channel axis. [`NoDiscriminator`] is the parameterless stand-in
//! for generator-only regression so that every variant trains through the
//! same generic loop.

use std::marker::PhantomData;

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, sigmoid};

use super::decoder::{Decoder, DecoderConfig};
use super::encoder::{weight_init, Encoder, EncoderConfig, KERNEL, LEAKY_SLOPE};

/// Channel multipliers of the classifier's conv stages.
const CLASSIFIER_MULTIPLIERS: [usize; 4] = [1, 2, 4, 8];

/// Configuration for [`ClassifierDiscriminator`].
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Channels of `(source, candidate)` concatenated.
    pub in_channels: usize,
    pub base_dim: usize,
    /// Square input side; fixes the size of the flattened feature map.
    pub width: usize,
}

/// Four stride-2 convolutions and a linear real/fake logit.
#[derive(Module, Debug)]
pub struct ClassifierDiscriminator<B: Backend> {
    convs: Vec<Conv2d<B>>,
    /// Applied after every stage but the first.
    norms: Vec<BatchNorm<B, 2>>,
    fc: Linear<B>,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierDiscriminator<B> {
        let mut convs = Vec::with_capacity(CLASSIFIER_MULTIPLIERS.len());
        let mut norms = Vec::with_capacity(CLASSIFIER_MULTIPLIERS.len() - 1);
        let mut in_channels = self.in_channels;

        for (stage, multiplier) in CLASSIFIER_MULTIPLIERS.iter().enumerate() {
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

        let side = self.width >> CLASSIFIER_MULTIPLIERS.len();
        let flat = in_channels * side * side;

        ClassifierDiscriminator {
            convs,
            norms,
            fc: LinearConfig::new(flat, 1).with_initializer(weight_init()).init(device),
        }
    }
}

impl<B: Backend> ClassifierDiscriminator<B> {
    /// Score a `(source, candidate)` pair.
    ///
    /// Returns `(probability, logit)`, both of shape `(batch, 1)`.
    pub fn forward(&self, source: Tensor<B, 4>, candidate: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = Tensor::cat(vec![source, candidate], 1);
        let mut x = leaky_relu(self.convs[0].forward(x), LEAKY_SLOPE);
        for (conv, norm) in self.convs.iter().skip(1).zip(&self.norms) {
            x = leaky_relu(norm.forward(conv.forward(x)), LEAKY_SLOPE);
        }

        let [batch, channels, height, width] = x.dims();
        let logit = self.fc.forward(x.reshape([batch, channels * height * width]));
        (sigmoid(logit.clone()), logit)
    }
}

/// Configuration for [`EnergyDiscriminator`].
#[derive(Config, Debug)]
pub struct EnergyConfig {
    pub in_channels: usize,
    /// Channels of the reconstruction; matches the target glyph.
    pub out_channels: usize,
    pub base_dim: usize,
    /// Dropout in the first decoder stages, as in the generator.
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Autoencoder whose reconstruction error is the energy of its input.
#[derive(Module, Debug)]
pub struct EnergyDiscriminator<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

impl EnergyConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EnergyDiscriminator<B> {
        EnergyDiscriminator {
            encoder: EncoderConfig::new(self.in_channels, self.base_dim).init(device),
            decoder: DecoderConfig::new(self.base_dim, self.out_channels)
                .with_skip_connections(false)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

impl<B: Backend> EnergyDiscriminator<B> {
    /// Reconstruct the candidate from the `(source, candidate)` pair.
    pub fn reconstruct(&self, source: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 4> {
        let width = candidate.dims()[3];
        let encoded = self.encoder.forward(Tensor::cat(vec![source, candidate], 1));
        self.decoder.forward(encoded.bottleneck, &[], width)
    }

    /// Per-sample mean squared reconstruction error, shape `(batch,)`.
    pub fn energy(&self, source: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 1> {
        let reconstruction = self.reconstruct(source, candidate.clone());
        let [batch, channels, height, width] = candidate.dims();
        (reconstruction - candidate)
            .powf_scalar(2.0)
            .reshape([batch, channels * height * width])
            .mean_dim(1)
            .reshape([batch])
    }
}

/// Parameterless placeholder used when training without a discriminator.
#[derive(Module, Debug)]
pub struct NoDiscriminator<B: Backend> {
    phantom: PhantomData<B>,
}

impl<B: Backend> NoDiscriminator<B> {
    pub fn new() -> Self {
        Self { phantom: PhantomData }
    }
}

impl<B: Backend> Default for NoDiscriminator<B> {
    fn default() -> Self {
        Self::new()
    }
}
