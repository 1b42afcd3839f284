//! U-Net style generator: encoder and skip-connected decoder.

use burn::prelude::*;

use super::decoder::{Decoder, DecoderConfig};
use super::encoder::{Encoder, EncoderConfig};

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub base_dim: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Source glyph in, target glyph out.
///
/// The encoder and decoder are separate sub-modules so that optimizer steps
/// can be restricted to the decoder (`freeze_encoder`).
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        Generator {
            encoder: EncoderConfig::new(self.in_channels, self.base_dim).init(device),
            decoder: DecoderConfig::new(self.base_dim, self.out_channels)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Translate `source` and return `(output, bottleneck)`.
    pub fn forward(&self, source: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let width = source.dims()[3];
        let encoded = self.encoder.forward(source);
        let bottleneck = encoded.bottleneck.clone();
        let output = self.decoder.forward(encoded.bottleneck, &encoded.layers, width);
        (output, bottleneck)
    }

    /// Bottleneck of `images` under the same encoder parameters.
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.encoder.forward(images).bottleneck
    }
}
