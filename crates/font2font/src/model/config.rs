//! Hyperparameters fixed at model construction.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Font2FontError;

/// Number of halvings the encoder applies; width must survive all of them.
pub const WIDTH_DIVISOR: usize = 128;

/// Which judge (if any) sits opposite the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscriminatorKind {
    /// Binary real/fake classifier trained with cross-entropy.
    Classifier,
    /// Encoder-decoder that reconstructs its input; reconstruction error is the energy.
    EnergyReconstructor,
    /// Generator-only regression (L1 + total variation).
    None,
}

impl fmt::Display for DiscriminatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscriminatorKind::Classifier => write!(f, "classifier"),
            DiscriminatorKind::EnergyReconstructor => write!(f, "energy_reconstructor"),
            DiscriminatorKind::None => write!(f, "none"),
        }
    }
}

impl FromStr for DiscriminatorKind {
    type Err = Font2FontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classifier" | "cgan" => Ok(DiscriminatorKind::Classifier),
            "energy_reconstructor" | "energy" | "ebgan" => Ok(DiscriminatorKind::EnergyReconstructor),
            "none" | "ave" => Ok(DiscriminatorKind::None),
            other => Err(Font2FontError::InvalidConfig(format!(
                "unknown discriminator variant '{other}'"
            ))),
        }
    }
}

/// Model hyperparameters.
///
/// Paired inputs carry `output_filters` target channels followed by
/// `input_filters` source channels.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Examples per optimizer step.
    #[config(default = 16)]
    pub batch_size: usize,
    /// Spatial width of both input and output (images are square).
    #[config(default = 256)]
    pub width: usize,
    /// Base channel width of the generator.
    #[config(default = 64)]
    pub generator_dim: usize,
    /// Base channel width of the discriminator.
    #[config(default = 64)]
    pub discriminator_dim: usize,
    #[config(default = 100.0)]
    pub l1_penalty: f64,
    #[config(default = 15.0)]
    pub lconst_penalty: f64,
    #[config(default = 0.0)]
    pub ltv_penalty: f64,
    /// Kept for configuration compatibility; none of the variants has a category head.
    #[config(default = 1.0)]
    pub lcategory_penalty: f64,
    /// Channels of the source glyph.
    #[config(default = 1)]
    pub input_filters: usize,
    /// Channels of the target glyph.
    #[config(default = 1)]
    pub output_filters: usize,
    /// Dropout probability in the first three decoder stages.
    #[config(default = 0.5)]
    pub dropout: f64,
    #[config(default = "DiscriminatorKind::Classifier")]
    pub discriminator: DiscriminatorKind,
    /// Hinge margin on the fake reconstruction energy.
    #[config(default = 100.0)]
    pub energy_margin: f64,
    /// Weight of the no-target auxiliary terms when blended with the paired ones.
    #[config(default = 0.5)]
    pub no_target_blend: f64,
}

impl ModelConfig {
    /// Reject configurations the architecture cannot realise.
    pub fn validate(&self) -> crate::Result<()> {
        if self.width == 0 || self.width % WIDTH_DIVISOR != 0 {
            return Err(Font2FontError::InvalidWidth(self.width));
        }
        if self.batch_size == 0 {
            return Err(Font2FontError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.generator_dim == 0 || self.discriminator_dim == 0 {
            return Err(Font2FontError::InvalidConfig(
                "generator_dim and discriminator_dim must be > 0".into(),
            ));
        }
        if self.input_filters == 0 || self.output_filters == 0 {
            return Err(Font2FontError::InvalidConfig(
                "input_filters and output_filters must be > 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Font2FontError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(0.0..=1.0).contains(&self.no_target_blend) {
            return Err(Font2FontError::InvalidConfig(format!(
                "no_target_blend must be in [0, 1], got {}",
                self.no_target_blend
            )));
        }
        Ok(())
    }

    /// Channel count of a channel-concatenated (target, source) example.
    pub fn pair_channels(&self) -> usize {
        self.input_filters + self.output_filters
    }
}
