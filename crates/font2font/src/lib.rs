//! Glyph-to-glyph translation GAN.
//!
//! A U-Net style generator maps a source glyph to a target glyph. It is
//! trained against one of three judges (a real/fake classifier, an energy
//! reconstructor, or none at all) with L1, encoder-constancy and
//! total-variation terms. Checkpoints, samples and evaluation outputs are
//! written under an experiment directory.

pub mod error;
pub mod imaging;
pub mod inference;
pub mod model;
pub mod training;

pub use error::{Font2FontError, Result};
pub use inference::{EvaluationConfig, EvaluationReport};
pub use model::bridge::ImageBatch;
pub use model::compiled::{CompiledModel, Critic, Session};
pub use model::config::{DiscriminatorKind, ModelConfig};
pub use training::data::{InMemoryPairs, InMemorySources, PairedProvider, SourceProvider};
pub use training::trainer::TrainingConfig;
