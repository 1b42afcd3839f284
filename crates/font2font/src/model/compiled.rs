//! Built model bound to a device.
//!
//! `ModelConfig::build` validates the configuration, seeds the backend and
//! instantiates the generator plus the configured discriminator. Training,
//! export, inference and evaluation are methods on the returned
//! [`CompiledModel`], so none of them can run before a device is attached.

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use super::config::{DiscriminatorKind, ModelConfig};
use super::discriminator::{
    ClassifierConfig, ClassifierDiscriminator, EnergyConfig, EnergyDiscriminator, NoDiscriminator,
};
use super::generator::{Generator, GeneratorConfig};
use crate::error::Result;

/// Device and RNG seed a model is built against.
#[derive(Debug, Clone)]
pub struct Session<B: Backend> {
    device: B::Device,
    seed: Option<u64>,
}

impl<B: Backend> Session<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device, seed: None }
    }

    /// Seed the backend RNG before parameters are initialized.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// The discriminator built for a [`ModelConfig`].
#[derive(Debug, Clone)]
pub enum Critic<B: Backend> {
    Classifier(ClassifierDiscriminator<B>),
    EnergyReconstructor(EnergyDiscriminator<B>),
    None(NoDiscriminator<B>),
}

impl<B: Backend> Critic<B> {
    pub fn kind(&self) -> DiscriminatorKind {
        match self {
            Critic::Classifier(_) => DiscriminatorKind::Classifier,
            Critic::EnergyReconstructor(_) => DiscriminatorKind::EnergyReconstructor,
            Critic::None(_) => DiscriminatorKind::None,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Critic::Classifier(d) => d.num_params(),
            Critic::EnergyReconstructor(d) => d.num_params(),
            Critic::None(_) => 0,
        }
    }
}

impl<B: AutodiffBackend> Critic<B> {
    pub fn valid(&self) -> Critic<B::InnerBackend> {
        match self {
            Critic::Classifier(d) => Critic::Classifier(d.valid()),
            Critic::EnergyReconstructor(d) => Critic::EnergyReconstructor(d.valid()),
            Critic::None(_) => Critic::None(NoDiscriminator::new()),
        }
    }
}

/// Generator and discriminator, initialized on a device.
#[derive(Debug, Clone)]
pub struct CompiledModel<B: Backend> {
    pub(crate) config: ModelConfig,
    pub(crate) generator: Generator<B>,
    pub(crate) critic: Critic<B>,
    pub(crate) device: B::Device,
}

impl ModelConfig {
    /// Validate, seed and instantiate every module on the session's device.
    pub fn build<B: Backend>(&self, session: Session<B>) -> Result<CompiledModel<B>> {
        self.validate()?;
        if let Some(seed) = session.seed {
            B::seed(seed);
        }
        let device = session.device;

        let generator = GeneratorConfig::new(self.input_filters, self.output_filters, self.generator_dim)
            .with_dropout(self.dropout)
            .init(&device);
        let pair_channels = self.pair_channels();
        let critic = match self.discriminator {
            DiscriminatorKind::Classifier => Critic::Classifier(
                ClassifierConfig::new(pair_channels, self.discriminator_dim, self.width).init(&device),
            ),
            DiscriminatorKind::EnergyReconstructor => Critic::EnergyReconstructor(
                EnergyConfig::new(pair_channels, self.output_filters, self.discriminator_dim)
                    .with_dropout(self.dropout)
                    .init(&device),
            ),
            DiscriminatorKind::None => Critic::None(NoDiscriminator::new()),
        };

        tracing::info!(
            discriminator = %self.discriminator,
            width = self.width,
            generator_params = generator.num_params(),
            discriminator_params = critic.num_params(),
            "Built font2font model"
        );

        Ok(CompiledModel {
            config: self.clone(),
            generator,
            critic,
            device,
        })
    }
}

impl<B: Backend> CompiledModel<B> {
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn critic(&self) -> &Critic<B> {
        &self.critic
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Translate a batch of sources with the current generator.
    pub fn generate(&self, source: Tensor<B, 4>) -> Tensor<B, 4> {
        self.generator.forward(source).0
    }
}

impl<B: AutodiffBackend> CompiledModel<B> {
    /// Inference-mode copy: running batch-norm statistics, no dropout.
    pub fn valid(&self) -> CompiledModel<B::InnerBackend> {
        CompiledModel {
            config: self.config.clone(),
            generator: self.generator.valid(),
            critic: self.critic.valid(),
            device: self.device.clone(),
        }
    }
}
