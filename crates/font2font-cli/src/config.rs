//! TOML config loading for the font2font CLI.
//!
//! Deserializes `configs/font2font.toml`, which has optional `[model]`,
//! `[training]` and `[evaluation]` sections, then merges it with CLI flags.
//! Priority chain: built-in defaults < TOML values < CLI flags.

use std::path::Path;

use font2font::{DiscriminatorKind, EvaluationConfig, ModelConfig, TrainingConfig};
use serde::Deserialize;

/// Top-level structure matching `configs/font2font.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Font2FontToml {
    #[serde(default)]
    pub model: ModelOverrides,
    #[serde(default)]
    pub training: TrainingOverrides,
    #[serde(default)]
    pub evaluation: EvaluationOverrides,
}

/// Optional overrides for `ModelConfig` fields.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelOverrides {
    pub batch_size: Option<usize>,
    pub width: Option<usize>,
    pub generator_dim: Option<usize>,
    pub discriminator_dim: Option<usize>,
    pub l1_penalty: Option<f64>,
    pub lconst_penalty: Option<f64>,
    pub ltv_penalty: Option<f64>,
    pub lcategory_penalty: Option<f64>,
    pub input_filters: Option<usize>,
    pub output_filters: Option<usize>,
    pub dropout: Option<f64>,
    pub discriminator: Option<DiscriminatorKind>,
    pub energy_margin: Option<f64>,
    pub no_target_blend: Option<f64>,
}

/// Optional overrides for `TrainingConfig` fields.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingOverrides {
    pub experiment_id: Option<usize>,
    pub epochs: Option<usize>,
    pub lr: Option<f64>,
    pub beta_1: Option<f64>,
    pub schedule: Option<usize>,
    pub min_lr: Option<f64>,
    pub resume: Option<bool>,
    pub freeze_encoder: Option<bool>,
    pub no_target_source: Option<bool>,
    pub sample_steps: Option<usize>,
    pub checkpoint_steps: Option<usize>,
    pub max_checkpoints: Option<usize>,
    pub l1_warmup_steps: Option<usize>,
    pub generator_steps: Option<usize>,
    pub seed: Option<u64>,
    pub accuracy_threshold: Option<f64>,
}

/// Optional overrides for `EvaluationConfig` fields.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationOverrides {
    pub threshold: Option<f64>,
    pub similarity_metrics: Option<bool>,
    pub ssim_high: Option<f64>,
    pub ssim_low: Option<f64>,
    pub batch_size: Option<usize>,
}

/// Load and deserialize a `Font2FontToml` from a TOML file.
pub fn load_config_toml(path: &Path) -> anyhow::Result<Font2FontToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: Font2FontToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded font2font config");
    Ok(config)
}

/// Load the TOML file if one was given, otherwise use empty overrides.
pub fn load_optional_toml(path: Option<&Path>) -> anyhow::Result<Font2FontToml> {
    match path {
        Some(path) => load_config_toml(path),
        None => Ok(Font2FontToml::default()),
    }
}

impl ModelOverrides {
    pub fn apply(&self, mut config: ModelConfig) -> ModelConfig {
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.width {
            config.width = v;
        }
        if let Some(v) = self.generator_dim {
            config.generator_dim = v;
        }
        if let Some(v) = self.discriminator_dim {
            config.discriminator_dim = v;
        }
        if let Some(v) = self.l1_penalty {
            config.l1_penalty = v;
        }
        if let Some(v) = self.lconst_penalty {
            config.lconst_penalty = v;
        }
        if let Some(v) = self.ltv_penalty {
            config.ltv_penalty = v;
        }
        if let Some(v) = self.lcategory_penalty {
            config.lcategory_penalty = v;
        }
        if let Some(v) = self.input_filters {
            config.input_filters = v;
        }
        if let Some(v) = self.output_filters {
            config.output_filters = v;
        }
        if let Some(v) = self.dropout {
            config.dropout = v;
        }
        if let Some(v) = self.discriminator {
            config.discriminator = v;
        }
        if let Some(v) = self.energy_margin {
            config.energy_margin = v;
        }
        if let Some(v) = self.no_target_blend {
            config.no_target_blend = v;
        }
        config
    }
}

impl TrainingOverrides {
    pub fn apply(&self, mut config: TrainingConfig) -> TrainingConfig {
        if let Some(v) = self.experiment_id {
            config.experiment_id = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.lr {
            config.lr = v;
        }
        if let Some(v) = self.beta_1 {
            config.beta_1 = v;
        }
        if let Some(v) = self.schedule {
            config.schedule = v;
        }
        if let Some(v) = self.min_lr {
            config.min_lr = v;
        }
        if let Some(v) = self.resume {
            config.resume = v;
        }
        if let Some(v) = self.freeze_encoder {
            config.freeze_encoder = v;
        }
        if let Some(v) = self.no_target_source {
            config.no_target_source = v;
        }
        if let Some(v) = self.sample_steps {
            config.sample_steps = v;
        }
        if let Some(v) = self.checkpoint_steps {
            config.checkpoint_steps = v;
        }
        if let Some(v) = self.max_checkpoints {
            config.max_checkpoints = v;
        }
        if let Some(v) = self.l1_warmup_steps {
            config.l1_warmup_steps = v;
        }
        if let Some(v) = self.generator_steps {
            config.generator_steps = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.accuracy_threshold {
            config.accuracy_threshold = v;
        }
        config
    }
}

impl EvaluationOverrides {
    pub fn apply(&self, mut config: EvaluationConfig) -> EvaluationConfig {
        if let Some(v) = self.threshold {
            config.threshold = v;
        }
        if let Some(v) = self.similarity_metrics {
            config.similarity_metrics = v;
        }
        if let Some(v) = self.ssim_high {
            config.ssim_high = v;
        }
        if let Some(v) = self.ssim_low {
            config.ssim_low = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        config
    }
}

/// Build a `ModelConfig` from a base, TOML overrides and CLI flags.
///
/// The base is the built-in default for training, or the config a training
/// run saved next to its checkpoints when restoring.
pub fn build_model_config(base: ModelConfig, toml: &ModelOverrides, cli: &ModelOverrides) -> ModelConfig {
    cli.apply(toml.apply(base))
}

/// Build a `TrainingConfig` from defaults, TOML overrides and CLI flags.
pub fn build_training_config(toml: &TrainingOverrides, cli: &TrainingOverrides) -> TrainingConfig {
    cli.apply(toml.apply(TrainingConfig::new()))
}

/// Build an `EvaluationConfig` from defaults, TOML overrides and CLI flags.
///
/// The experiment id always follows the model's training config.
pub fn build_evaluation_config(
    toml: &EvaluationOverrides,
    cli: &EvaluationOverrides,
    experiment_id: usize,
) -> EvaluationConfig {
    cli.apply(toml.apply(EvaluationConfig::new()))
        .with_experiment_id(experiment_id)
}
