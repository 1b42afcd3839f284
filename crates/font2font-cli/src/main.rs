//! font2font command-line interface.
//!
//! Subcommands:
//! - `train`: fit a generator on `[target | source]` PNG pairs
//! - `export`: extract the generator of the latest checkpoint
//! - `infer`: translate a directory of source glyphs
//! - `evaluate`: score a generator on held-out pairs

mod config;
mod pipeline;
pub mod results;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use font2font::DiscriminatorKind;
use tracing_subscriber::EnvFilter;

use crate::config::{EvaluationOverrides, ModelOverrides, TrainingOverrides};

#[derive(Parser)]
#[command(name = "font2font", version, about = "Glyph-to-glyph translation GAN")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Model hyperparameter overrides shared by every subcommand.
#[derive(Args, Debug, Default)]
struct ModelFlags {
    /// Examples per batch.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Side length of a glyph image; must be a multiple of 128.
    #[arg(long)]
    width: Option<usize>,
    /// Base channel width of the generator.
    #[arg(long)]
    generator_dim: Option<usize>,
    /// Base channel width of the discriminator.
    #[arg(long)]
    discriminator_dim: Option<usize>,
    /// Weight of the L1 reconstruction term.
    #[arg(long)]
    l1_penalty: Option<f64>,
    /// Weight of the encoder constancy term.
    #[arg(long)]
    lconst_penalty: Option<f64>,
    /// Weight of the total-variation term.
    #[arg(long)]
    ltv_penalty: Option<f64>,
    /// Channels of the source glyph (1 or 3).
    #[arg(long)]
    input_filters: Option<usize>,
    /// Channels of the target glyph (1 or 3).
    #[arg(long)]
    output_filters: Option<usize>,
    /// Dropout probability in the first decoder stages.
    #[arg(long)]
    dropout: Option<f64>,
    /// Discriminator variant: classifier, energy_reconstructor or none.
    #[arg(long)]
    discriminator: Option<DiscriminatorKind>,
    /// Hinge margin of the energy discriminator.
    #[arg(long)]
    energy_margin: Option<f64>,
    /// Weight of the no-target terms in the blended losses.
    #[arg(long)]
    no_target_blend: Option<f64>,
}

impl From<ModelFlags> for ModelOverrides {
    fn from(flags: ModelFlags) -> Self {
        ModelOverrides {
            batch_size: flags.batch_size,
            width: flags.width,
            generator_dim: flags.generator_dim,
            discriminator_dim: flags.discriminator_dim,
            l1_penalty: flags.l1_penalty,
            lconst_penalty: flags.lconst_penalty,
            ltv_penalty: flags.ltv_penalty,
            lcategory_penalty: None,
            input_filters: flags.input_filters,
            output_filters: flags.output_filters,
            dropout: flags.dropout,
            discriminator: flags.discriminator,
            energy_margin: flags.energy_margin,
            no_target_blend: flags.no_target_blend,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train a generator on paired glyph images.
    Train {
        /// Path to a font2font config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Root directory for checkpoints, samples and logs.
        #[arg(long, default_value = "experiment")]
        experiment_dir: PathBuf,
        /// Directory of `[target | source]` training PNGs.
        #[arg(long)]
        train_dir: PathBuf,
        /// Directory of held-out pair PNGs used for samples.
        #[arg(long)]
        val_dir: Option<PathBuf>,
        /// Directory of pair PNGs whose source half feeds the no-target terms.
        #[arg(long)]
        no_target_dir: Option<PathBuf>,
        /// Experiment id used in the checkpoint directory name.
        #[arg(long)]
        experiment_id: Option<usize>,
        /// Number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Initial learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Adam beta 1.
        #[arg(long)]
        beta_1: Option<f64>,
        /// Halve the learning rate every this many epochs (0 disables decay).
        #[arg(long)]
        schedule: Option<usize>,
        /// Floor of the decayed learning rate.
        #[arg(long)]
        min_lr: Option<f64>,
        /// Start from scratch even if checkpoints exist.
        #[arg(long)]
        no_resume: bool,
        /// Only update decoder weights.
        #[arg(long)]
        freeze_encoder: bool,
        /// Add no-target constancy and adversarial terms.
        #[arg(long)]
        no_target_source: bool,
        /// Write a sample image every this many steps (0 disables).
        #[arg(long)]
        sample_steps: Option<usize>,
        /// Write a checkpoint every this many steps (0 keeps only the final one).
        #[arg(long)]
        checkpoint_steps: Option<usize>,
        /// Checkpoints kept on disk.
        #[arg(long)]
        max_checkpoints: Option<usize>,
        /// L1-only generator updates per batch before the full update.
        #[arg(long)]
        l1_warmup_steps: Option<usize>,
        /// Full generator updates per batch.
        #[arg(long)]
        generator_steps: Option<usize>,
        /// Random seed for initialization and shuffling.
        #[arg(long)]
        seed: Option<u64>,
        /// Ink threshold for the pixel accuracy of samples and validation.
        #[arg(long)]
        accuracy_threshold: Option<f64>,
        #[command(flatten)]
        model: ModelFlags,
    },
    /// Extract the generator of the latest checkpoint.
    Export {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Checkpoint directory of a training run.
        #[arg(long)]
        model_dir: PathBuf,
        /// Directory the exported generator is written under.
        #[arg(long)]
        save_dir: PathBuf,
        /// Name of the exported model directory.
        #[arg(long, default_value = "gen_model")]
        model_name: String,
        #[command(flatten)]
        model: ModelFlags,
    },
    /// Translate a directory of source glyphs.
    Infer {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Checkpoint directory or exported generator directory.
        #[arg(long)]
        model_dir: PathBuf,
        /// Directory of `width x width` source glyph PNGs.
        #[arg(long)]
        source_dir: PathBuf,
        /// Directory the merged output tiles are written to.
        #[arg(long)]
        save_dir: PathBuf,
        #[command(flatten)]
        model: ModelFlags,
    },
    /// Score a generator on paired glyph images.
    Evaluate {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Checkpoint directory or exported generator directory.
        #[arg(long)]
        model_dir: PathBuf,
        /// Directory of `[target | source]` PNGs to score.
        #[arg(long)]
        data_dir: PathBuf,
        /// Directory for outlier images and the JSON report.
        #[arg(long)]
        save_dir: PathBuf,
        /// Experiment id used in output file names.
        #[arg(long)]
        experiment_id: Option<usize>,
        /// Pixels at or above this value count as ink.
        #[arg(long)]
        threshold: Option<f64>,
        /// Skip MSE, NRMSE, SSIM and PSNR.
        #[arg(long)]
        no_similarity_metrics: bool,
        /// Write samples with SSIM above this value.
        #[arg(long)]
        ssim_high: Option<f64>,
        /// Write samples with SSIM below this value.
        #[arg(long)]
        ssim_low: Option<f64>,
        #[command(flatten)]
        model: ModelFlags,
    },
}

/// `Some(value)` when a boolean flag was passed, `None` to defer to TOML.
fn flag(set: bool, value: bool) -> Option<bool> {
    set.then_some(value)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            experiment_dir,
            train_dir,
            val_dir,
            no_target_dir,
            experiment_id,
            epochs,
            lr,
            beta_1,
            schedule,
            min_lr,
            no_resume,
            freeze_encoder,
            no_target_source,
            sample_steps,
            checkpoint_steps,
            max_checkpoints,
            l1_warmup_steps,
            generator_steps,
            seed,
            accuracy_threshold,
            model,
        } => pipeline::run_train(pipeline::TrainArgs {
            config,
            experiment_dir,
            train_dir,
            val_dir,
            no_target_dir,
            model: model.into(),
            training: TrainingOverrides {
                experiment_id,
                epochs,
                lr,
                beta_1,
                schedule,
                min_lr,
                resume: flag(no_resume, false),
                freeze_encoder: flag(freeze_encoder, true),
                no_target_source: flag(no_target_source, true),
                sample_steps,
                checkpoint_steps,
                max_checkpoints,
                l1_warmup_steps,
                generator_steps,
                seed,
                accuracy_threshold,
            },
        }),
        Command::Export {
            config,
            model_dir,
            save_dir,
            model_name,
            model,
        } => pipeline::run_export(pipeline::ExportArgs {
            config,
            model_dir,
            save_dir,
            model_name,
            model: model.into(),
        }),
        Command::Infer {
            config,
            model_dir,
            source_dir,
            save_dir,
            model,
        } => pipeline::run_infer(pipeline::InferArgs {
            config,
            model_dir,
            source_dir,
            save_dir,
            model: model.into(),
        }),
        Command::Evaluate {
            config,
            model_dir,
            data_dir,
            save_dir,
            experiment_id,
            threshold,
            no_similarity_metrics,
            ssim_high,
            ssim_low,
            model,
        } => {
            let evaluation = EvaluationOverrides {
                threshold,
                similarity_metrics: flag(no_similarity_metrics, false),
                ssim_high,
                ssim_low,
                batch_size: model.batch_size,
            };
            pipeline::run_evaluate(pipeline::EvaluateArgs {
                config,
                model_dir,
                data_dir,
                save_dir,
                experiment_id,
                model: model.into(),
                evaluation,
            })
        }
    }
}
