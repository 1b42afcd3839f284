//! Training, export, inference and evaluation pipelines.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use indicatif::{ProgressBar, ProgressStyle};

use font2font::training::checkpoint::{
    latest_checkpoint, read_meta, read_model_config, ExperimentLayout, MODEL_CONFIG_FILE,
};
use font2font::training::data::{list_pngs, load_pair_file, load_source_file};
use font2font::training::summary::{read_events, EVENTS_FILE};
use font2font::{InMemoryPairs, InMemorySources, ModelConfig, Session, SourceProvider};

use crate::config::{
    build_evaluation_config, build_model_config, build_training_config, load_optional_toml, EvaluationOverrides,
    ModelOverrides, TrainingOverrides,
};
use crate::results::{fmt_metric, summarize_scalars, EvaluationSummary, REPORT_FILE};

type TrainBackend = Autodiff<NdArray<f32>>;
type InferBackend = NdArray<f32>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Optional TOML config file.
    pub config: Option<PathBuf>,
    /// Root directory for checkpoints, samples and logs.
    pub experiment_dir: PathBuf,
    /// Directory of `[target | source]` training PNGs.
    pub train_dir: PathBuf,
    /// Directory of held-out pair PNGs used for samples.
    pub val_dir: Option<PathBuf>,
    /// Directory of pair PNGs whose source half feeds the no-target terms.
    pub no_target_dir: Option<PathBuf>,
    pub model: ModelOverrides,
    pub training: TrainingOverrides,
}

/// Arguments for the `export` subcommand.
#[derive(Debug)]
pub struct ExportArgs {
    pub config: Option<PathBuf>,
    /// Checkpoint directory of a training run.
    pub model_dir: PathBuf,
    /// Directory the exported generator is written under.
    pub save_dir: PathBuf,
    /// Name of the exported model directory.
    pub model_name: String,
    pub model: ModelOverrides,
}

/// Arguments for the `infer` subcommand.
#[derive(Debug)]
pub struct InferArgs {
    pub config: Option<PathBuf>,
    /// Checkpoint directory or exported generator directory.
    pub model_dir: PathBuf,
    /// Directory of `width x width` source glyph PNGs.
    pub source_dir: PathBuf,
    /// Directory the merged output tiles are written to.
    pub save_dir: PathBuf,
    pub model: ModelOverrides,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Debug)]
pub struct EvaluateArgs {
    pub config: Option<PathBuf>,
    /// Checkpoint directory or exported generator directory.
    pub model_dir: PathBuf,
    /// Directory of `[target | source]` PNGs to score.
    pub data_dir: PathBuf,
    /// Directory for outlier images and the JSON report.
    pub save_dir: PathBuf,
    /// Used in output file names.
    pub experiment_id: Option<usize>,
    pub model: ModelOverrides,
    pub evaluation: EvaluationOverrides,
}

fn progress_bar(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Load every pair PNG of `dir` with a progress bar.
fn load_pairs(dir: &Path, config: &ModelConfig, label: &str) -> anyhow::Result<Vec<Vec<f32>>> {
    let paths = list_pngs(dir).with_context(|| format!("listing {}", dir.display()))?;
    let pb = progress_bar(paths.len())?;
    pb.set_message(label.to_string());

    let mut examples = Vec::with_capacity(paths.len());
    for path in &paths {
        examples.push(load_pair_file(path, config.width, config.input_filters, config.output_filters)?);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    tracing::info!(dir = %dir.display(), count = examples.len(), split = label, "Loaded pairs");
    Ok(examples)
}

/// Load every source glyph PNG of `dir` with a progress bar.
fn load_sources(dir: &Path, config: &ModelConfig) -> anyhow::Result<Vec<Vec<f32>>> {
    let paths = list_pngs(dir).with_context(|| format!("listing {}", dir.display()))?;
    let pb = progress_bar(paths.len())?;
    pb.set_message("sources");

    let mut images = Vec::with_capacity(paths.len());
    for path in &paths {
        images.push(load_source_file(path, config.width, config.input_filters)?);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    tracing::info!(dir = %dir.display(), count = images.len(), "Loaded source glyphs");
    Ok(images)
}

/// Model config for restoring a generator: the one saved by training if
/// present, then TOML, then CLI flags.
fn restore_model_config(model_dir: &Path, toml: &ModelOverrides, cli: &ModelOverrides) -> anyhow::Result<ModelConfig> {
    let base = match read_model_config(model_dir)? {
        Some(saved) => {
            tracing::info!(model_dir = %model_dir.display(), "Using saved model config");
            saved
        }
        None => ModelConfig::new(),
    };
    Ok(build_model_config(base, toml, cli))
}

/// Train a generator (and its discriminator, if any) on paired PNGs.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config
    let toml = load_optional_toml(args.config.as_deref())?;
    let model_config = build_model_config(ModelConfig::new(), &toml.model, &args.model);
    let training_config = build_training_config(&toml.training, &args.training);

    // 2. Build model
    let session = Session::<TrainBackend>::new(Default::default()).with_seed(training_config.seed);
    let model = model_config.build(session)?;

    // 3. Load data
    let shape = [model_config.pair_channels(), model_config.width, model_config.width];
    let train = load_pairs(&args.train_dir, &model_config, "train")?;
    let val = match &args.val_dir {
        Some(dir) => load_pairs(dir, &model_config, "val")?,
        None => Vec::new(),
    };
    let mut provider = InMemoryPairs::new(train, val, shape)?;
    if let Some(dir) = &args.no_target_dir {
        provider = provider.with_no_target(load_pairs(dir, &model_config, "no_target")?)?;
    }

    // 4. Train
    model.train(&training_config, &args.experiment_dir, &mut provider)?;

    // 5. Summary
    let layout = ExperimentLayout::new(
        &args.experiment_dir,
        training_config.experiment_id,
        model_config.batch_size,
    );
    let elapsed = start.elapsed();
    println!("\n--- Training Summary ---");
    println!("Discriminator: {}", model_config.discriminator);
    println!("Examples: {} train, {} val", provider.train_len(), provider.val_len());
    if let Some(latest) = latest_checkpoint(&layout.checkpoint_dir())? {
        let meta = read_meta(&latest)?;
        println!("Checkpoint: {} (step {}, epoch {})", latest.display(), meta.step, meta.epoch);
        println!("Learning rate: {:.6}", meta.learning_rate);
    }
    let events = read_events(&layout.log_dir().join(EVENTS_FILE))?;
    for scalar in summarize_scalars(&events) {
        println!("{:<16} last {:>10.4}  min {:>10.4}", scalar.tag, scalar.last, scalar.min);
    }
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Extract the generator of the latest checkpoint into a standalone directory.
pub fn run_export(args: ExportArgs) -> anyhow::Result<()> {
    let toml = load_optional_toml(args.config.as_deref())?;
    let model_config = restore_model_config(&args.model_dir, &toml.model, &args.model)?;
    let mut model = model_config.build(Session::<InferBackend>::new(Default::default()))?;

    let path = model.export_generator(&args.model_dir, &args.save_dir, &args.model_name)?;
    model_config
        .save(args.save_dir.join(&args.model_name).join(MODEL_CONFIG_FILE))
        .context("writing exported model config")?;

    println!("Exported generator: {}", path.display());
    Ok(())
}

/// Translate a directory of source glyphs.
pub fn run_infer(args: InferArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let toml = load_optional_toml(args.config.as_deref())?;
    let model_config = restore_model_config(&args.model_dir, &toml.model, &args.model)?;
    let mut model = model_config.build(Session::<InferBackend>::new(Default::default()))?;

    let images = load_sources(&args.source_dir, &model_config)?;
    let sources = InMemorySources::new(
        images,
        [model_config.input_filters, model_config.width, model_config.width],
    )?;
    let written = model.infer(&args.model_dir, &sources, &args.save_dir)?;

    println!("\n--- Inference Summary ---");
    println!("Sources: {}", sources.len());
    println!("Files written: {}", written.len());
    println!("Output: {}", args.save_dir.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Score a generator on paired PNGs and write a JSON report.
pub fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let toml = load_optional_toml(args.config.as_deref())?;
    let model_config = restore_model_config(&args.model_dir, &toml.model, &args.model)?;
    let experiment_id = args
        .experiment_id
        .or(toml.training.experiment_id)
        .unwrap_or_default();
    let eval_config = build_evaluation_config(&toml.evaluation, &args.evaluation, experiment_id);
    let mut model = model_config.build(Session::<InferBackend>::new(Default::default()))?;

    let pairs = load_pairs(&args.data_dir, &model_config, "eval")?;
    let shape = [model_config.pair_channels(), model_config.width, model_config.width];
    let provider = InMemoryPairs::new(pairs, Vec::new(), shape)?;
    let report = model.evaluate(&args.model_dir, &provider, &args.save_dir, &eval_config)?;

    let summary = EvaluationSummary::from_report(&report, &args.model_dir, &args.data_dir);
    let report_path = args.save_dir.join(REPORT_FILE);
    std::fs::write(&report_path, serde_json::to_string_pretty(&summary)?)?;

    println!("\n--- Evaluation Summary ---");
    println!("Samples: {}", summary.samples);
    println!("Threshold: {:.2}", summary.threshold);
    println!(
        "Accuracy: {} ({} undefined)",
        fmt_metric(summary.mean_accuracy),
        summary.undefined_accuracy
    );
    if eval_config.similarity_metrics {
        println!("MSE: {}", fmt_metric(summary.mean_mse));
        println!("NRMSE: {}", fmt_metric(summary.mean_nrmse));
        println!(
            "SSIM: {} (median {})",
            fmt_metric(summary.mean_ssim),
            fmt_metric(summary.median_ssim)
        );
        println!("PSNR: {}", fmt_metric(summary.mean_psnr));
    }
    println!("Images written: {}", summary.images_written);
    println!("Report: {}", report_path.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}
