//! Export, inference and evaluation on a restored generator.
//!
//! All three operations restore parameters from disk first: either an export
//! directory holding `generator.mpk` directly, or the latest checkpoint under
//! a model directory.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::Serialize;

use crate::error::Font2FontError;
use crate::imaging::Canvas;
use crate::model::bridge::{batch_to_tensor, tensor_to_batch, ImageBatch};
use crate::model::compiled::{CompiledModel, Critic};
use crate::training::checkpoint::{has_generator, latest_checkpoint, load_discriminator, load_generator, save_generator};
use crate::training::data::{PairedProvider, SourceProvider};
use crate::training::loss::PairBatch;
use crate::training::metrics::{binarize, evaluate_batch, mean_defined, SampleMetrics};

/// Inference tiles written per output image.
pub const TILES_PER_FLUSH: usize = 10;

/// Settings for [`CompiledModel::evaluate`].
#[derive(Config, Debug)]
pub struct EvaluationConfig {
    /// Pixels `>=` this value count as ink.
    #[config(default = 0.1)]
    pub threshold: f64,
    /// Also compute MSE, NRMSE, SSIM and PSNR.
    #[config(default = true)]
    pub similarity_metrics: bool,
    /// Samples above this SSIM are written out.
    #[config(default = 0.8)]
    pub ssim_high: f64,
    /// Samples below this SSIM are written out.
    #[config(default = 0.5)]
    pub ssim_low: f64,
    #[config(default = 16)]
    pub batch_size: usize,
    /// Used in output file names.
    #[config(default = 0)]
    pub experiment_id: usize,
}

/// Result of an evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub experiment_id: usize,
    pub threshold: f64,
    pub samples: Vec<SampleMetrics>,
    /// Mean over samples with a defined accuracy.
    pub mean_accuracy: Option<f64>,
    /// Samples whose ground truth has no ink.
    pub undefined_accuracy: usize,
    pub mean_mse: Option<f64>,
    pub mean_nrmse: Option<f64>,
    pub mean_ssim: Option<f64>,
    /// Mean over samples with finite PSNR.
    pub mean_psnr: Option<f64>,
    /// Images written to the save directory.
    pub written: Vec<PathBuf>,
}

/// Directory to restore a generator from: `model_dir` itself if it holds an
/// exported generator, else its latest checkpoint.
pub fn resolve_generator_dir(model_dir: &Path) -> crate::Result<PathBuf> {
    if has_generator(model_dir) {
        return Ok(model_dir.to_path_buf());
    }
    latest_checkpoint(model_dir)?.ok_or_else(|| Font2FontError::CheckpointNotFound(model_dir.to_path_buf()))
}

impl<B: Backend> CompiledModel<B> {
    /// Replace the generator with the parameters found under `model_dir`.
    pub fn restore_generator(&mut self, model_dir: &Path) -> crate::Result<PathBuf> {
        let dir = resolve_generator_dir(model_dir)?;
        self.generator = load_generator(self.generator.clone(), &dir, &self.device)?;
        tracing::info!(path = %dir.display(), "Restored generator");
        Ok(dir)
    }

    /// Restore the latest full checkpoint and save its generator alone to
    /// `<save_dir>/<model_name>/generator.mpk`.
    pub fn export_generator(&mut self, model_dir: &Path, save_dir: &Path, model_name: &str) -> crate::Result<PathBuf> {
        let checkpoint =
            latest_checkpoint(model_dir)?.ok_or_else(|| Font2FontError::CheckpointNotFound(model_dir.to_path_buf()))?;
        self.generator = load_generator(self.generator.clone(), &checkpoint, &self.device)?;
        self.critic = match self.critic.clone() {
            Critic::Classifier(d) => Critic::Classifier(load_discriminator(d, &checkpoint, &self.device)?),
            Critic::EnergyReconstructor(d) => {
                Critic::EnergyReconstructor(load_discriminator(d, &checkpoint, &self.device)?)
            }
            Critic::None(d) => Critic::None(d),
        };

        let path = save_generator(&self.generator, &save_dir.join(model_name))?;
        tracing::info!(from = %checkpoint.display(), to = %path.display(), "Exported generator");
        Ok(path)
    }

    /// Translate every source glyph and write merged tiles to `save_dir`.
    ///
    /// Each batch becomes one tile; every [`TILES_PER_FLUSH`] tiles are
    /// stacked vertically into `inferred_<count>.png`, with a final partial
    /// flush. Returns the written paths.
    pub fn infer<S>(&mut self, model_dir: &Path, sources: &S, save_dir: &Path) -> crate::Result<Vec<PathBuf>>
    where
        S: SourceProvider + ?Sized,
    {
        self.restore_generator(model_dir)?;
        let expected = [self.config.input_filters, self.config.width, self.config.width];
        if sources.source_shape() != expected {
            return Err(Font2FontError::Data(format!(
                "sources have shape {:?}, model expects {expected:?}",
                sources.source_shape()
            )));
        }
        std::fs::create_dir_all(save_dir)?;

        let batch_size = self.config.batch_size;
        let mut tiles = Vec::with_capacity(TILES_PER_FLUSH);
        let mut written = Vec::new();
        let mut count = 0;

        for batch in sources.batches(batch_size)? {
            let fake = self.generate(batch_to_tensor::<B>(&batch, &self.device));
            tiles.push(Canvas::merge(&tensor_to_batch(fake)?, batch.len(), 1)?);
            if tiles.len() == TILES_PER_FLUSH {
                written.push(flush_tiles(&mut tiles, save_dir, &mut count)?);
            }
        }
        if !tiles.is_empty() {
            written.push(flush_tiles(&mut tiles, save_dir, &mut count)?);
        }

        tracing::info!(sources = sources.len(), files = written.len(), "Inference complete");
        Ok(written)
    }

    /// Score the generator on held-out pairs.
    ///
    /// Generated and ground-truth glyphs are binarized at `threshold` before
    /// any metric is computed.
    pub fn evaluate<P>(
        &mut self,
        model_dir: &Path,
        provider: &P,
        save_dir: &Path,
        config: &EvaluationConfig,
    ) -> crate::Result<EvaluationReport>
    where
        P: PairedProvider + ?Sized,
    {
        self.restore_generator(model_dir)?;
        std::fs::create_dir_all(save_dir)?;

        let mut samples = Vec::new();
        let mut written = Vec::new();

        for (count, batch) in provider.val_batches(config.batch_size)?.into_iter().enumerate() {
            let pairs = PairBatch::split(batch_to_tensor::<B>(&batch, &self.device), &self.config);
            let fake = binarize(self.generate(pairs.source), config.threshold);
            let real = binarize(pairs.target, config.threshold);

            let metrics = evaluate_batch(fake.clone(), real.clone(), config.similarity_metrics, samples.len())?;
            let real_batch = tensor_to_batch(real)?;
            let fake_batch = tensor_to_batch(fake)?;

            for (offset, m) in metrics.iter().enumerate() {
                if m.accuracy.is_none() {
                    tracing::warn!(sample = m.index, "Ground truth has no ink; accuracy undefined");
                }
                if let Some(ssim) = m.ssim {
                    if ssim > config.ssim_high || ssim < config.ssim_low {
                        written.push(save_outlier(&real_batch, &fake_batch, offset, m, save_dir)?);
                    }
                }
            }

            let rows = batch.len();
            let merged = Canvas::hconcat(&[
                Canvas::merge(&real_batch, rows, 1)?,
                Canvas::merge(&fake_batch, rows, 1)?,
            ])?;
            let path = save_dir.join(format!(
                "ave_inferred_id_{}_{count:04}_{:.2}.png",
                config.experiment_id, config.threshold
            ));
            merged.save(&path)?;
            written.push(path);
            samples.extend(metrics);
        }

        let report = EvaluationReport {
            experiment_id: config.experiment_id,
            threshold: config.threshold,
            mean_accuracy: mean_defined(samples.iter().map(|s| s.accuracy)),
            undefined_accuracy: samples.iter().filter(|s| s.accuracy.is_none()).count(),
            mean_mse: mean_defined(samples.iter().map(|s| s.mse)),
            mean_nrmse: mean_defined(samples.iter().map(|s| s.nrmse)),
            mean_ssim: mean_defined(samples.iter().map(|s| s.ssim)),
            mean_psnr: mean_defined(samples.iter().map(|s| s.psnr)),
            samples,
            written,
        };
        tracing::info!(
            samples = report.samples.len(),
            mean_accuracy = ?report.mean_accuracy,
            mean_ssim = ?report.mean_ssim,
            "Evaluation complete"
        );
        Ok(report)
    }
}

fn flush_tiles(tiles: &mut Vec<Canvas>, save_dir: &Path, count: &mut usize) -> crate::Result<PathBuf> {
    let path = save_dir.join(format!("inferred_{:04}.png", *count));
    Canvas::vconcat(tiles)?.save(&path)?;
    tiles.clear();
    *count += 1;
    Ok(path)
}

/// Write `real | fake` for one sample, named by its similarity metrics.
fn save_outlier(
    real: &ImageBatch,
    fake: &ImageBatch,
    index: usize,
    metrics: &SampleMetrics,
    save_dir: &Path,
) -> crate::Result<PathBuf> {
    let shape = real.image_shape();
    let pair = Canvas::hconcat(&[
        Canvas::from_planar(real.image(index), shape)?,
        Canvas::from_planar(fake.image(index), shape)?,
    ])?;
    let path = save_dir.join(format!(
        "ave-{:.4}-{:.4}-{:.4}-{:.4}.png",
        metrics.ssim.unwrap_or(f64::NAN),
        metrics.mse.unwrap_or(f64::NAN),
        metrics.nrmse.unwrap_or(f64::NAN),
        metrics.psnr.unwrap_or(f64::NAN),
    ));
    pair.save(&path)?;
    Ok(path)
}
