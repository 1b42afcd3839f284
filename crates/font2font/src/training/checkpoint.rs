//! Checkpoint layout, save/restore and retention.
//!
//! ```text
//! <experiment_dir>/checkpoint/experiment_<id>_batch_<size>/
//!     config.json                      (training config)
//!     model.json                       (model config)
//!     font2font.model-<step>/
//!         generator.mpk
//!         discriminator.mpk            (adversarial variants)
//!         generator_optimizer.mpk
//!         discriminator_optimizer.mpk  (adversarial variants)
//!         meta.json
//! ```

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{Font2FontError, Result};
use crate::model::config::{DiscriminatorKind, ModelConfig};
use crate::model::generator::Generator;

/// Prefix of every checkpoint directory.
pub const MODEL_NAME: &str = "font2font.model";

const GENERATOR_FILE: &str = "generator";
const DISCRIMINATOR_FILE: &str = "discriminator";
const GENERATOR_OPTIM_FILE: &str = "generator_optimizer";
const DISCRIMINATOR_OPTIM_FILE: &str = "discriminator_optimizer";
const META_FILE: &str = "meta.json";

/// Training config written next to the checkpoints.
pub const TRAINING_CONFIG_FILE: &str = "config.json";
/// Model config written next to the checkpoints.
pub const MODEL_CONFIG_FILE: &str = "model.json";
const RECORD_EXTENSION: &str = "mpk";

pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Metadata saved alongside each checkpoint for resuming training.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    /// Global optimization step (batches processed).
    pub step: usize,
    /// Epoch to resume from.
    pub epoch: usize,
    /// Learning rate in effect when the checkpoint was written.
    pub learning_rate: f64,
    pub discriminator: DiscriminatorKind,
    /// Write order within the model directory, assigned on save. A fresh run
    /// over an old directory writes later sequences than the old run did.
    #[serde(default)]
    pub sequence: u64,
}

/// Directories of one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentLayout {
    root: PathBuf,
    model_id: String,
}

impl ExperimentLayout {
    pub fn new(experiment_dir: &Path, experiment_id: usize, batch_size: usize) -> Self {
        Self {
            root: experiment_dir.to_path_buf(),
            model_id: format!("experiment_{experiment_id}_batch_{batch_size}"),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoint").join(&self.model_id)
    }

    pub fn sample_dir(&self) -> PathBuf {
        self.root.join("sample").join(&self.model_id)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.checkpoint_dir(), self.sample_dir(), self.log_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// `<model_dir>/font2font.model-<step>`.
pub fn checkpoint_path(model_dir: &Path, step: usize) -> PathBuf {
    model_dir.join(format!("{MODEL_NAME}-{step}"))
}

fn parse_step(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(MODEL_NAME)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

/// Complete checkpoints under `model_dir` with their metadata, oldest write
/// first. A missing directory has none.
fn scan_checkpoints(model_dir: &Path) -> Result<Vec<(CheckpointMeta, PathBuf)>> {
    if !model_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(model_dir)? {
        let path = entry?.path();
        if !path.is_dir() || parse_step(&path).is_none() || !path.join(META_FILE).is_file() {
            continue;
        }
        match read_meta(&path) {
            Ok(meta) => found.push((meta, path)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
        }
    }
    found.sort_by_key(|(meta, _)| (meta.sequence, meta.step));
    Ok(found)
}

/// Checkpoints under `model_dir` as `(step, path)`, oldest write first.
pub fn list_checkpoints(model_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    Ok(scan_checkpoints(model_dir)?
        .into_iter()
        .map(|(meta, path)| (meta.step, path))
        .collect())
}

/// The most recently written checkpoint, if any.
pub fn latest_checkpoint(model_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(model_dir)?.pop().map(|(_, path)| path))
}

fn next_sequence(model_dir: &Path) -> Result<u64> {
    Ok(scan_checkpoints(model_dir)?
        .iter()
        .map(|(meta, _)| meta.sequence)
        .max()
        .map_or(0, |last| last + 1))
}

/// Delete all but the `keep` most recent checkpoints; returns what was removed.
pub fn prune_checkpoints(model_dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let checkpoints = list_checkpoints(model_dir)?;
    let excess = checkpoints.len().saturating_sub(keep.max(1));
    let mut removed = Vec::with_capacity(excess);
    for (step, path) in checkpoints.into_iter().take(excess) {
        std::fs::remove_dir_all(&path)?;
        tracing::debug!(step, path = %path.display(), "Pruned checkpoint");
        removed.push(path);
    }
    Ok(removed)
}

pub fn read_meta(checkpoint_dir: &Path) -> Result<CheckpointMeta> {
    let file = std::fs::File::open(checkpoint_dir.join(META_FILE))?;
    Ok(serde_json::from_reader(file)?)
}

/// Model config saved by a training run in `model_dir`, if any.
///
/// Also accepts a checkpoint directory and looks one level up.
pub fn read_model_config(model_dir: &Path) -> Result<Option<ModelConfig>> {
    let candidates = [Some(model_dir), model_dir.parent()];
    for dir in candidates.into_iter().flatten() {
        let path = dir.join(MODEL_CONFIG_FILE);
        if path.is_file() {
            let config = ModelConfig::load(&path)
                .map_err(|e| Font2FontError::InvalidConfig(format!("{}: {e}", path.display())))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

fn record_exists(dir: &Path, name: &str) -> bool {
    dir.join(name).with_extension(RECORD_EXTENSION).is_file()
}

/// Everything a training checkpoint holds, borrowed for saving.
pub struct TrainingCheckpoint<'a, B, D, OG, OD>
where
    B: AutodiffBackend,
    D: AutodiffModule<B>,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<D, B>,
{
    pub generator: &'a Generator<B>,
    /// `None` for generator-only training.
    pub discriminator: Option<&'a D>,
    pub generator_optim: &'a OG,
    pub discriminator_optim: &'a OD,
    pub meta: CheckpointMeta,
}

impl<B, D, OG, OD> TrainingCheckpoint<'_, B, D, OG, OD>
where
    B: AutodiffBackend,
    D: AutodiffModule<B>,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<D, B>,
{
    /// Write into `<model_dir>/font2font.model-<step>/` and prune to `keep`.
    ///
    /// The checkpoint is stamped with the next write sequence, so it becomes
    /// the latest one even when an older run left higher steps behind. An
    /// existing directory for the same step is replaced.
    pub fn save(&self, model_dir: &Path, keep: usize) -> Result<PathBuf> {
        let meta = CheckpointMeta {
            sequence: next_sequence(model_dir)?,
            ..self.meta.clone()
        };
        let dir = checkpoint_path(model_dir, meta.step);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        let recorder = CheckpointRecorder::new();

        self.generator.clone().save_file(dir.join(GENERATOR_FILE), &recorder)?;
        Recorder::<B>::record(&recorder, self.generator_optim.to_record(), dir.join(GENERATOR_OPTIM_FILE))?;
        if let Some(discriminator) = self.discriminator {
            discriminator.clone().save_file(dir.join(DISCRIMINATOR_FILE), &recorder)?;
            Recorder::<B>::record(
                &recorder,
                self.discriminator_optim.to_record(),
                dir.join(DISCRIMINATOR_OPTIM_FILE),
            )?;
        }
        // meta.json last: a directory without it is not a complete checkpoint.
        serde_json::to_writer_pretty(std::fs::File::create(dir.join(META_FILE))?, &meta)?;

        tracing::info!(step = meta.step, sequence = meta.sequence, path = %dir.display(), "Saved checkpoint");
        prune_checkpoints(model_dir, keep)?;
        Ok(dir)
    }
}

/// Modules and optimizers restored from a training checkpoint.
pub struct RestoredTraining<B, D, OG, OD>
where
    B: AutodiffBackend,
{
    pub generator: Generator<B>,
    pub discriminator: D,
    pub generator_optim: OG,
    pub discriminator_optim: OD,
    pub meta: CheckpointMeta,
}

/// Restore everything written by [`TrainingCheckpoint::save`].
///
/// Missing discriminator or optimizer records leave the passed-in state
/// untouched and are logged; a missing generator is an error.
pub fn load_training<B, D, OG, OD>(
    dir: &Path,
    generator: Generator<B>,
    discriminator: D,
    generator_optim: OG,
    discriminator_optim: OD,
    device: &B::Device,
) -> Result<RestoredTraining<B, D, OG, OD>>
where
    B: AutodiffBackend,
    D: AutodiffModule<B>,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<D, B>,
{
    let meta = read_meta(dir)?;
    let recorder = CheckpointRecorder::new();
    let generator = load_generator(generator, dir, device)?;

    let discriminator = if record_exists(dir, DISCRIMINATOR_FILE) {
        discriminator.load_file(dir.join(DISCRIMINATOR_FILE), &recorder, device)?
    } else {
        tracing::warn!(path = %dir.display(), "Checkpoint has no discriminator; keeping fresh parameters");
        discriminator
    };

    let generator_optim = if record_exists(dir, GENERATOR_OPTIM_FILE) {
        let record = Recorder::<B>::load(&recorder, dir.join(GENERATOR_OPTIM_FILE), device)?;
        generator_optim.load_record(record)
    } else {
        tracing::warn!(path = %dir.display(), "Checkpoint has no generator optimizer state");
        generator_optim
    };
    let discriminator_optim = if record_exists(dir, DISCRIMINATOR_OPTIM_FILE) {
        let record = Recorder::<B>::load(&recorder, dir.join(DISCRIMINATOR_OPTIM_FILE), device)?;
        discriminator_optim.load_record(record)
    } else {
        discriminator_optim
    };

    Ok(RestoredTraining {
        generator,
        discriminator,
        generator_optim,
        discriminator_optim,
        meta,
    })
}

/// Load generator parameters from a checkpoint or export directory.
pub fn load_generator<B: Backend>(generator: Generator<B>, dir: &Path, device: &B::Device) -> Result<Generator<B>> {
    if !record_exists(dir, GENERATOR_FILE) {
        return Err(Font2FontError::CheckpointNotFound(dir.to_path_buf()));
    }
    Ok(generator.load_file(dir.join(GENERATOR_FILE), &CheckpointRecorder::new(), device)?)
}

/// Load discriminator parameters saved next to a generator.
pub fn load_discriminator<B: Backend, D: Module<B>>(discriminator: D, dir: &Path, device: &B::Device) -> Result<D> {
    if !record_exists(dir, DISCRIMINATOR_FILE) {
        return Err(Font2FontError::CheckpointNotFound(dir.to_path_buf()));
    }
    Ok(discriminator.load_file(dir.join(DISCRIMINATOR_FILE), &CheckpointRecorder::new(), device)?)
}

/// Save only the generator into `<dir>/generator.mpk`.
pub fn save_generator<B: Backend>(generator: &Generator<B>, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    generator.clone().save_file(dir.join(GENERATOR_FILE), &CheckpointRecorder::new())?;
    Ok(dir.join(GENERATOR_FILE).with_extension(RECORD_EXTENSION))
}

/// Whether `dir` directly holds generator parameters.
pub fn has_generator(dir: &Path) -> bool {
    record_exists(dir, GENERATOR_FILE)
}
