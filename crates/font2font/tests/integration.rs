//! Integration tests for the font2font crate.
//!
//! These tests exercise cross-module interactions: build -> train -> checkpoint
//! -> restore, resume, retention, export -> infer, and evaluation. All use the
//! NdArray backend, width 128 and tiny channel widths on synthetic glyphs.

use std::path::Path;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::prelude::*;
use burn::tensor::TensorData;
use tempfile::TempDir;

use font2font::model::bridge::tensor_to_batch;
use font2font::training::checkpoint::{latest_checkpoint, list_checkpoints, read_meta, ExperimentLayout};
use font2font::training::summary::{read_events, EVENTS_FILE};
use font2font::{
    DiscriminatorKind, EvaluationConfig, Font2FontError, InMemoryPairs, InMemorySources, ModelConfig, Session,
    TrainingConfig,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

const WIDTH: usize = 128;

fn tiny_config(kind: DiscriminatorKind) -> ModelConfig {
    ModelConfig::new()
        .with_width(WIDTH)
        .with_batch_size(1)
        .with_generator_dim(4)
        .with_discriminator_dim(2)
        .with_dropout(0.0)
        .with_discriminator(kind)
}

/// Helper: a glyph-like pair. Target is a vertical bar, source a horizontal
/// one, both offset by `shift`.
fn bar_pair(shift: usize) -> Vec<f32> {
    let plane = WIDTH * WIDTH;
    let mut pair = vec![-1.0_f32; 2 * plane];
    for y in 0..WIDTH {
        for x in 0..WIDTH {
            if (32 + shift..64 + shift).contains(&x) {
                pair[y * WIDTH + x] = 1.0;
            }
            if (32 + shift..64 + shift).contains(&y) {
                pair[plane + y * WIDTH + x] = 1.0;
            }
        }
    }
    pair
}

fn provider(n: usize) -> InMemoryPairs {
    let examples = (0..n).map(|i| bar_pair(i * 4)).collect();
    InMemoryPairs::new(examples, vec![bar_pair(8)], [2, WIDTH, WIDTH]).unwrap()
}

fn model_dir(experiment: &Path, batch_size: usize) -> std::path::PathBuf {
    ExperimentLayout::new(experiment, 0, batch_size).checkpoint_dir()
}

fn l1_series(experiment: &Path) -> Vec<f64> {
    read_events(&experiment.join("logs").join(EVENTS_FILE))
        .unwrap()
        .into_iter()
        .filter(|e| e.tag == "l1_loss")
        .map(|e| e.value)
        .collect()
}

/// Helper: constant white target (+1) next to a constant black source (-1).
fn constant_pair() -> Vec<f32> {
    let plane = WIDTH * WIDTH;
    let mut pair = vec![1.0_f32; 2 * plane];
    pair[plane..].fill(-1.0);
    pair
}

#[test]
fn test_l1_never_increases_on_a_constant_pair() {
    let dir = TempDir::new().unwrap();
    let session = Session::<TestAutodiffBackend>::new(Default::default()).with_seed(42);
    let model = tiny_config(DiscriminatorKind::None)
        .with_lconst_penalty(0.0)
        .build(session)
        .unwrap();
    // One pair, batch size 1: every epoch is a single step at the fixed rate.
    let config = TrainingConfig::new()
        .with_epochs(50)
        .with_schedule(0)
        .with_sample_steps(0)
        .with_checkpoint_steps(0);
    let mut provider = InMemoryPairs::new(vec![constant_pair()], vec![], [2, WIDTH, WIDTH]).unwrap();

    model.train(&config, dir.path(), &mut provider).unwrap();

    let l1 = l1_series(dir.path());
    assert_eq!(l1.len(), 50);
    for (step, pair) in l1.windows(2).enumerate() {
        assert!(
            pair[1] <= pair[0] + 1e-5 * pair[0].abs(),
            "l1 rose at step {}: {:.6} -> {:.6}",
            step + 2,
            pair[0],
            pair[1]
        );
    }
    assert!(l1[49] < l1[0], "l1 did not decrease: {:.6} -> {:.6}", l1[0], l1[49]);
}

#[test]
fn test_checkpoint_round_trip_gives_identical_inference() {
    let dir = TempDir::new().unwrap();
    let session = Session::<TestAutodiffBackend>::new(Default::default()).with_seed(7);
    let model = tiny_config(DiscriminatorKind::Classifier).build(session).unwrap();
    let config = TrainingConfig::new()
        .with_epochs(1)
        .with_l1_warmup_steps(1)
        .with_sample_steps(0)
        .with_checkpoint_steps(0);

    let trained = model.train(&config, dir.path(), &mut provider(2)).unwrap();
    let inference = trained.valid();

    // A differently seeded model only matches after restoring.
    let mut restored = tiny_config(DiscriminatorKind::Classifier)
        .build(Session::<TestBackend>::new(Default::default()).with_seed(99))
        .unwrap();
    restored.restore_generator(&model_dir(dir.path(), 1)).unwrap();

    let source = Tensor::<TestBackend, 4>::from_data(
        TensorData::new(bar_pair(12)[WIDTH * WIDTH..].to_vec(), [1, 1, WIDTH, WIDTH]),
        &Default::default(),
    );
    let expected = tensor_to_batch(inference.generate(source.clone())).unwrap();
    let actual = tensor_to_batch(restored.generate(source)).unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn test_checkpoint_history_is_bounded() {
    let dir = TempDir::new().unwrap();
    let session = Session::<TestAutodiffBackend>::new(Default::default());
    let model = tiny_config(DiscriminatorKind::None).build(session).unwrap();
    let config = TrainingConfig::new()
        .with_epochs(5)
        .with_sample_steps(0)
        .with_checkpoint_steps(1)
        .with_max_checkpoints(3);

    model.train(&config, dir.path(), &mut provider(1)).unwrap();

    let steps: Vec<usize> = list_checkpoints(&model_dir(dir.path(), 1))
        .unwrap()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    assert_eq!(steps, vec![3, 4, 5]);
}

#[test]
fn test_resume_continues_step_and_epoch() {
    let dir = TempDir::new().unwrap();
    let build = || {
        tiny_config(DiscriminatorKind::EnergyReconstructor)
            .build(Session::<TestAutodiffBackend>::new(Default::default()))
            .unwrap()
    };
    let config = TrainingConfig::new()
        .with_l1_warmup_steps(0)
        .with_sample_steps(0)
        .with_checkpoint_steps(0)
        .with_schedule(1);

    build().train(&config.clone().with_epochs(2), dir.path(), &mut provider(2)).unwrap();
    let first = read_meta(&latest_checkpoint(&model_dir(dir.path(), 1)).unwrap().unwrap()).unwrap();
    assert_eq!((first.step, first.epoch), (4, 2));

    build().train(&config.clone().with_epochs(3), dir.path(), &mut provider(2)).unwrap();
    let second = read_meta(&latest_checkpoint(&model_dir(dir.path(), 1)).unwrap().unwrap()).unwrap();
    assert_eq!((second.step, second.epoch), (6, 3));
    // Epoch 2 runs at base / 2^3.
    assert!((second.learning_rate - (config.lr / 8.0).max(config.min_lr)).abs() < 1e-12);

    // Without resume, step counting starts over.
    build()
        .train(&config.with_epochs(1).with_resume(false), dir.path(), &mut provider(2))
        .unwrap();
    let fresh = read_meta(&latest_checkpoint(&model_dir(dir.path(), 1)).unwrap().unwrap()).unwrap();
    assert_eq!((fresh.step, fresh.epoch), (2, 1), "fresh run's checkpoint is the latest");
}

#[test]
fn test_fresh_run_over_existing_directory_keeps_its_checkpoints() {
    let dir = TempDir::new().unwrap();
    let build = || {
        tiny_config(DiscriminatorKind::None)
            .build(Session::<TestAutodiffBackend>::new(Default::default()))
            .unwrap()
    };
    let config = TrainingConfig::new()
        .with_sample_steps(0)
        .with_checkpoint_steps(1)
        .with_max_checkpoints(3);

    build().train(&config.clone().with_epochs(5), dir.path(), &mut provider(1)).unwrap();
    build()
        .train(&config.with_epochs(2).with_resume(false), dir.path(), &mut provider(1))
        .unwrap();

    let model_dir = model_dir(dir.path(), 1);
    let steps: Vec<usize> = list_checkpoints(&model_dir)
        .unwrap()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    // The old run's step 5 is the oldest write left; the fresh steps survive pruning.
    assert_eq!(steps, vec![5, 1, 2]);
    let latest = read_meta(&latest_checkpoint(&model_dir).unwrap().unwrap()).unwrap();
    assert_eq!((latest.step, latest.epoch), (2, 2));
}

#[test]
fn test_export_then_infer_from_export() {
    let dir = TempDir::new().unwrap();
    let session = Session::<TestAutodiffBackend>::new(Default::default());
    let model = tiny_config(DiscriminatorKind::Classifier).build(session).unwrap();
    let config = TrainingConfig::new()
        .with_epochs(1)
        .with_l1_warmup_steps(0)
        .with_sample_steps(0)
        .with_checkpoint_steps(0);
    model.train(&config, dir.path(), &mut provider(1)).unwrap();

    let mut inference = tiny_config(DiscriminatorKind::Classifier)
        .build(Session::<TestBackend>::new(Default::default()))
        .unwrap();
    let exported = inference
        .export_generator(&model_dir(dir.path(), 1), &dir.path().join("save"), "gen_model")
        .unwrap();
    assert_eq!(exported, dir.path().join("save/gen_model/generator.mpk"));

    let sources: Vec<Vec<f32>> = (0..3).map(|i| bar_pair(i)[WIDTH * WIDTH..].to_vec()).collect();
    let sources = InMemorySources::new(sources, [1, WIDTH, WIDTH]).unwrap();
    let written = inference
        .infer(&dir.path().join("save/gen_model"), &sources, &dir.path().join("infer"))
        .unwrap();
    assert_eq!(written.len(), 1);
    let tile = image::open(&written[0]).unwrap();
    // Batch size 1: three single-image tiles stacked vertically.
    assert_eq!((tile.width(), tile.height()), (WIDTH as u32, 3 * WIDTH as u32));
}

#[test]
fn test_evaluate_reports_metrics_and_writes_images() {
    let dir = TempDir::new().unwrap();
    let session = Session::<TestAutodiffBackend>::new(Default::default());
    let model = tiny_config(DiscriminatorKind::None).build(session).unwrap();
    let config = TrainingConfig::new()
        .with_epochs(1)
        .with_sample_steps(1)
        .with_checkpoint_steps(0);
    let mut data = provider(1);
    model.train(&config, dir.path(), &mut data).unwrap();

    let mut inference = tiny_config(DiscriminatorKind::None)
        .build(Session::<TestBackend>::new(Default::default()))
        .unwrap();
    let save_dir = dir.path().join("eval");
    let report = inference
        .evaluate(&model_dir(dir.path(), 1), &data, &save_dir, &EvaluationConfig::new())
        .unwrap();

    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.undefined_accuracy, 0);
    assert!(report.mean_accuracy.is_some());
    assert!(report.samples[0].ssim.is_some());
    assert!(save_dir.join("ave_inferred_id_0_0000_0.10.png").is_file());
    assert!(report.written.iter().all(|p| p.is_file()));

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("mean_accuracy"));
}

#[test]
fn test_evaluate_without_checkpoint_fails() {
    let dir = TempDir::new().unwrap();
    let mut inference = tiny_config(DiscriminatorKind::None)
        .build(Session::<TestBackend>::new(Default::default()))
        .unwrap();
    let err = inference
        .evaluate(dir.path(), &provider(1), &dir.path().join("eval"), &EvaluationConfig::new())
        .unwrap_err();
    assert!(matches!(err, Font2FontError::CheckpointNotFound(_)));
}
