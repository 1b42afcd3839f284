//! Adversarial training loop with Adam on generator and discriminator.
//!
//! Ties together the data provider, the loss policy of the configured
//! discriminator, the step-decay schedule, sample images, the scalar event
//! stream and checkpoints.

use std::path::Path;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Font2FontError;
use crate::imaging::Canvas;
use crate::model::bridge::{batch_to_tensor, tensor_to_batch, tensor_to_f64};
use crate::model::compiled::{CompiledModel, Critic};
use crate::model::config::ModelConfig;
use crate::model::generator::Generator;
use crate::training::checkpoint::{
    load_training, latest_checkpoint, CheckpointMeta, ExperimentLayout, TrainingCheckpoint, MODEL_CONFIG_FILE,
    TRAINING_CONFIG_FILE,
};
use crate::training::data::PairedProvider;
use crate::training::loss::{compose_losses, l1_loss, l1_only, AdversarialPolicy, LossValues, PairBatch};
use crate::training::metrics::{binarize, mean_defined, pixel_accuracy};
use crate::training::schedule::learning_rate_at;
use crate::training::summary::{SummaryWriter, EVENTS_FILE};

/// Configuration for a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Distinguishes checkpoint, sample and log directories of concurrent runs.
    #[config(default = 0)]
    pub experiment_id: usize,
    #[config(default = 100)]
    pub epochs: usize,
    /// Initial Adam learning rate.
    #[config(default = 0.0002)]
    pub lr: f64,
    /// Adam first-moment decay.
    #[config(default = 0.5)]
    pub beta_1: f64,
    /// Halve the learning rate every `schedule` epochs (0 disables decay).
    #[config(default = 10)]
    pub schedule: usize,
    /// Floor for the decayed learning rate.
    #[config(default = 0.00002)]
    pub min_lr: f64,
    /// Continue from the latest checkpoint of this experiment if one exists.
    #[config(default = true)]
    pub resume: bool,
    /// Only update decoder parameters of the generator.
    #[config(default = false)]
    pub freeze_encoder: bool,
    /// Feed sources without targets through the auxiliary loss terms.
    #[config(default = false)]
    pub no_target_source: bool,
    /// Steps between validation samples (0 disables sampling).
    #[config(default = 50)]
    pub sample_steps: usize,
    /// Steps between checkpoints (0 keeps only the final one).
    #[config(default = 500)]
    pub checkpoint_steps: usize,
    #[config(default = 3)]
    pub max_checkpoints: usize,
    /// Extra L1-only generator steps per batch (adversarial variants).
    #[config(default = 3)]
    pub l1_warmup_steps: usize,
    /// Full-objective generator steps per batch.
    #[config(default = 1)]
    pub generator_steps: usize,
    /// Seed for epoch shuffling.
    #[config(default = 1234)]
    pub seed: u64,
    /// Pixels at or above this value count as ink when scoring samples and
    /// the final validation pass.
    #[config(default = 0.1)]
    pub accuracy_threshold: f64,
}

/// Position of the run, carried into checkpoints.
#[derive(Debug, Clone, Copy)]
struct TrainingState {
    step: usize,
    epoch: usize,
    learning_rate: f64,
}

impl<B: AutodiffBackend> CompiledModel<B> {
    /// Train in place and return the updated model.
    ///
    /// Writes checkpoints, samples and `logs/events.jsonl` under
    /// `experiment_dir`.
    pub fn train<P>(self, config: &TrainingConfig, experiment_dir: &Path, provider: &mut P) -> crate::Result<Self>
    where
        P: PairedProvider + ?Sized,
    {
        let CompiledModel {
            config: model_config,
            generator,
            critic,
            device,
        } = self;
        let run = Run {
            model: &model_config,
            config,
            layout: ExperimentLayout::new(experiment_dir, config.experiment_id, model_config.batch_size),
            device: &device,
        };

        let (generator, critic) = match critic {
            Critic::Classifier(d) => {
                let (g, d) = run.fit(generator, d, provider)?;
                (g, Critic::Classifier(d))
            }
            Critic::EnergyReconstructor(d) => {
                let (g, d) = run.fit(generator, d, provider)?;
                (g, Critic::EnergyReconstructor(d))
            }
            Critic::None(d) => {
                let (g, d) = run.fit(generator, d, provider)?;
                (g, Critic::None(d))
            }
        };

        Ok(CompiledModel {
            config: model_config,
            generator,
            critic,
            device,
        })
    }
}

/// Borrowed context of one training run.
struct Run<'a, B: AutodiffBackend> {
    model: &'a ModelConfig,
    config: &'a TrainingConfig,
    layout: ExperimentLayout,
    device: &'a B::Device,
}

/// One generator optimizer step, optionally restricted to the decoder.
fn generator_step<B, O>(optim: &mut O, generator: Generator<B>, loss: Tensor<B, 1>, lr: f64, freeze_encoder: bool) -> Generator<B>
where
    B: AutodiffBackend,
    O: Optimizer<Generator<B>, B>,
{
    let grads = loss.backward();
    let grads = if freeze_encoder {
        GradientsParams::from_grads(grads, &generator.decoder)
    } else {
        GradientsParams::from_grads(grads, &generator)
    };
    optim.step(lr, generator, grads)
}

impl<B: AutodiffBackend> Run<'_, B> {
    fn fit<D, P>(&self, mut generator: Generator<B>, mut discriminator: D, provider: &mut P) -> crate::Result<(Generator<B>, D)>
    where
        D: AdversarialPolicy<B> + AutodiffModule<B>,
        P: PairedProvider + ?Sized,
    {
        let (model, config, device) = (self.model, self.config, self.device);
        let batch_size = model.batch_size;
        let expected_shape = [model.pair_channels(), model.width, model.width];
        if provider.example_shape() != expected_shape {
            return Err(Font2FontError::Data(format!(
                "provider yields examples of shape {:?}, model expects {expected_shape:?}",
                provider.example_shape()
            )));
        }

        self.layout.create_dirs()?;
        let model_dir = self.layout.checkpoint_dir();
        config.save(model_dir.join(TRAINING_CONFIG_FILE))?;
        model.save(model_dir.join(MODEL_CONFIG_FILE))?;
        let mut summary = SummaryWriter::open(&self.layout.log_dir().join(EVENTS_FILE))?;

        let adam = AdamConfig::new().with_beta_1(config.beta_1 as f32);
        let mut g_optim = adam.init::<B, Generator<B>>();
        let mut d_optim = adam.init::<B, D>();

        let mut state = TrainingState {
            step: 0,
            epoch: 0,
            learning_rate: config.lr,
        };

        if config.resume {
            match latest_checkpoint(&model_dir)? {
                Some(dir) => {
                    let restored = load_training(&dir, generator, discriminator, g_optim, d_optim, device)?;
                    generator = restored.generator;
                    discriminator = restored.discriminator;
                    g_optim = restored.generator_optim;
                    d_optim = restored.discriminator_optim;
                    state = TrainingState {
                        step: restored.meta.step,
                        epoch: restored.meta.epoch,
                        learning_rate: restored.meta.learning_rate,
                    };
                    tracing::info!(
                        step = state.step,
                        epoch = state.epoch,
                        lr = state.learning_rate,
                        path = %dir.display(),
                        "Resumed training from checkpoint"
                    );
                }
                None => tracing::warn!(path = %model_dir.display(), "No checkpoint to resume from; training from scratch"),
            }
        }

        let total_batches = provider.total_batches(batch_size);
        tracing::info!(
            model_id = self.layout.model_id(),
            discriminator = %model.discriminator,
            epochs = config.epochs,
            total_batches,
            freeze_encoder = config.freeze_encoder,
            no_target_source = config.no_target_source,
            "Starting training"
        );

        // Offset the seed by epoch so a resumed run shuffles like an uninterrupted one.
        let start = Instant::now();
        for epoch in state.epoch..config.epochs {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(epoch as u64));
            provider.start_epoch(&mut rng);
            state.epoch = epoch;

            let lr = learning_rate_at(config.lr, config.schedule, config.min_lr, epoch);
            if (lr - state.learning_rate).abs() > f64::EPSILON * state.learning_rate.max(lr) {
                tracing::info!(epoch, from = state.learning_rate, to = lr, "Decay learning rate");
            }
            state.learning_rate = lr;

            for batch_idx in 0..total_batches {
                state.step += 1;
                let pairs = batch_to_tensor::<B>(&provider.train_batch(batch_idx, batch_size)?, device);
                let batch = PairBatch::split(pairs, model);
                let no_target = if config.no_target_source {
                    Some(match provider.no_target_batch(batch_idx, batch_size)? {
                        Some(extra) => PairBatch::split(batch_to_tensor::<B>(&extra, device), model).source,
                        None => batch.source.clone(),
                    })
                } else {
                    None
                };

                let mut d_loss = None;
                if D::ADVERSARIAL {
                    let bundle = compose_losses(&generator, &discriminator, &batch, no_target.clone(), model);
                    if let Some(loss) = bundle.d_loss {
                        d_loss = Some(tensor_to_f64(loss.clone()));
                        let grads = GradientsParams::from_grads(loss.backward(), &discriminator);
                        discriminator = d_optim.step(lr, discriminator, grads);
                    }
                    for _ in 0..config.l1_warmup_steps {
                        let loss = l1_only(&generator, &batch, model);
                        generator = generator_step(&mut g_optim, generator, loss, lr, config.freeze_encoder);
                    }
                }

                let mut values = LossValues::default();
                for _ in 0..config.generator_steps.max(1) {
                    let bundle = compose_losses(&generator, &discriminator, &batch, no_target.clone(), model);
                    values = bundle.values();
                    generator = generator_step(&mut g_optim, generator, bundle.g_loss, lr, config.freeze_encoder);
                }
                values.d_loss = d_loss;

                tracing::info!(
                    epoch,
                    batch = batch_idx,
                    total_batches,
                    step = state.step,
                    elapsed = format!("{:.2}s", start.elapsed().as_secs_f64()),
                    "{}",
                    values.display()
                );
                summary.add_scalars(state.step, &values.entries())?;
                summary.add_scalar(state.step, "learning_rate", lr)?;

                if config.sample_steps > 0 && state.step % config.sample_steps == 0 {
                    for warning in values.health_check() {
                        tracing::warn!(step = state.step, "{warning}");
                    }
                    let validation = provider.val_batch(batch_size)?;
                    let score = self.sample(&generator.valid(), &validation, &values, epoch, state.step)?;
                    summary.add_scalar(state.step, "sample_l1_loss", score.l1)?;
                    if let Some(accuracy) = score.accuracy {
                        summary.add_scalar(state.step, "sample_accuracy", accuracy)?;
                    }
                }

                if config.checkpoint_steps > 0 && state.step % config.checkpoint_steps == 0 {
                    self.checkpoint(&generator, &discriminator, &g_optim, &d_optim, state)?;
                }
            }
            summary.flush()?;
        }

        let score = self.validate(&generator.valid(), &*provider)?;
        summary.add_scalar(state.step, "val_l1_loss", score.l1)?;
        if let Some(accuracy) = score.accuracy {
            summary.add_scalar(state.step, "val_accuracy", accuracy)?;
        }
        summary.flush()?;

        // A finished run resumes past its last epoch.
        state.epoch = config.epochs.max(state.epoch);
        self.checkpoint(&generator, &discriminator, &g_optim, &d_optim, state)?;
        tracing::info!(
            step = state.step,
            elapsed = format!("{:.1}s", start.elapsed().as_secs_f64()),
            "Training complete"
        );
        Ok((generator, discriminator))
    }

    fn checkpoint<D, OG, OD>(&self, generator: &Generator<B>, discriminator: &D, g_optim: &OG, d_optim: &OD, state: TrainingState) -> crate::Result<()>
    where
        D: AdversarialPolicy<B> + AutodiffModule<B>,
        OG: Optimizer<Generator<B>, B>,
        OD: Optimizer<D, B>,
    {
        TrainingCheckpoint {
            generator,
            discriminator: D::ADVERSARIAL.then_some(discriminator),
            generator_optim: g_optim,
            discriminator_optim: d_optim,
            meta: CheckpointMeta {
                step: state.step,
                epoch: state.epoch,
                learning_rate: state.learning_rate,
                discriminator: self.model.discriminator,
                sequence: 0,
            },
        }
        .save(&self.layout.checkpoint_dir(), self.config.max_checkpoints)?;
        Ok(())
    }

    /// Generated images, L1 loss and per-sample pixel accuracy of
    /// `generator` on one pair batch.
    fn score(&self, generator: &Generator<B::InnerBackend>, batch: &PairBatch<B::InnerBackend>) -> crate::Result<(Tensor<B::InnerBackend, 4>, f64, Vec<Option<f64>>)> {
        let (fake, _) = generator.forward(batch.source.clone());
        let l1 = tensor_to_f64(l1_loss(fake.clone(), batch.target.clone(), self.model.l1_penalty));
        let threshold = self.config.accuracy_threshold;
        let accuracy = pixel_accuracy(binarize(fake.clone(), threshold), binarize(batch.target.clone(), threshold))?;
        Ok((fake, l1, accuracy))
    }

    /// Run a validation batch through the inference-mode generator and save
    /// `real | fake` as `sample_<epoch>_<step>.png`.
    fn sample(
        &self,
        generator: &Generator<B::InnerBackend>,
        validation: &crate::model::bridge::ImageBatch,
        values: &LossValues,
        epoch: usize,
        step: usize,
    ) -> crate::Result<ValidationScore> {
        let pairs = batch_to_tensor::<B::InnerBackend>(validation, self.device);
        let batch = PairBatch::split(pairs, self.model);
        let (fake, l1, accuracy) = self.score(generator, &batch)?;
        let score = ValidationScore {
            l1,
            accuracy: mean_defined(accuracy),
        };

        let rows = validation.len();
        let merged_real = Canvas::merge(&tensor_to_batch(batch.target)?, rows, 1)?;
        let merged_fake = Canvas::merge(&tensor_to_batch(fake)?, rows, 1)?;
        let path = self.layout.sample_dir().join(format!("sample_{epoch:02}_{step:04}.png"));
        Canvas::hconcat(&[merged_real, merged_fake])?.save(&path)?;

        tracing::info!(
            step,
            l1_loss = score.l1,
            accuracy = ?score.accuracy,
            g_loss = values.g_loss,
            d_loss = ?values.d_loss,
            path = %path.display(),
            "Sample"
        );
        Ok(score)
    }

    /// Score every held-out example once with the final generator.
    fn validate<P>(&self, generator: &Generator<B::InnerBackend>, provider: &P) -> crate::Result<ValidationScore>
    where
        P: PairedProvider + ?Sized,
    {
        let batches = provider.val_batches(self.model.batch_size)?;
        let (mut l1_sum, mut accuracies) = (0.0, Vec::new());
        let mut examples = 0;
        for validation in &batches {
            let pairs = batch_to_tensor::<B::InnerBackend>(validation, self.device);
            let batch = PairBatch::split(pairs, self.model);
            let (_, l1, accuracy) = self.score(generator, &batch)?;
            l1_sum += l1 * validation.len() as f64;
            examples += validation.len();
            accuracies.extend(accuracy);
        }
        let score = ValidationScore {
            l1: if examples > 0 { l1_sum / examples as f64 } else { 0.0 },
            accuracy: mean_defined(accuracies),
        };
        match score.accuracy {
            Some(accuracy) => tracing::info!(examples, l1_loss = score.l1, accuracy, "Validation"),
            None => tracing::warn!(examples, l1_loss = score.l1, "Validation accuracy undefined: no ink in targets"),
        }
        Ok(score)
    }
}

/// Scores of the generator on held-out pairs.
#[derive(Debug, Clone, Copy)]
struct ValidationScore {
    l1: f64,
    /// `None` when no target has any ink.
    accuracy: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::compiled::Session;
    use crate::model::config::DiscriminatorKind;
    use crate::training::data::InMemoryPairs;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_model(kind: DiscriminatorKind) -> ModelConfig {
        ModelConfig::new()
            .with_width(128)
            .with_batch_size(1)
            .with_generator_dim(2)
            .with_discriminator_dim(2)
            .with_discriminator(kind)
    }

    fn pairs(n: usize) -> InMemoryPairs {
        let plane = 128 * 128;
        let examples = (0..n)
            .map(|i| {
                let mut pair = vec![-1.0_f32; 2 * plane];
                // Target: a vertical bar; source: a horizontal bar.
                for y in 0..128 {
                    for x in 0..128 {
                        if (40 + i..60 + i).contains(&x) {
                            pair[y * 128 + x] = 1.0;
                        }
                        if (40 + i..60 + i).contains(&y) {
                            pair[plane + y * 128 + x] = 1.0;
                        }
                    }
                }
                pair
            })
            .collect();
        InMemoryPairs::new(examples, vec![], [2, 128, 128]).unwrap()
    }

    #[test]
    fn test_freeze_encoder_only_updates_decoder() {
        use crate::model::generator::GeneratorConfig;
        use burn::tensor::Distribution;

        let device = Default::default();
        let config = tiny_model(DiscriminatorKind::None);
        let generator = GeneratorConfig::new(1, 1, 2).init::<TestAutodiffBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiffBackend, Generator<TestAutodiffBackend>>();
        let pairs = Tensor::<TestAutodiffBackend, 4>::random([1, 2, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let batch = PairBatch::split(pairs, &config);

        let encoder_before = generator.encoder.convs[0].weight.val().into_data();
        let decoder_before = generator.decoder.deconvs[7].weight.val().into_data();

        let loss = l1_only(&generator, &batch, &config);
        let generator = generator_step(&mut optim, generator, loss, 1e-2, true);

        assert_eq!(generator.encoder.convs[0].weight.val().into_data(), encoder_before);
        assert_ne!(generator.decoder.deconvs[7].weight.val().into_data(), decoder_before);
    }

    #[test]
    fn test_rejects_provider_with_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::<TestAutodiffBackend>::new(Default::default());
        let model = tiny_model(DiscriminatorKind::None).build(session).unwrap();
        let mut provider = InMemoryPairs::new(vec![vec![0.0; 3 * 128 * 128]], vec![], [3, 128, 128]).unwrap();

        let err = model.train(&TrainingConfig::new(), dir.path(), &mut provider).unwrap_err();
        assert!(matches!(err, Font2FontError::Data(_)));
    }

    #[test]
    fn test_each_variant_trains_and_checkpoints() {
        for kind in [
            DiscriminatorKind::Classifier,
            DiscriminatorKind::EnergyReconstructor,
            DiscriminatorKind::None,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let session = Session::<TestAutodiffBackend>::new(Default::default()).with_seed(1);
            let model = tiny_model(kind).build(session).unwrap();
            let config = TrainingConfig::new()
                .with_epochs(1)
                .with_l1_warmup_steps(1)
                .with_sample_steps(2)
                .with_checkpoint_steps(0)
                .with_no_target_source(true);
            let mut provider = pairs(2);

            let trained = model.train(&config, dir.path(), &mut provider).unwrap();
            assert_eq!(trained.critic().kind(), kind);

            let layout = ExperimentLayout::new(dir.path(), 0, 1);
            let latest = latest_checkpoint(&layout.checkpoint_dir()).unwrap().unwrap();
            let meta = crate::training::checkpoint::read_meta(&latest).unwrap();
            assert_eq!(meta.step, 2);
            assert_eq!(meta.discriminator, kind);
            assert_eq!(
                latest.join("discriminator.mpk").is_file(),
                kind != DiscriminatorKind::None,
                "variant {kind}"
            );
            assert!(layout.sample_dir().join("sample_00_0002.png").is_file());
            let events = crate::training::summary::read_events(&layout.log_dir().join(EVENTS_FILE)).unwrap();
            for tag in ["sample_l1_loss", "sample_accuracy", "val_l1_loss", "val_accuracy"] {
                assert!(events.iter().any(|e| e.tag == tag), "variant {kind}: no {tag} event");
            }
            let val_accuracy = events.iter().find(|e| e.tag == "val_accuracy").unwrap();
            assert_eq!(val_accuracy.step, 2);
            assert!(val_accuracy.value <= 1.0);

            let saved = crate::training::checkpoint::read_model_config(&latest).unwrap().unwrap();
            assert_eq!(saved.discriminator, kind);
            assert_eq!(saved.generator_dim, 2);
        }
    }
}
