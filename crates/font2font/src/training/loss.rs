//! Loss functions and the per-variant loss policy.
//!
//! - `l1_loss`: pixel reconstruction, `penalty * mean|fake - target|`
//! - `total_variation_loss`: smoothness, `penalty * (l2(dh) + l2(dw)) / width`
//! - `constancy_loss`: encoder consistency, `penalty * mean((enc(src) - enc(fake))^2)`
//! - `AdversarialPolicy`: what each discriminator contributes to the D and G objectives

use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::relu;
use serde::Serialize;

use crate::model::bridge::tensor_to_f64;
use crate::model::config::ModelConfig;
use crate::model::discriminator::{ClassifierDiscriminator, EnergyDiscriminator, NoDiscriminator};
use crate::model::generator::Generator;

/// Mean absolute pixel error, scaled by `penalty`.
pub fn l1_loss<B: Backend>(fake: Tensor<B, 4>, target: Tensor<B, 4>, penalty: f64) -> Tensor<B, 1> {
    (fake - target).abs().mean().mul_scalar(penalty)
}

/// `sum(x^2) / 2`, the l2 "norm" used by the smoothness penalty.
fn half_sum_squares<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 1> {
    x.powf_scalar(2.0).sum().div_scalar(2.0)
}

/// Squared differences between vertically and horizontally adjacent pixels.
///
/// Both directions are normalized by the image width. Images of height or
/// width 1 have no neighbours in that direction and contribute nothing.
pub fn total_variation_loss<B: Backend>(images: Tensor<B, 4>, penalty: f64) -> Tensor<B, 1> {
    let [_, _, height, width] = images.dims();
    let device = images.device();
    let mut total = Tensor::<B, 1>::zeros([1], &device);

    if height > 1 {
        let dh = images.clone().narrow(2, 1, height - 1) - images.clone().narrow(2, 0, height - 1);
        total = total + half_sum_squares(dh);
    }
    if width > 1 {
        let dw = images.clone().narrow(3, 1, width - 1) - images.narrow(3, 0, width - 1);
        total = total + half_sum_squares(dw);
    }

    total.div_scalar(width as f64).mul_scalar(penalty)
}

/// Mean squared distance between two bottlenecks, scaled by `penalty`.
pub fn constancy_loss<B: Backend>(
    encoded_source: Tensor<B, 4>,
    encoded_fake: Tensor<B, 4>,
    penalty: f64,
) -> Tensor<B, 1> {
    (encoded_source - encoded_fake).powf_scalar(2.0).mean().mul_scalar(penalty)
}

/// Sigmoid cross-entropy of `logits` against a constant label.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 2>, label: bool) -> Tensor<B, 1> {
    let device = logits.device();
    let targets = if label {
        Tensor::<B, 2, Int>::ones(logits.dims(), &device)
    } else {
        Tensor::<B, 2, Int>::zeros(logits.dims(), &device)
    };
    BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&device)
        .forward(logits, targets)
}

/// `(1 - weight) * primary + weight * auxiliary`.
pub fn blend<B: Backend>(primary: Tensor<B, 1>, auxiliary: Tensor<B, 1>, weight: f64) -> Tensor<B, 1> {
    primary.mul_scalar(1.0 - weight) + auxiliary.mul_scalar(weight)
}

/// What a discriminator adds to each side's objective for one batch.
#[derive(Debug, Clone)]
pub struct AdversarialTerms<B: Backend> {
    /// Discriminator objective contribution.
    pub d_loss: Tensor<B, 1>,
    /// Generator objective contribution (the "cheat" term).
    pub g_term: Tensor<B, 1>,
}

/// Loss policy implemented by each discriminator variant.
pub trait AdversarialPolicy<B: Backend>: Module<B> {
    /// `false` for generator-only regression.
    const ADVERSARIAL: bool = true;

    /// Terms for a paired batch: real target and generated fake share a source.
    fn paired_terms(
        &self,
        source: Tensor<B, 4>,
        real: Tensor<B, 4>,
        fake: Tensor<B, 4>,
        config: &ModelConfig,
    ) -> AdversarialTerms<B>;

    /// Terms for a no-target batch, where only a generated image exists.
    fn unpaired_terms(&self, source: Tensor<B, 4>, fake: Tensor<B, 4>, config: &ModelConfig) -> AdversarialTerms<B>;
}

impl<B: Backend> AdversarialPolicy<B> for ClassifierDiscriminator<B> {
    fn paired_terms(
        &self,
        source: Tensor<B, 4>,
        real: Tensor<B, 4>,
        fake: Tensor<B, 4>,
        _config: &ModelConfig,
    ) -> AdversarialTerms<B> {
        let (_, real_logits) = self.forward(source.clone(), real);
        let (_, fake_logits) = self.forward(source, fake);
        AdversarialTerms {
            d_loss: bce_with_logits(real_logits, true) + bce_with_logits(fake_logits.clone(), false),
            g_term: bce_with_logits(fake_logits, true),
        }
    }

    fn unpaired_terms(&self, source: Tensor<B, 4>, fake: Tensor<B, 4>, _config: &ModelConfig) -> AdversarialTerms<B> {
        let (_, fake_logits) = self.forward(source, fake);
        AdversarialTerms {
            d_loss: bce_with_logits(fake_logits.clone(), false),
            g_term: bce_with_logits(fake_logits, true),
        }
    }
}

impl<B: Backend> AdversarialPolicy<B> for EnergyDiscriminator<B> {
    fn paired_terms(
        &self,
        source: Tensor<B, 4>,
        real: Tensor<B, 4>,
        fake: Tensor<B, 4>,
        config: &ModelConfig,
    ) -> AdversarialTerms<B> {
        let real_energy = self.energy(source.clone(), real);
        let fake_energy = self.energy(source, fake);
        AdversarialTerms {
            d_loss: (real_energy + relu(fake_energy.clone().neg().add_scalar(config.energy_margin))).mean(),
            g_term: fake_energy.mean(),
        }
    }

    fn unpaired_terms(&self, source: Tensor<B, 4>, fake: Tensor<B, 4>, config: &ModelConfig) -> AdversarialTerms<B> {
        let fake_energy = self.energy(source, fake);
        AdversarialTerms {
            d_loss: relu(fake_energy.clone().neg().add_scalar(config.energy_margin)).mean(),
            g_term: fake_energy.mean(),
        }
    }
}

impl<B: Backend> AdversarialPolicy<B> for NoDiscriminator<B> {
    const ADVERSARIAL: bool = false;

    fn paired_terms(
        &self,
        source: Tensor<B, 4>,
        _real: Tensor<B, 4>,
        _fake: Tensor<B, 4>,
        _config: &ModelConfig,
    ) -> AdversarialTerms<B> {
        zero_terms(&source.device())
    }

    fn unpaired_terms(&self, source: Tensor<B, 4>, _fake: Tensor<B, 4>, _config: &ModelConfig) -> AdversarialTerms<B> {
        zero_terms(&source.device())
    }
}

fn zero_terms<B: Backend>(device: &B::Device) -> AdversarialTerms<B> {
    AdversarialTerms {
        d_loss: Tensor::zeros([1], device),
        g_term: Tensor::zeros([1], device),
    }
}

/// A paired batch split on the channel axis.
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    pub source: Tensor<B, 4>,
    pub target: Tensor<B, 4>,
}

impl<B: Backend> PairBatch<B> {
    /// Split `(target, source)` channel-concatenated pairs.
    pub fn split(pairs: Tensor<B, 4>, config: &ModelConfig) -> Self {
        let target = pairs.clone().narrow(1, 0, config.output_filters);
        let source = pairs.narrow(1, config.output_filters, config.input_filters);
        Self { source, target }
    }
}

/// Every loss tensor of one forward pass, still attached to the graph.
#[derive(Debug, Clone)]
pub struct LossBundle<B: Backend> {
    pub g_loss: Tensor<B, 1>,
    /// Absent without a discriminator.
    pub d_loss: Option<Tensor<B, 1>>,
    pub l1: Tensor<B, 1>,
    pub tv: Tensor<B, 1>,
    pub constancy: Tensor<B, 1>,
    /// Absent without a discriminator.
    pub cheat: Option<Tensor<B, 1>>,
    pub fake: Tensor<B, 4>,
}

/// Scalar snapshot of a [`LossBundle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossValues {
    pub g_loss: f64,
    pub d_loss: Option<f64>,
    pub l1: f64,
    pub tv: f64,
    pub constancy: f64,
    pub cheat: Option<f64>,
}

impl<B: Backend> LossBundle<B> {
    pub fn values(&self) -> LossValues {
        LossValues {
            g_loss: tensor_to_f64(self.g_loss.clone()),
            d_loss: self.d_loss.clone().map(tensor_to_f64),
            l1: tensor_to_f64(self.l1.clone()),
            tv: tensor_to_f64(self.tv.clone()),
            constancy: tensor_to_f64(self.constancy.clone()),
            cheat: self.cheat.clone().map(tensor_to_f64),
        }
    }
}

impl LossValues {
    /// `(tag, value)` pairs for the scalar event stream.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let mut entries = vec![
            ("g_loss", self.g_loss),
            ("l1_loss", self.l1),
            ("tv_loss", self.tv),
            ("const_loss", self.constancy),
        ];
        if let Some(d_loss) = self.d_loss {
            entries.push(("d_loss", d_loss));
        }
        if let Some(cheat) = self.cheat {
            entries.push(("cheat_loss", cheat));
        }
        entries
    }

    pub fn display(&self) -> String {
        let mut out = String::new();
        if let Some(d_loss) = self.d_loss {
            out.push_str(&format!("d_loss={d_loss:.5} "));
        }
        out.push_str(&format!(
            "g_loss={:.5} l1={:.5} const={:.5} tv={:.5}",
            self.g_loss, self.l1, self.constancy, self.tv
        ));
        if let Some(cheat) = self.cheat {
            out.push_str(&format!(" cheat={cheat:.5}"));
        }
        out
    }

    /// Warnings about degenerate training dynamics.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (tag, value) in self.entries() {
            if !value.is_finite() {
                warnings.push(format!("{tag} is not finite ({value})"));
            }
        }
        if let Some(d_loss) = self.d_loss {
            if d_loss.is_finite() && d_loss < 1e-3 {
                warnings.push(format!(
                    "discriminator saturated (d_loss={d_loss:.2e}); no-target examples may help"
                ));
            }
        }
        warnings
    }
}

/// Generator-side terms shared by every variant.
struct GeneratorTerms<B: Backend> {
    fake: Tensor<B, 4>,
    l1: Tensor<B, 1>,
    tv: Tensor<B, 1>,
    encoded_source: Tensor<B, 4>,
}

fn generator_terms<B: Backend>(generator: &Generator<B>, batch: &PairBatch<B>, config: &ModelConfig) -> GeneratorTerms<B> {
    let (fake, encoded_source) = generator.forward(batch.source.clone());
    GeneratorTerms {
        l1: l1_loss(fake.clone(), batch.target.clone(), config.l1_penalty),
        tv: total_variation_loss(fake.clone(), config.ltv_penalty),
        fake,
        encoded_source,
    }
}

/// Constancy of the generator on `source`, returning the generated image too.
fn self_constancy<B: Backend>(generator: &Generator<B>, source: Tensor<B, 4>, penalty: f64) -> (Tensor<B, 4>, Tensor<B, 1>) {
    let (fake, encoded_source) = generator.forward(source);
    let encoded_fake = generator.encode(fake.clone());
    (fake, constancy_loss(encoded_source, encoded_fake, penalty))
}

/// L1 alone, used by the warm-up generator steps.
pub fn l1_only<B: Backend>(generator: &Generator<B>, batch: &PairBatch<B>, config: &ModelConfig) -> Tensor<B, 1> {
    let (fake, _) = generator.forward(batch.source.clone());
    l1_loss(fake, batch.target.clone(), config.l1_penalty)
}

/// Compose every loss for one batch under the discriminator's policy.
///
/// `no_target` holds sources without a ground-truth target. For adversarial
/// variants their constancy and cheat terms are blended with the paired ones
/// and their fake term is added to the discriminator objective. Without a
/// discriminator the objective is L1 + TV when `no_target` is absent, and
/// `L1 + TV + no_target_blend * constancy(no_target)` when it is given: the
/// paired batch contributes no constancy term, so the no-target constancy is
/// scaled by the blend weight rather than blended with a paired term.
pub fn compose_losses<B, D>(
    generator: &Generator<B>,
    discriminator: &D,
    batch: &PairBatch<B>,
    no_target: Option<Tensor<B, 4>>,
    config: &ModelConfig,
) -> LossBundle<B>
where
    B: Backend,
    D: AdversarialPolicy<B>,
{
    let terms = generator_terms(generator, batch, config);
    let weight = config.no_target_blend;

    if !D::ADVERSARIAL {
        let device = terms.fake.device();
        let constancy = match no_target {
            Some(source) => self_constancy(generator, source, config.lconst_penalty).1.mul_scalar(weight),
            None => Tensor::zeros([1], &device),
        };
        return LossBundle {
            g_loss: terms.l1.clone() + terms.tv.clone() + constancy.clone(),
            d_loss: None,
            l1: terms.l1,
            tv: terms.tv,
            constancy,
            cheat: None,
            fake: terms.fake,
        };
    }

    let encoded_fake = generator.encode(terms.fake.clone());
    let constancy = constancy_loss(terms.encoded_source, encoded_fake, config.lconst_penalty);
    let primary = discriminator.paired_terms(batch.source.clone(), batch.target.clone(), terms.fake.clone(), config);

    let (d_loss, cheat, constancy) = match no_target {
        Some(source) => {
            let (nt_fake, nt_constancy) = self_constancy(generator, source.clone(), config.lconst_penalty);
            let auxiliary = discriminator.unpaired_terms(source, nt_fake, config);
            (
                primary.d_loss + auxiliary.d_loss,
                blend(primary.g_term, auxiliary.g_term, weight),
                blend(constancy, nt_constancy, weight),
            )
        }
        None => (primary.d_loss, primary.g_term, constancy),
    };

    LossBundle {
        g_loss: cheat.clone() + terms.l1.clone() + constancy.clone() + terms.tv.clone(),
        d_loss: Some(d_loss),
        l1: terms.l1,
        tv: terms.tv,
        constancy,
        cheat: Some(cheat),
        fake: terms.fake,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::discriminator::{ClassifierConfig, EnergyConfig};
    use crate::model::generator::GeneratorConfig;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        tensor_to_f64(t)
    }

    #[test]
    fn test_l1_loss_scales_mean_abs_error() {
        let device = Default::default();
        let fake = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let target = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device).sub_scalar(1.0);
        assert!((scalar(l1_loss(fake, target, 100.0)) - 200.0).abs() < 1e-4);
    }

    #[test]
    fn test_total_variation_zero_for_constant_image() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::ones([2, 1, 8, 8], &device).mul_scalar(0.3);
        assert!(scalar(total_variation_loss(images, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_total_variation_positive_for_varying_image() {
        let device = Default::default();
        // Single step edge between columns 0 and 1 of a 2x2 image.
        let images = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0_f32, 1.0, 0.0, 1.0], [1, 1, 2, 2]),
            &device,
        );
        // dw = [1, 1], dh = [0, 0]; l2 = 2 / 2 = 1; normalized by width 2.
        let tv = scalar(total_variation_loss(images, 1.0));
        assert!((tv - 0.5).abs() < 1e-6, "tv={tv}");

        let noisy = Tensor::<TestBackend, 4>::random([1, 1, 8, 8], Distribution::Uniform(-1.0, 1.0), &device);
        assert!(scalar(total_variation_loss(noisy, 1.0)) > 0.0);
    }

    #[test]
    fn test_constancy_zero_for_identical_encodings() {
        let device = Default::default();
        let code = Tensor::<TestBackend, 4>::random([2, 8, 1, 1], Distribution::Uniform(-1.0, 1.0), &device);
        assert!(scalar(constancy_loss(code.clone(), code, 15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_classifier_terms_are_non_negative() {
        let device = Default::default();
        let config = ModelConfig::new().with_width(128).with_discriminator_dim(2);
        let disc = ClassifierConfig::new(2, 2, 128).init::<TestBackend>(&device);
        let source = Tensor::<TestBackend, 4>::random([2, 1, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let real = Tensor::<TestBackend, 4>::random([2, 1, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let fake = Tensor::<TestBackend, 4>::random([2, 1, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);

        let terms = disc.paired_terms(source, real, fake, &config);
        assert!(scalar(terms.d_loss) > 0.0);
        assert!(scalar(terms.g_term) > 0.0);
    }

    #[test]
    fn test_energy_hinge_vanishes_beyond_margin() {
        let device = Default::default();
        let config = ModelConfig::new().with_width(128).with_energy_margin(0.0);
        let disc = EnergyConfig::new(2, 1, 2).init::<TestBackend>(&device);
        let source = Tensor::<TestBackend, 4>::zeros([1, 1, 128, 128], &device);
        let fake = Tensor::<TestBackend, 4>::ones([1, 1, 128, 128], &device);

        // With a zero margin the fake term is relu(-E) = 0.
        let terms = disc.unpaired_terms(source, fake, &config);
        assert!(scalar(terms.d_loss).abs() < 1e-9);
        assert!(scalar(terms.g_term) >= 0.0);
    }

    #[test]
    fn test_blend_weights() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 1>::from_data(TensorData::from([2.0_f32]), &device);
        let b = Tensor::<TestBackend, 1>::from_data(TensorData::from([4.0_f32]), &device);
        assert!((scalar(blend(a.clone(), b.clone(), 0.5)) - 3.0).abs() < 1e-6);
        assert!((scalar(blend(a, b, 0.25)) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_compose_without_discriminator_has_no_adversarial_terms() {
        let device = Default::default();
        let config = ModelConfig::new().with_width(128).with_generator_dim(2).with_ltv_penalty(1.0);
        let generator = GeneratorConfig::new(1, 1, 2).init::<TestBackend>(&device);
        let pairs = Tensor::<TestBackend, 4>::random([1, 2, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let batch = PairBatch::split(pairs, &config);

        let bundle = compose_losses(&generator, &NoDiscriminator::new(), &batch, None, &config);
        let values = bundle.values();
        assert!(values.d_loss.is_none());
        assert!(values.cheat.is_none());
        assert_eq!(values.constancy, 0.0);
        let expected = values.l1 + values.tv;
        assert!((values.g_loss - expected).abs() < 1e-4 * expected.max(1.0));
    }

    #[test]
    fn test_compose_without_discriminator_scales_no_target_constancy() {
        let device = Default::default();
        let config = ModelConfig::new()
            .with_width(128)
            .with_generator_dim(2)
            .with_no_target_blend(0.25);
        let generator = GeneratorConfig::new(1, 1, 2).init::<TestBackend>(&device);
        let pairs = Tensor::<TestBackend, 4>::random([1, 2, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let batch = PairBatch::split(pairs, &config);
        let no_target = Tensor::<TestBackend, 4>::random([1, 1, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);

        let unscaled = scalar(self_constancy(&generator, no_target.clone(), config.lconst_penalty).1);
        let bundle = compose_losses(&generator, &NoDiscriminator::new(), &batch, Some(no_target), &config);
        let values = bundle.values();
        assert!((values.constancy - 0.25 * unscaled).abs() < 1e-4 * unscaled.max(1.0));
        let expected = values.l1 + values.tv + values.constancy;
        assert!((values.g_loss - expected).abs() < 1e-4 * expected.max(1.0));
    }

    #[test]
    fn test_compose_classifier_sums_generator_objective() {
        let device = Default::default();
        let config = ModelConfig::new().with_width(128).with_generator_dim(2).with_discriminator_dim(2);
        let generator = GeneratorConfig::new(1, 1, 2).init::<TestBackend>(&device);
        let disc = ClassifierConfig::new(2, 2, 128).init::<TestBackend>(&device);
        let pairs = Tensor::<TestBackend, 4>::random([1, 2, 128, 128], Distribution::Uniform(-1.0, 1.0), &device);
        let batch = PairBatch::split(pairs.clone(), &config);
        let no_target = PairBatch::split(pairs, &config).source;

        let bundle = compose_losses(&generator, &disc, &batch, Some(no_target), &config);
        let values = bundle.values();
        let cheat = values.cheat.unwrap();
        assert!(values.d_loss.unwrap() > 0.0);
        let expected = cheat + values.l1 + values.constancy + values.tv;
        assert!((values.g_loss - expected).abs() < 1e-2 * expected.abs().max(1.0));
        assert_eq!(bundle.fake.dims(), [1, 1, 128, 128]);
    }

    #[test]
    fn test_pair_split_takes_target_first() {
        let device = Default::default();
        let config = ModelConfig::new();
        let target = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let source = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let batch = PairBatch::split(Tensor::cat(vec![target.clone(), source.clone()], 1), &config);
        assert_eq!(batch.target.into_data(), target.into_data());
        assert_eq!(batch.source.into_data(), source.into_data());
    }

    #[test]
    fn test_health_check_flags_saturation() {
        let values = LossValues { d_loss: Some(1e-6), ..Default::default() };
        assert_eq!(values.health_check().len(), 1);
        let values = LossValues { g_loss: f64::NAN, d_loss: Some(0.7), ..Default::default() };
        assert_eq!(values.health_check().len(), 1);
        assert!(LossValues { d_loss: Some(0.7), ..Default::default() }.health_check().is_empty());
    }
}
