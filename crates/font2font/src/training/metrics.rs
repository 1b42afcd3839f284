//! Per-sample evaluation metrics on binarized glyphs.
//!
//! All functions take `(batch, channels, height, width)` tensors in `[-1, 1]`
//! and return one value per sample.

use burn::prelude::*;
use burn::tensor::module::avg_pool2d;
use serde::Serialize;

use crate::error::Result;
use crate::model::bridge::tensor_to_vec;

/// Peak-to-peak range of images in `[-1, 1]`.
pub const DATA_RANGE: f64 = 2.0;

const SSIM_WINDOW: usize = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// Map pixels `>= threshold` to 1.0 and the rest to -1.0.
pub fn binarize<B: Backend>(images: Tensor<B, 4>, threshold: f64) -> Tensor<B, 4> {
    images.greater_equal_elem(threshold).float().mul_scalar(2.0).sub_scalar(1.0)
}

/// Flatten every sample to one row.
fn rows<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = images.dims();
    images.reshape([batch, channels * height * width])
}

/// Ink agreement of binarized images.
///
/// `valid` counts ground-truth ink pixels, `over` generated ink where there
/// is none, `less` missing ink; accuracy is `(valid - over - less) / valid`.
/// Samples without any ground-truth ink have no defined accuracy and yield
/// `None`.
pub fn pixel_accuracy<B: Backend>(fake: Tensor<B, 4>, real: Tensor<B, 4>) -> Result<Vec<Option<f64>>> {
    let real_on = rows(real).equal_elem(1.0).float();
    let fake_on = rows(fake).equal_elem(1.0).float();
    let real_off = real_on.clone().neg().add_scalar(1.0);
    let fake_off = fake_on.clone().neg().add_scalar(1.0);

    let batch = real_on.dims()[0];
    let valid = tensor_to_vec(real_on.clone().sum_dim(1).reshape([batch]))?;
    let over = tensor_to_vec((fake_on * real_off).sum_dim(1).reshape([batch]))?;
    let less = tensor_to_vec((fake_off * real_on).sum_dim(1).reshape([batch]))?;

    Ok(valid
        .iter()
        .zip(over.iter().zip(&less))
        .map(|(&valid, (&over, &less))| (valid > 0.0).then(|| (valid - over - less) / valid))
        .collect())
}

/// Mean squared error per sample.
pub fn mean_squared_error<B: Backend>(a: Tensor<B, 4>, b: Tensor<B, 4>) -> Result<Vec<f64>> {
    let batch = a.dims()[0];
    tensor_to_vec(rows(a - b).powf_scalar(2.0).mean_dim(1).reshape([batch]))
}

/// Euclidean normalized RMSE, `||truth - test|| / ||truth||`.
pub fn normalized_rmse<B: Backend>(truth: Tensor<B, 4>, test: Tensor<B, 4>) -> Result<Vec<f64>> {
    let batch = truth.dims()[0];
    let error = tensor_to_vec(rows(truth.clone() - test).powf_scalar(2.0).sum_dim(1).reshape([batch]))?;
    let norm = tensor_to_vec(rows(truth).powf_scalar(2.0).sum_dim(1).reshape([batch]))?;
    Ok(error
        .into_iter()
        .zip(norm)
        .map(|(e, n)| if n > 0.0 { (e / n).sqrt() } else { f64::INFINITY })
        .collect())
}

/// Peak signal-to-noise ratio from a mean squared error; infinite for identical images.
pub fn psnr(mse: f64, data_range: f64) -> f64 {
    if mse <= 0.0 {
        f64::INFINITY
    } else {
        10.0 * (data_range * data_range / mse).log10()
    }
}

/// Mean structural similarity over a uniform 7x7 window (shrunk for tiny images).
pub fn ssim<B: Backend>(a: Tensor<B, 4>, b: Tensor<B, 4>, data_range: f64) -> Result<Vec<f64>> {
    let [batch, _, height, width] = a.dims();
    let mut window = SSIM_WINDOW.min(height).min(width);
    if window % 2 == 0 {
        window -= 1;
    }
    let samples = (window * window) as f64;
    let cov_norm = if samples > 1.0 { samples / (samples - 1.0) } else { 1.0 };

    let pool = |x: Tensor<B, 4>| avg_pool2d(x, [window, window], [1, 1], [0, 0], false);
    let ux = pool(a.clone());
    let uy = pool(b.clone());
    let uxx = pool(a.clone() * a.clone());
    let uyy = pool(b.clone() * b.clone());
    let uxy = pool(a * b);

    let vx = (uxx - ux.clone() * ux.clone()).mul_scalar(cov_norm);
    let vy = (uyy - uy.clone() * uy.clone()).mul_scalar(cov_norm);
    let vxy = (uxy - ux.clone() * uy.clone()).mul_scalar(cov_norm);

    let c1 = (SSIM_K1 * data_range).powi(2);
    let c2 = (SSIM_K2 * data_range).powi(2);
    let numerator = (ux.clone() * uy.clone()).mul_scalar(2.0).add_scalar(c1) * vxy.mul_scalar(2.0).add_scalar(c2);
    let denominator = (ux.clone() * ux + uy.clone() * uy).add_scalar(c1) * (vx + vy).add_scalar(c2);

    tensor_to_vec(rows(numerator / denominator).mean_dim(1).reshape([batch]))
}

/// Every metric of one evaluated sample.
#[derive(Debug, Clone, Serialize)]
pub struct SampleMetrics {
    pub index: usize,
    pub accuracy: Option<f64>,
    pub mse: Option<f64>,
    pub nrmse: Option<f64>,
    pub ssim: Option<f64>,
    pub psnr: Option<f64>,
}

/// Metrics for a batch of binarized `fake` against binarized `real`.
///
/// `first_index` numbers the samples across batches.
pub fn evaluate_batch<B: Backend>(
    fake: Tensor<B, 4>,
    real: Tensor<B, 4>,
    similarity: bool,
    first_index: usize,
) -> Result<Vec<SampleMetrics>> {
    let accuracy = pixel_accuracy(fake.clone(), real.clone())?;
    let batch = accuracy.len();

    let (mse, nrmse, ssim) = if similarity {
        (
            mean_squared_error(fake.clone(), real.clone())?.into_iter().map(Some).collect(),
            normalized_rmse(real.clone(), fake.clone())?.into_iter().map(Some).collect(),
            ssim(fake, real, DATA_RANGE)?.into_iter().map(Some).collect(),
        )
    } else {
        (vec![None; batch], vec![None; batch], vec![None; batch])
    };

    Ok((0..batch)
        .map(|i| SampleMetrics {
            index: first_index + i,
            accuracy: accuracy[i],
            mse: mse[i],
            nrmse: nrmse[i],
            ssim: ssim[i],
            psnr: mse[i].map(|m: f64| psnr(m, DATA_RANGE)),
        })
        .collect())
}

/// Mean of the present values; `None` when there are none.
pub fn mean_defined(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
