//! Result types written by the `train` and `evaluate` subcommands.

use std::path::Path;

use font2font::training::summary::ScalarEvent;
use font2font::EvaluationReport;
use serde::{Deserialize, Serialize};

/// File name of the evaluation report inside the save directory.
pub const REPORT_FILE: &str = "evaluation.json";

/// Aggregate evaluation numbers plus the inputs that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Checkpoint directory the generator was restored from.
    pub model_dir: String,
    /// Directory of paired PNGs that was scored.
    pub data_dir: String,
    pub experiment_id: usize,
    pub threshold: f64,
    pub samples: usize,
    pub mean_accuracy: Option<f64>,
    /// Samples whose binarized target had no ink.
    pub undefined_accuracy: usize,
    pub mean_mse: Option<f64>,
    pub mean_nrmse: Option<f64>,
    pub mean_ssim: Option<f64>,
    pub median_ssim: Option<f64>,
    pub mean_psnr: Option<f64>,
    /// Number of images written next to the report.
    pub images_written: usize,
}

impl EvaluationSummary {
    pub fn from_report(report: &EvaluationReport, model_dir: &Path, data_dir: &Path) -> Self {
        let mut ssim: Vec<f64> = report
            .samples
            .iter()
            .filter_map(|s| s.ssim)
            .filter(|v| v.is_finite())
            .collect();
        let median_ssim = (!ssim.is_empty()).then(|| median(&mut ssim));

        Self {
            model_dir: model_dir.display().to_string(),
            data_dir: data_dir.display().to_string(),
            experiment_id: report.experiment_id,
            threshold: report.threshold,
            samples: report.samples.len(),
            mean_accuracy: report.mean_accuracy,
            undefined_accuracy: report.undefined_accuracy,
            mean_mse: report.mean_mse,
            mean_nrmse: report.mean_nrmse,
            mean_ssim: report.mean_ssim,
            median_ssim,
            mean_psnr: report.mean_psnr,
            images_written: report.written.len(),
        }
    }
}

/// Last and lowest value of one scalar tag over a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarSummary {
    pub tag: String,
    pub last: f64,
    pub min: f64,
    pub last_step: usize,
}

/// Summarize every tag of an event log, in first-seen order.
pub fn summarize_scalars(events: &[ScalarEvent]) -> Vec<ScalarSummary> {
    let mut summaries: Vec<ScalarSummary> = Vec::new();
    for event in events {
        match summaries.iter_mut().find(|s| s.tag == event.tag) {
            Some(summary) => {
                summary.last = event.value;
                summary.last_step = event.step;
                summary.min = summary.min.min(event.value);
            }
            None => summaries.push(ScalarSummary {
                tag: event.tag.clone(),
                last: event.value,
                min: event.value,
                last_step: event.step,
            }),
        }
    }
    summaries
}

/// Compute the median of a slice of f64 values.
///
/// Returns 0.0 for empty slices.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Format an optional metric for the console summary.
pub fn fmt_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "n/a".to_string(),
    }
}
