//! font2font training pipeline: data providers, loss policy, step-decay
//! schedule, checkpoints, the scalar event stream, evaluation metrics and the
//! Adam training loop.

pub mod checkpoint;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod summary;
pub mod trainer;
