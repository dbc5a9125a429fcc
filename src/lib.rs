//! Library exports for the training and scoring executables, tests and benchmarks.
/// Application directory resolution.
pub mod app_dirs;
/// Pipeline settings and TOML overrides.
pub mod config;
/// CSV ingestion, imputation and splitting.
pub mod dataset;
/// Top-level error type.
pub mod error;
/// Tracing subscriber setup.
pub mod logging;
/// Random forest training and metrics.
pub mod ml;
/// ONNX export and graph scoring.
pub mod onnx;
/// The train-and-export batch run.
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{PipelineReport, run};
