//! Top-level error for a pipeline run.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dataset::{SplitError, TableError};
use crate::ml::forest::ForestError;
use crate::onnx::{ExportError, ScoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load table: {0}")]
    Table(#[from] TableError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("training failed: {0}")]
    Forest(#[from] ForestError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("scoring failed: {0}")]
    Score(#[from] ScoreError),
    #[error("failed to write progress: {0}")]
    Progress(#[from] std::io::Error),
}
