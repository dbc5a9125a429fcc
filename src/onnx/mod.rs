//! ONNX export of fitted forests, plus a small scorer for the exported graph.

pub mod export;
pub mod proto;
pub mod score;

pub use export::{ClassLabels, ExportError, ExportOptions, WrittenModel, forest_to_onnx, write_model};
pub use score::{GraphScorer, ScoreError, Scores};
