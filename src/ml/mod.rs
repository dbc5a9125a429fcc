//! Model training and evaluation.
//!
//! Fitted trees are plain node arrays that the ONNX exporter walks directly.

pub mod forest;
pub mod metrics;
