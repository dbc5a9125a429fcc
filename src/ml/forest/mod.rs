//! Seeded random forest classifier.
//!
//! Trees are CART classifiers grown with Gini impurity on bootstrap resamples,
//! considering a random subset of features at every split. Each tree stores
//! its nodes in pre-order with class distributions at the leaves, which maps
//! directly onto the ONNX tree-ensemble node layout.

mod model;
mod train;
mod tree;

pub use model::RandomForest;
pub(crate) use model::argmax;
pub use train::{ForestOptions, MaxFeatures, TrainDataset, fit_forest};
pub use tree::{DecisionTree, Node};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("training set is empty")]
    EmptyDataset,
    #[error("feature matrix has {rows} rows but {labels} labels were given")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("training set has no feature columns")]
    NoFeatures,
    #[error("invalid forest options: {0}")]
    InvalidOptions(String),
}
