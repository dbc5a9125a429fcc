//! Conversion of a fitted forest into an ONNX `TreeEnsembleClassifier` graph.

use std::path::{Path, PathBuf};

use prost::Message;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::proto::{
    AttributeProto, Dim, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TypeProto, ValueInfoProto, data_type,
};
use crate::ml::forest::{Node, RandomForest};

pub const IR_VERSION: i64 = 8;
pub const ML_DOMAIN: &str = "ai.onnx.ml";
pub const ML_OPSET: i64 = 1;
pub const DEFAULT_OPSET: i64 = 15;
pub const PRODUCER_NAME: &str = "batclass";
pub const TREE_ENSEMBLE_OP: &str = "TreeEnsembleClassifier";

/// Symbolic name of the batch dimension.
pub const BATCH_DIM: &str = "N";

/// Metadata key holding the JSON array of feature column names.
pub const FEATURE_NAMES_KEY: &str = "feature_names";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("forest has no trees")]
    EmptyForest,
    #[error("only one class ({0:?}) in the training rows; a classifier graph needs at least two")]
    SingleClass(String),
    #[error("forest expects {expected} features but {found} names were given")]
    FeatureNames { expected: usize, found: usize },
    #[error("failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportOptions {
    /// Name of the single float input tensor.
    pub input_name: String,
    /// Wrap probabilities in a `ZipMap` (sequence of per-class maps) instead
    /// of emitting a flat `[N, classes]` tensor.
    pub zipmap: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            input_name: "float_input".to_string(),
            zipmap: false,
        }
    }
}

/// Class labels as they appear in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassLabels {
    Int64(Vec<i64>),
    Strings(Vec<String>),
}

impl ClassLabels {
    /// Integer labels when every class parses as an `i64`, text otherwise.
    pub fn from_classes(classes: &[String]) -> Self {
        let ints: Option<Vec<i64>> = classes.iter().map(|c| c.parse::<i64>().ok()).collect();
        match ints {
            Some(ints) => ClassLabels::Int64(ints),
            None => ClassLabels::Strings(classes.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClassLabels::Int64(values) => values.len(),
            ClassLabels::Strings(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Textual form of the label at `idx`.
    pub fn text(&self, idx: usize) -> Option<String> {
        match self {
            ClassLabels::Int64(values) => values.get(idx).map(|v| v.to_string()),
            ClassLabels::Strings(values) => values.get(idx).cloned(),
        }
    }

    fn elem_type(&self) -> i32 {
        match self {
            ClassLabels::Int64(_) => data_type::INT64,
            ClassLabels::Strings(_) => data_type::STRING,
        }
    }

    fn attribute(&self) -> AttributeProto {
        match self {
            ClassLabels::Int64(values) => {
                AttributeProto::ints("classlabels_int64s", values.clone())
            }
            ClassLabels::Strings(values) => {
                AttributeProto::strings("classlabels_strings", values.as_slice())
            }
        }
    }
}

/// Build the ONNX model for a fitted forest.
pub fn forest_to_onnx(
    forest: &RandomForest,
    feature_names: &[String],
    options: &ExportOptions,
) -> Result<ModelProto, ExportError> {
    if forest.trees.is_empty() {
        return Err(ExportError::EmptyForest);
    }
    if let [only] = forest.classes.as_slice() {
        return Err(ExportError::SingleClass(only.clone()));
    }
    if feature_names.len() != forest.n_features {
        return Err(ExportError::FeatureNames {
            expected: forest.n_features,
            found: feature_names.len(),
        });
    }

    let labels = ClassLabels::from_classes(&forest.classes);
    let n_features = forest.n_features as i64;
    let n_classes = forest.n_classes() as i64;
    let batch = || Dim::Symbolic(BATCH_DIM.to_string());

    let mut nodes = vec![NodeProto {
        input: vec![options.input_name.clone()],
        output: vec!["label".to_string(), "probabilities".to_string()],
        name: TREE_ENSEMBLE_OP.to_string(),
        op_type: TREE_ENSEMBLE_OP.to_string(),
        attribute: ensemble_attributes(forest, &labels),
        domain: ML_DOMAIN.to_string(),
        ..Default::default()
    }];

    let label_type = TypeProto::tensor(labels.elem_type(), &[batch()]);
    let outputs = if options.zipmap {
        nodes.push(NodeProto {
            input: vec!["label".to_string()],
            output: vec!["output_label".to_string()],
            name: "LabelIdentity".to_string(),
            op_type: "Identity".to_string(),
            ..Default::default()
        });
        nodes.push(NodeProto {
            input: vec!["probabilities".to_string()],
            output: vec!["output_probability".to_string()],
            name: "ZipMap".to_string(),
            op_type: "ZipMap".to_string(),
            attribute: vec![labels.attribute()],
            domain: ML_DOMAIN.to_string(),
            ..Default::default()
        });
        vec![
            value_info("output_label", label_type),
            value_info(
                "output_probability",
                TypeProto::sequence_of_maps(
                    labels.elem_type(),
                    TypeProto::tensor(data_type::FLOAT, &[]),
                ),
            ),
        ]
    } else {
        vec![
            value_info("label", label_type),
            value_info(
                "probabilities",
                TypeProto::tensor(data_type::FLOAT, &[batch(), Dim::Fixed(n_classes)]),
            ),
        ]
    };

    let graph = GraphProto {
        node: nodes,
        name: "RandomForestClassifier".to_string(),
        input: vec![value_info(
            &options.input_name,
            TypeProto::tensor(data_type::FLOAT, &[batch(), Dim::Fixed(n_features)]),
        )],
        output: outputs,
        ..Default::default()
    };

    Ok(ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![
            OperatorSetIdProto {
                domain: ML_DOMAIN.to_string(),
                version: ML_OPSET,
            },
            OperatorSetIdProto {
                domain: String::new(),
                version: DEFAULT_OPSET,
            },
        ],
        producer_name: PRODUCER_NAME.to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        domain: String::new(),
        model_version: 0,
        doc_string: String::new(),
        graph: Some(graph),
        metadata_props: vec![StringStringEntryProto {
            key: FEATURE_NAMES_KEY.to_string(),
            value: serde_json::to_string(feature_names)?,
        }],
    })
}

fn value_info(name: &str, r#type: TypeProto) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(r#type),
        doc_string: String::new(),
    }
}

/// Flatten every tree into the parallel `nodes_*` / `class_*` arrays.
///
/// Leaf weights are the leaf class distribution divided by the tree count, so
/// summing over trees yields the forest's mean probability.
fn ensemble_attributes(forest: &RandomForest, labels: &ClassLabels) -> Vec<AttributeProto> {
    let n_trees = forest.trees.len() as f32;
    let mut class_ids = Vec::new();
    let mut class_nodeids = Vec::new();
    let mut class_treeids = Vec::new();
    let mut class_weights = Vec::new();
    let mut nodes_falsenodeids = Vec::new();
    let mut nodes_featureids = Vec::new();
    let mut nodes_hitrates = Vec::new();
    let mut nodes_missing_value_tracks_true = Vec::new();
    let mut nodes_modes = Vec::new();
    let mut nodes_nodeids = Vec::new();
    let mut nodes_treeids = Vec::new();
    let mut nodes_truenodeids = Vec::new();
    let mut nodes_values = Vec::new();

    for (tree_id, tree) in forest.trees.iter().enumerate() {
        let tree_id = tree_id as i64;
        for (node_id, node) in tree.nodes.iter().enumerate() {
            let node_id = node_id as i64;
            nodes_treeids.push(tree_id);
            nodes_nodeids.push(node_id);
            nodes_hitrates.push(1.0f32);
            nodes_missing_value_tracks_true.push(0i64);
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    nodes_featureids.push(*feature as i64);
                    nodes_values.push(*threshold);
                    nodes_modes.push("BRANCH_LEQ");
                    nodes_truenodeids.push(*left as i64);
                    nodes_falsenodeids.push(*right as i64);
                }
                Node::Leaf { distribution } => {
                    nodes_featureids.push(0);
                    nodes_values.push(0.0);
                    nodes_modes.push("LEAF");
                    nodes_truenodeids.push(0);
                    nodes_falsenodeids.push(0);
                    for (class_id, &p) in distribution.iter().enumerate() {
                        class_treeids.push(tree_id);
                        class_nodeids.push(node_id);
                        class_ids.push(class_id as i64);
                        class_weights.push(p / n_trees);
                    }
                }
            }
        }
    }

    let mut attributes = vec![
        AttributeProto::ints("class_ids", class_ids),
        AttributeProto::ints("class_nodeids", class_nodeids),
        AttributeProto::ints("class_treeids", class_treeids),
        AttributeProto::floats("class_weights", class_weights),
        labels.attribute(),
        AttributeProto::ints("nodes_falsenodeids", nodes_falsenodeids),
        AttributeProto::ints("nodes_featureids", nodes_featureids),
        AttributeProto::floats("nodes_hitrates", nodes_hitrates),
        AttributeProto::ints(
            "nodes_missing_value_tracks_true",
            nodes_missing_value_tracks_true,
        ),
        AttributeProto::strings("nodes_modes", nodes_modes.as_slice()),
        AttributeProto::ints("nodes_nodeids", nodes_nodeids),
        AttributeProto::ints("nodes_treeids", nodes_treeids),
        AttributeProto::ints("nodes_truenodeids", nodes_truenodeids),
        AttributeProto::floats("nodes_values", nodes_values),
        AttributeProto::string("post_transform", "NONE"),
    ];
    attributes.sort_by(|a, b| a.name.cmp(&b.name));
    attributes
}

/// Serialized model written to disk.
#[derive(Debug, Clone)]
pub struct WrittenModel {
    pub path: PathBuf,
    pub bytes: usize,
    /// Lowercase hex SHA-256 of the written bytes.
    pub sha256: String,
}

/// Encode `model` and write it to `path`, replacing any existing file.
pub fn write_model(model: &ModelProto, path: &Path) -> Result<WrittenModel, ExportError> {
    let bytes = model.encode_to_vec();
    std::fs::write(path, &bytes).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    tracing::info!(path = %path.display(), bytes = bytes.len(), %sha256, "Wrote ONNX model");
    Ok(WrittenModel {
        path: path.to_path_buf(),
        bytes: bytes.len(),
        sha256,
    })
}
