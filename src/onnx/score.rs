//! Minimal evaluator for exported tree-ensemble graphs.
//!
//! Only the `TreeEnsembleClassifier` node is interpreted; a trailing `ZipMap`
//! is ignored because scores are always returned as flat arrays.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use prost::Message;
use thiserror::Error;

use super::export::{ClassLabels, FEATURE_NAMES_KEY, TREE_ENSEMBLE_OP};
use super::proto::{AttributeProto, ModelProto, NodeProto};
use crate::ml::forest::argmax;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("model has no {0} node")]
    MissingNode(&'static str),
    #[error("node is missing attribute {0}")]
    MissingAttribute(&'static str),
    #[error("unsupported node mode {0:?}")]
    UnsupportedMode(String),
    #[error("unsupported post_transform {0:?}")]
    UnsupportedTransform(String),
    #[error("model expects {expected} features but input has {found}")]
    FeatureCount { expected: usize, found: usize },
    #[error("malformed tree ensemble: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Leq,
    Lt,
    Gte,
    Gt,
    Eq,
    Neq,
    Leaf,
}

impl Mode {
    fn parse(raw: &[u8]) -> Result<Self, ScoreError> {
        Ok(match raw {
            b"BRANCH_LEQ" => Mode::Leq,
            b"BRANCH_LT" => Mode::Lt,
            b"BRANCH_GTE" => Mode::Gte,
            b"BRANCH_GT" => Mode::Gt,
            b"BRANCH_EQ" => Mode::Eq,
            b"BRANCH_NEQ" => Mode::Neq,
            b"LEAF" => Mode::Leaf,
            other => return Err(ScoreError::UnsupportedMode(String::from_utf8_lossy(other).into_owned())),
        })
    }

    fn goes_true(self, x: f32, threshold: f32) -> bool {
        match self {
            Mode::Leq => x <= threshold,
            Mode::Lt => x < threshold,
            Mode::Gte => x >= threshold,
            Mode::Gt => x > threshold,
            Mode::Eq => x == threshold,
            Mode::Neq => x != threshold,
            Mode::Leaf => false,
        }
    }
}

#[derive(Debug, Clone)]
struct EnsembleNode {
    mode: Mode,
    feature: usize,
    value: f32,
    true_id: usize,
    false_id: usize,
    weights: Vec<(usize, f32)>,
}

#[derive(Debug, Clone)]
struct EnsembleTree {
    root: usize,
    nodes: Vec<EnsembleNode>,
}

impl EnsembleTree {
    fn leaf_weights(&self, row: &[f32]) -> Result<&[(usize, f32)], ScoreError> {
        let mut idx = self.root;
        for _ in 0..=self.nodes.len() {
            let node = &self.nodes[idx];
            if node.mode == Mode::Leaf {
                return Ok(&node.weights);
            }
            let x = row.get(node.feature).copied().ok_or_else(|| {
                ScoreError::Malformed(format!("feature id {} out of range", node.feature))
            })?;
            idx = if node.mode.goes_true(x, node.value) {
                node.true_id
            } else {
                node.false_id
            };
        }
        Err(ScoreError::Malformed("tree contains a cycle".into()))
    }
}

/// Flat scores for a batch of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    /// Predicted label per row.
    pub labels: Vec<String>,
    /// Shape: `[rows, classes]`.
    pub probabilities: Array2<f32>,
}

/// Decoded tree ensemble ready to score feature rows.
#[derive(Debug, Clone)]
pub struct GraphScorer {
    input_name: String,
    n_features: usize,
    feature_names: Option<Vec<String>>,
    labels: ClassLabels,
    base_values: Vec<f32>,
    trees: Vec<EnsembleTree>,
    flat_outputs: bool,
}

impl GraphScorer {
    /// Read and decode an ONNX file.
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let bytes = std::fs::read(path).map_err(|source| ScoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = ModelProto::decode(bytes.as_slice())?;
        Self::from_model(&model)
    }

    pub fn from_model(model: &ModelProto) -> Result<Self, ScoreError> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| ScoreError::Malformed("model has no graph".into()))?;
        let node = graph
            .node
            .iter()
            .find(|node| node.op_type == TREE_ENSEMBLE_OP)
            .ok_or(ScoreError::MissingNode(TREE_ENSEMBLE_OP))?;

        let post_transform = node
            .attribute
            .iter()
            .find(|attr| attr.name == "post_transform")
            .map(|attr| String::from_utf8_lossy(&attr.s).into_owned())
            .unwrap_or_else(|| "NONE".to_string());
        if post_transform != "NONE" {
            return Err(ScoreError::UnsupportedTransform(post_transform));
        }

        let labels = class_labels(node)?;
        let base_values = find(node, "base_values")
            .map(|attr| attr.floats.clone())
            .unwrap_or_default();
        let trees = build_trees(node, labels.len())?;

        let input_name = node
            .input
            .first()
            .cloned()
            .ok_or_else(|| ScoreError::Malformed("tree ensemble has no input".into()))?;
        let declared = graph
            .input
            .iter()
            .find(|input| input.name == input_name)
            .and_then(|input| input.r#type.as_ref())
            .and_then(|ty| ty.as_tensor())
            .and_then(|tensor| tensor.shape.as_ref())
            .and_then(|shape| shape.dims().get(1).copied().flatten());
        let max_feature = trees
            .iter()
            .flat_map(|tree| tree.nodes.iter())
            .filter(|node| node.mode != Mode::Leaf)
            .map(|node| node.feature + 1)
            .max()
            .unwrap_or(0);
        let n_features = declared.map(|n| n as usize).unwrap_or(max_feature);
        if max_feature > n_features {
            return Err(ScoreError::Malformed(format!(
                "feature id {} exceeds declared input width {n_features}",
                max_feature - 1
            )));
        }

        let feature_names = model
            .metadata_props
            .iter()
            .find(|entry| entry.key == FEATURE_NAMES_KEY)
            .and_then(|entry| serde_json::from_str::<Vec<String>>(&entry.value).ok());
        let flat_outputs = graph
            .output
            .iter()
            .all(|output| output.r#type.as_ref().and_then(|ty| ty.as_tensor()).is_some());

        Ok(Self {
            input_name,
            n_features,
            feature_names,
            labels,
            base_values,
            trees,
            flat_outputs,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Feature column names recorded at export time, if any.
    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// True when every graph output is a plain tensor (no `ZipMap`).
    pub fn has_flat_outputs(&self) -> bool {
        self.flat_outputs
    }

    /// Sum leaf weights over all trees and pick the best class per row.
    pub fn score(&self, x: ArrayView2<'_, f32>) -> Result<Scores, ScoreError> {
        if x.ncols() != self.n_features {
            return Err(ScoreError::FeatureCount {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        let n_classes = self.labels.len();
        let mut probabilities = Array2::<f32>::zeros((x.nrows(), n_classes));
        let mut labels = Vec::with_capacity(x.nrows());
        for (row, mut out) in x.rows().into_iter().zip(probabilities.rows_mut()) {
            let row = row.to_vec();
            for (slot, base) in out.iter_mut().zip(&self.base_values) {
                *slot = *base;
            }
            for tree in &self.trees {
                for &(class_id, weight) in tree.leaf_weights(&row)? {
                    out[class_id] += weight;
                }
            }
            let best = argmax(out.as_slice().unwrap_or(&[]));
            labels.push(self.labels.text(best).unwrap_or_default());
        }
        Ok(Scores {
            labels,
            probabilities,
        })
    }
}

fn find<'a>(node: &'a NodeProto, name: &str) -> Option<&'a AttributeProto> {
    node.attribute.iter().find(|attr| attr.name == name)
}

fn require<'a>(node: &'a NodeProto, name: &'static str) -> Result<&'a AttributeProto, ScoreError> {
    find(node, name).ok_or(ScoreError::MissingAttribute(name))
}

fn class_labels(node: &NodeProto) -> Result<ClassLabels, ScoreError> {
    if let Some(attr) = find(node, "classlabels_int64s") {
        return Ok(ClassLabels::Int64(attr.ints.clone()));
    }
    let attr = require(node, "classlabels_strings")?;
    Ok(ClassLabels::Strings(
        attr.strings
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect(),
    ))
}

fn to_index(value: i64, what: &str) -> Result<usize, ScoreError> {
    usize::try_from(value).map_err(|_| ScoreError::Malformed(format!("negative {what} {value}")))
}

fn build_trees(node: &NodeProto, n_classes: usize) -> Result<Vec<EnsembleTree>, ScoreError> {
    let tree_ids = &require(node, "nodes_treeids")?.ints;
    let node_ids = &require(node, "nodes_nodeids")?.ints;
    let feature_ids = &require(node, "nodes_featureids")?.ints;
    let modes = &require(node, "nodes_modes")?.strings;
    let values = &require(node, "nodes_values")?.floats;
    let true_ids = &require(node, "nodes_truenodeids")?.ints;
    let false_ids = &require(node, "nodes_falsenodeids")?.ints;
    let n = tree_ids.len();
    if [node_ids.len(), feature_ids.len(), modes.len(), values.len(), true_ids.len(), false_ids.len()]
        .iter()
        .any(|&len| len != n)
    {
        return Err(ScoreError::Malformed("nodes_* arrays differ in length".into()));
    }

    let class_tree_ids = &require(node, "class_treeids")?.ints;
    let class_node_ids = &require(node, "class_nodeids")?.ints;
    let class_ids = &require(node, "class_ids")?.ints;
    let class_weights = &require(node, "class_weights")?.floats;
    let m = class_tree_ids.len();
    if class_node_ids.len() != m || class_ids.len() != m || class_weights.len() != m {
        return Err(ScoreError::Malformed("class_* arrays differ in length".into()));
    }

    // tree id -> node id -> position in that tree's node list
    let mut positions: BTreeMap<i64, BTreeMap<i64, usize>> = BTreeMap::new();
    let mut raw: BTreeMap<i64, Vec<(i64, i64, EnsembleNode)>> = BTreeMap::new();
    for i in 0..n {
        let mode = Mode::parse(&modes[i])?;
        let tree = raw.entry(tree_ids[i]).or_default();
        let slots = positions.entry(tree_ids[i]).or_default();
        if slots.insert(node_ids[i], tree.len()).is_some() {
            return Err(ScoreError::Malformed(format!(
                "duplicate node {} in tree {}",
                node_ids[i], tree_ids[i]
            )));
        }
        tree.push((
            true_ids[i],
            false_ids[i],
            EnsembleNode {
                mode,
                feature: to_index(feature_ids[i], "feature id")?,
                value: values[i],
                true_id: 0,
                false_id: 0,
                weights: Vec::new(),
            },
        ));
    }

    for j in 0..m {
        let class_id = to_index(class_ids[j], "class id")?;
        if class_id >= n_classes {
            return Err(ScoreError::Malformed(format!("class id {class_id} out of range")));
        }
        let pos = positions
            .get(&class_tree_ids[j])
            .and_then(|slots| slots.get(&class_node_ids[j]))
            .copied()
            .ok_or_else(|| {
                ScoreError::Malformed(format!(
                    "class weight targets unknown node {} in tree {}",
                    class_node_ids[j], class_tree_ids[j]
                ))
            })?;
        if let Some(tree) = raw.get_mut(&class_tree_ids[j]) {
            tree[pos].2.weights.push((class_id, class_weights[j]));
        }
    }

    let mut trees = Vec::with_capacity(raw.len());
    for (tree_id, entries) in raw {
        let slots = &positions[&tree_id];
        let lookup = |id: i64| {
            slots.get(&id).copied().ok_or_else(|| {
                ScoreError::Malformed(format!("tree {tree_id} references unknown node {id}"))
            })
        };
        let mut children = BTreeSet::new();
        let mut nodes = Vec::with_capacity(entries.len());
        for (true_id, false_id, mut node) in entries {
            if node.mode != Mode::Leaf {
                node.true_id = lookup(true_id)?;
                node.false_id = lookup(false_id)?;
                children.insert(node.true_id);
                children.insert(node.false_id);
            }
            nodes.push(node);
        }
        let mut roots = (0..nodes.len()).filter(|pos| !children.contains(pos));
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => root,
            _ => {
                return Err(ScoreError::Malformed(format!(
                    "tree {tree_id} does not have exactly one root"
                )));
            }
        };
        trees.push(EnsembleTree { root, nodes });
    }
    Ok(trees)
}
