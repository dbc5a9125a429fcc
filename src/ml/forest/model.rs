use ndarray::{Array2, ArrayView1, ArrayView2};

use super::tree::DecisionTree;

/// Fitted random forest classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    /// Number of features each input row must carry.
    pub n_features: usize,
    /// Ordered class labels; predictions index into this list.
    pub classes: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Mean of the per-tree leaf distributions for one row.
    pub fn predict_proba_row(&self, row: ArrayView1<'_, f32>) -> Vec<f32> {
        let mut proba = vec![0.0f32; self.n_classes()];
        if self.trees.is_empty() {
            return proba;
        }
        for tree in &self.trees {
            for (acc, &p) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *acc += p;
            }
        }
        let n_trees = self.trees.len() as f32;
        for p in &mut proba {
            *p /= n_trees;
        }
        proba
    }

    /// Class probabilities, shape `[rows, classes]`.
    pub fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((x.nrows(), self.n_classes()));
        for (row, mut target) in x.rows().into_iter().zip(out.rows_mut()) {
            for (slot, p) in target.iter_mut().zip(self.predict_proba_row(row)) {
                *slot = p;
            }
        }
        out
    }

    /// Predicted class index for one row; the lowest index wins ties.
    pub fn predict_class_index(&self, row: ArrayView1<'_, f32>) -> usize {
        argmax(&self.predict_proba_row(row))
    }

    /// Predicted class index for every row.
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Vec<usize> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_class_index(row))
            .collect()
    }

    /// Predicted class label for every row.
    pub fn predict_labels(&self, x: ArrayView2<'_, f32>) -> Vec<&str> {
        self.predict(x)
            .into_iter()
            .map(|idx| self.classes[idx].as_str())
            .collect()
    }
}

pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}
