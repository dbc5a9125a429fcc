//! Evaluation metrics for classification models.

use ndarray::ArrayView2;

use super::forest::RandomForest;

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f32;
        let mut fp = 0f32;
        let mut fn_ = 0f32;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f32;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f32;
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        stats.push(PerClassStats {
            precision,
            recall,
            support,
        });
    }
    stats
}

/// Fraction of predictions that equal the truth; `0.0` for no rows.
pub fn accuracy<T: PartialEq<U>, U>(truth: &[T], predicted: &[U]) -> f64 {
    let total = truth.len().min(predicted.len());
    if total == 0 {
        return 0.0;
    }
    let correct = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| *t == *p)
        .count();
    correct as f64 / total as f64
}

/// Holdout evaluation of a forest.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Exact label matches over evaluated rows.
    pub accuracy: f64,
    /// Evaluated row count.
    pub rows: usize,
    /// Rows whose true label is a class the model never saw.
    pub unseen_labels: usize,
    /// Over the model's classes; rows with unseen labels are left out.
    pub confusion: ConfusionMatrix,
}

/// Predict `x` and compare against the text labels.
///
/// Rows labelled with a class outside the model's class list can never be
/// predicted correctly; they count against accuracy.
pub fn evaluate(forest: &RandomForest, x: ArrayView2<'_, f32>, labels: &[String]) -> Evaluation {
    let predicted = forest.predict(x);
    let mut confusion = ConfusionMatrix::new(forest.n_classes());
    let mut unseen_labels = 0usize;
    let mut predicted_labels = Vec::with_capacity(predicted.len());
    for (truth, &pred) in labels.iter().zip(&predicted) {
        predicted_labels.push(forest.classes[pred].as_str());
        match forest.classes.binary_search(truth) {
            Ok(truth_idx) => confusion.add(truth_idx, pred),
            Err(_) => unseen_labels += 1,
        }
    }
    Evaluation {
        accuracy: accuracy(labels, predicted_labels.as_slice()),
        rows: predicted.len(),
        unseen_labels,
        confusion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::forest::{DecisionTree, Node};
    use ndarray::array;

    #[test]
    fn accuracy_counts_exact_matches() {
        let truth = vec!["a".to_string(), "b".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(accuracy(&truth, &["a", "b", "a", "c"]), 0.75);
        assert_eq!(accuracy::<String, &str>(&[], &[]), 0.0);
    }

    #[test]
    fn per_class_stats_from_matrix() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(1, 1);
        cm.add(5, 0);
        let stats = precision_recall_by_class(&cm);
        assert_eq!(stats[0].support, 2);
        assert_eq!(stats[0].recall, 0.5);
        assert_eq!(stats[0].precision, 1.0);
        assert!((stats[1].precision - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(stats[1].recall, 1.0);
    }

    #[test]
    fn unseen_test_labels_count_as_misses() {
        let forest = RandomForest {
            n_features: 1,
            classes: vec!["a".into(), "b".into()],
            trees: vec![DecisionTree {
                nodes: vec![
                    Node::Split {
                        feature: 0,
                        threshold: 0.5,
                        left: 1,
                        right: 2,
                    },
                    Node::Leaf {
                        distribution: vec![1.0, 0.0],
                    },
                    Node::Leaf {
                        distribution: vec![0.0, 1.0],
                    },
                ],
            }],
        };
        let x = array![[0.0f32], [1.0], [1.0]];
        let labels = vec!["a".to_string(), "b".to_string(), "z".to_string()];
        let eval = evaluate(&forest, x.view(), &labels);
        assert_eq!(eval.rows, 3);
        assert_eq!(eval.unseen_labels, 1);
        assert!((eval.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(eval.confusion.get(1, 1), 1);
    }
}
