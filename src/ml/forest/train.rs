use std::collections::BTreeSet;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::ForestError;
use super::model::RandomForest;
use super::tree::{DecisionTree, Node};

/// How many features each split may consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Count(usize),
}

impl MaxFeatures {
    /// Resolve to a concrete count in `1..=n_features`.
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features.max(1);
        let k = match self {
            MaxFeatures::All => n,
            MaxFeatures::Sqrt => (n as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n as f64).log2() as usize,
            MaxFeatures::Count(count) => count,
        };
        k.clamp(1, n)
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestOptions {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// Maximum tree depth; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Minimum rows a node needs before it may split.
    pub min_samples_split: usize,
    /// Minimum rows on each side of a split.
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Fit each tree on a resample (with replacement) of the training rows.
    pub bootstrap: bool,
    /// Seed for resampling and feature sampling.
    #[serde(skip)]
    pub seed: u64,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestOptions {
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.n_trees == 0 {
            return Err(ForestError::InvalidOptions("n_trees must be at least 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidOptions(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidOptions(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.max_features == MaxFeatures::Count(0) {
            return Err(ForestError::InvalidOptions("max_features must be at least 1".into()));
        }
        Ok(())
    }
}

/// In-memory dataset used for training and evaluation.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    /// Sorted distinct class labels.
    pub classes: Vec<String>,
    /// Shape: `[rows, features]`.
    pub x: Array2<f32>,
    /// Class indices aligned with the rows of `x`.
    pub y: Vec<usize>,
}

impl TrainDataset {
    /// Encode text labels against their sorted distinct set.
    pub fn from_labels(x: Array2<f32>, labels: &[String]) -> Result<Self, ForestError> {
        if x.nrows() != labels.len() {
            return Err(ForestError::LengthMismatch {
                rows: x.nrows(),
                labels: labels.len(),
            });
        }
        let classes: Vec<String> = labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let y = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();
        Ok(Self { classes, x, y })
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

/// Fit a random forest of CART trees using Gini impurity.
pub fn fit_forest(dataset: &TrainDataset, options: &ForestOptions) -> Result<RandomForest, ForestError> {
    options.validate()?;
    if dataset.x.nrows() != dataset.y.len() {
        return Err(ForestError::LengthMismatch {
            rows: dataset.x.nrows(),
            labels: dataset.y.len(),
        });
    }
    if dataset.y.is_empty() {
        return Err(ForestError::EmptyDataset);
    }
    if dataset.n_features() == 0 {
        return Err(ForestError::NoFeatures);
    }

    let n = dataset.y.len();
    let max_features = options.max_features.resolve(dataset.n_features());
    let mut master = StdRng::seed_from_u64(options.seed);
    let mut trees = Vec::with_capacity(options.n_trees);
    for tree_idx in 0..options.n_trees {
        let mut rng = StdRng::seed_from_u64(master.random::<u64>());
        let samples: Vec<usize> = if options.bootstrap {
            (0..n).map(|_| rng.random_range(0..n)).collect()
        } else {
            (0..n).collect()
        };
        let builder = TreeBuilder {
            dataset,
            options,
            n_classes: dataset.classes.len(),
            max_features,
        };
        let tree = builder.build(samples, &mut rng);
        tracing::trace!(
            tree = tree_idx,
            nodes = tree.nodes.len(),
            depth = tree.depth(),
            "Fitted tree"
        );
        trees.push(tree);
    }

    Ok(RandomForest {
        n_features: dataset.n_features(),
        classes: dataset.classes.clone(),
        trees,
    })
}

struct TreeBuilder<'a> {
    dataset: &'a TrainDataset,
    options: &'a ForestOptions,
    n_classes: usize,
    max_features: usize,
}

struct Pending {
    samples: Vec<usize>,
    depth: usize,
    parent: Option<(usize, bool)>,
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    score: f64,
    feature: usize,
    threshold: f32,
}

impl TreeBuilder<'_> {
    /// Grow one tree depth-first; the left subtree is always emitted before the
    /// right one, so node ids come out in pre-order.
    fn build(&self, samples: Vec<usize>, rng: &mut StdRng) -> DecisionTree {
        let mut nodes: Vec<Node> = Vec::new();
        let mut stack = vec![Pending {
            samples,
            depth: 0,
            parent: None,
        }];

        while let Some(pending) = stack.pop() {
            let id = nodes.len();
            if let Some((parent, is_left)) = pending.parent {
                if let Node::Split { left, right, .. } = &mut nodes[parent] {
                    if is_left {
                        *left = id;
                    } else {
                        *right = id;
                    }
                }
            }

            let counts = self.class_counts(&pending.samples);
            let split = if self.may_split(&pending, &counts) {
                self.best_split(&pending.samples, &counts, rng)
            } else {
                None
            };

            match split {
                Some(split) => {
                    let (left, right): (Vec<usize>, Vec<usize>) = pending
                        .samples
                        .into_iter()
                        .partition(|&row| self.dataset.x[[row, split.feature]] <= split.threshold);
                    nodes.push(Node::Split {
                        feature: split.feature,
                        threshold: split.threshold,
                        left: 0,
                        right: 0,
                    });
                    stack.push(Pending {
                        samples: right,
                        depth: pending.depth + 1,
                        parent: Some((id, false)),
                    });
                    stack.push(Pending {
                        samples: left,
                        depth: pending.depth + 1,
                        parent: Some((id, true)),
                    });
                }
                None => {
                    let total = pending.samples.len().max(1) as f32;
                    nodes.push(Node::Leaf {
                        distribution: counts.iter().map(|&c| c as f32 / total).collect(),
                    });
                }
            }
        }

        DecisionTree { nodes }
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &row in samples {
            counts[self.dataset.y[row]] += 1;
        }
        counts
    }

    fn may_split(&self, pending: &Pending, counts: &[usize]) -> bool {
        let n = pending.samples.len();
        if n < self.options.min_samples_split || n < 2 * self.options.min_samples_leaf {
            return false;
        }
        if self.options.max_depth.is_some_and(|max| pending.depth >= max) {
            return false;
        }
        counts.iter().filter(|&&c| c > 0).count() > 1
    }

    fn best_split(&self, samples: &[usize], counts: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.dataset.n_features()).collect();
        features.shuffle(rng);

        let mut best: Option<BestSplit> = None;
        let mut informative = 0usize;
        let mut column: Vec<(f32, usize)> = Vec::with_capacity(samples.len());
        for feature in features {
            if informative >= self.max_features {
                break;
            }
            column.clear();
            column.extend(
                samples
                    .iter()
                    .map(|&row| (self.dataset.x[[row, feature]], self.dataset.y[row])),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column.first().map(|v| v.0) == column.last().map(|v| v.0) {
                continue;
            }
            informative += 1;
            if let Some(candidate) = self.best_threshold(&column, counts, feature)
                && best.is_none_or(|current| candidate.score < current.score)
            {
                best = Some(candidate);
            }
        }
        best
    }

    /// Scan the sorted column for the threshold minimising weighted Gini impurity.
    fn best_threshold(&self, column: &[(f32, usize)], counts: &[usize], feature: usize) -> Option<BestSplit> {
        let n = column.len();
        let min_leaf = self.options.min_samples_leaf;
        let mut left = vec![0usize; self.n_classes];
        let mut best: Option<BestSplit> = None;

        for pos in 1..n {
            left[column[pos - 1].1] += 1;
            let (prev, next) = (column[pos - 1].0, column[pos].0);
            if prev == next || pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            let score = weighted_gini(&left, counts, pos, n);
            if best.is_none_or(|current| score < current.score) {
                best = Some(BestSplit {
                    score,
                    feature,
                    threshold: midpoint(prev, next),
                });
            }
        }
        best
    }
}

/// `n_left * gini(left) + n_right * gini(right)`; lower is better.
fn weighted_gini(left: &[usize], total: &[usize], n_left: usize, n: usize) -> f64 {
    let n_right = n - n_left;
    let mut left_sq = 0f64;
    let mut right_sq = 0f64;
    for (&l, &t) in left.iter().zip(total) {
        let r = (t - l) as f64;
        left_sq += (l as f64) * (l as f64);
        right_sq += r * r;
    }
    let left_gini = 1.0 - left_sq / (n_left as f64 * n_left as f64);
    let right_gini = 1.0 - right_sq / (n_right as f64 * n_right as f64);
    n_left as f64 * left_gini + n_right as f64 * right_gini
}

/// Midpoint between two distinct sorted values that still separates them.
fn midpoint(prev: f32, next: f32) -> f32 {
    let mid = prev / 2.0 + next / 2.0;
    if mid >= next || !mid.is_finite() { prev } else { mid }
}
