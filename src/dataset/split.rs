//! Feature/label separation and the seeded train/test partition.

use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use super::table::{Cell, Table};

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("label column {0:?} not found")]
    MissingLabelColumn(String),
    #[error("feature column {0:?} not found")]
    MissingFeatureColumn(String),
    #[error("table has no feature columns besides {0:?}")]
    NoFeatureColumns(String),
    #[error("column {column:?} row {row}: {value:?} is not numeric")]
    NonNumericFeature {
        column: String,
        row: usize,
        value: String,
    },
    #[error("column {column:?} row {row} is missing; impute before splitting")]
    MissingValue { column: String, row: usize },
    #[error("need at least 2 rows to split, found {0}")]
    TooFewRows(usize),
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidTestFraction(f64),
}

/// Predictors and targets pulled out of a table.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// Feature column names in original table order.
    pub feature_names: Vec<String>,
    /// Shape: `[rows, feature_names.len()]`.
    pub x: Array2<f32>,
    /// Label text per row; empty when the table had no label column.
    pub labels: Vec<String>,
    /// Name of the label column the labels came from, if the table had one.
    pub label_column: Option<String>,
}

impl FeatureSet {
    /// Split `table` into the label column and every other column.
    pub fn from_table(table: &Table, label_column: &str) -> Result<Self, SplitError> {
        let label_idx = table
            .column_index(label_column)
            .ok_or_else(|| SplitError::MissingLabelColumn(label_column.to_string()))?;
        let feature_cols: Vec<usize> = (0..table.n_columns()).filter(|&idx| idx != label_idx).collect();
        if feature_cols.is_empty() {
            return Err(SplitError::NoFeatureColumns(label_column.to_string()));
        }
        extract(table, &feature_cols, Some((label_column, label_idx)))
    }

    /// Pull the named feature columns, in the given order, plus the label
    /// column when the table has one. Labels stay empty otherwise.
    pub fn with_columns(
        table: &Table,
        feature_names: &[String],
        label_column: &str,
    ) -> Result<Self, SplitError> {
        let feature_cols = feature_names
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| SplitError::MissingFeatureColumn(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if feature_cols.is_empty() {
            return Err(SplitError::NoFeatureColumns(label_column.to_string()));
        }
        let label = table.column_index(label_column).map(|idx| (label_column, idx));
        extract(table, &feature_cols, label)
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn has_labels(&self) -> bool {
        self.label_column.is_some()
    }

    /// Copy the given rows out as a feature matrix and aligned labels.
    pub fn select(&self, rows: &[usize]) -> (Array2<f32>, Vec<String>) {
        let x = self.x.select(Axis(0), rows);
        let labels = rows
            .iter()
            .filter_map(|&row| self.labels.get(row).cloned())
            .collect();
        (x, labels)
    }
}

fn extract(
    table: &Table,
    feature_cols: &[usize],
    label: Option<(&str, usize)>,
) -> Result<FeatureSet, SplitError> {
    let n_rows = table.n_rows();
    let mut x = Array2::<f32>::zeros((n_rows, feature_cols.len()));
    let mut labels = Vec::with_capacity(if label.is_some() { n_rows } else { 0 });
    for (row_idx, row) in table.rows().iter().enumerate() {
        for (out_col, &col) in feature_cols.iter().enumerate() {
            x[[row_idx, out_col]] = match &row[col] {
                Cell::Number(value) => *value as f32,
                Cell::Missing => {
                    return Err(SplitError::MissingValue {
                        column: table.columns()[col].clone(),
                        row: row_idx,
                    });
                }
                Cell::Text(value) => {
                    return Err(SplitError::NonNumericFeature {
                        column: table.columns()[col].clone(),
                        row: row_idx,
                        value: value.clone(),
                    });
                }
            };
        }
        if let Some((name, idx)) = label {
            let text = row[idx].label_text().ok_or_else(|| SplitError::MissingValue {
                column: name.to_string(),
                row: row_idx,
            })?;
            labels.push(text);
        }
    }

    Ok(FeatureSet {
        feature_names: feature_cols
            .iter()
            .map(|&col| table.columns()[col].clone())
            .collect(),
        x,
        labels,
        label_column: label.map(|(name, _)| name.to_string()),
    })
}

/// Row indices for each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Number of test rows for `n_rows` at `test_fraction`, rounded up.
pub fn test_count(n_rows: usize, test_fraction: f64) -> usize {
    (test_fraction * n_rows as f64).ceil() as usize
}

/// Shuffle row indices with a seeded generator and cut off the test share.
///
/// The same `(n_rows, test_fraction, seed)` always yields the same membership.
pub fn train_test_split(n_rows: usize, test_fraction: f64, seed: u64) -> Result<Partition, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidTestFraction(test_fraction));
    }
    if n_rows < 2 {
        return Err(SplitError::TooFewRows(n_rows));
    }
    let n_test = test_count(n_rows, test_fraction);
    if n_test == 0 || n_test >= n_rows {
        return Err(SplitError::TooFewRows(n_rows));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_test);
    Ok(Partition {
        train,
        test: indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::table::read_csv_from;

    fn table(data: &str) -> Table {
        read_csv_from(data.as_bytes()).unwrap()
    }

    #[test]
    fn label_is_removed_and_order_kept() {
        let t = table("Start Freq,Species,End Freq,Duration\n40,Myotis,20,3.5\n55,Nyctalus,25,8\n");
        let set = FeatureSet::from_table(&t, "Species").unwrap();
        assert_eq!(set.feature_names, vec!["Start Freq", "End Freq", "Duration"]);
        assert_eq!(set.n_features(), 3);
        assert_eq!(set.x.row(1).to_vec(), vec![55.0, 25.0, 8.0]);
        assert_eq!(set.labels, vec!["Myotis", "Nyctalus"]);
        assert_eq!(set.label_column.as_deref(), Some("Species"));
    }

    #[test]
    fn missing_label_column_fails() {
        let t = table("a,b\n1,2\n");
        let err = FeatureSet::from_table(&t, "Species").unwrap_err();
        assert!(matches!(err, SplitError::MissingLabelColumn(name) if name == "Species"));
    }

    #[test]
    fn text_feature_fails_with_location() {
        let t = table("a,b,Species\n1,2,x\n1,loud,y\n");
        let err = FeatureSet::from_table(&t, "Species").unwrap_err();
        match err {
            SplitError::NonNumericFeature { column, row, value } => {
                assert_eq!(column, "b");
                assert_eq!(row, 1);
                assert_eq!(value, "loud");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unimputed_gap_fails() {
        let t = table("a,b,Species\n1,,x\n");
        let err = FeatureSet::from_table(&t, "Species").unwrap_err();
        assert!(matches!(err, SplitError::MissingValue { row: 0, .. }));
    }

    #[test]
    fn named_columns_follow_requested_order() {
        let t = table("b,a,c\n1,2,3\n4,5,6\n");
        let names = vec!["c".to_string(), "a".to_string()];
        let set = FeatureSet::with_columns(&t, &names, "Species").unwrap();
        assert_eq!(set.x.row(0).to_vec(), vec![3.0, 2.0]);
        assert_eq!(set.n_rows(), 2);
        assert!(set.labels.is_empty());
        assert!(!set.has_labels());
        assert_eq!(set.label_column, None);

        let missing = vec!["d".to_string()];
        let err = FeatureSet::with_columns(&t, &missing, "Species").unwrap_err();
        assert!(matches!(err, SplitError::MissingFeatureColumn(name) if name == "d"));
    }

    #[test]
    fn empty_table_has_labels_only_with_label_column() {
        let names = vec!["a".to_string(), "b".to_string()];
        let unlabeled = FeatureSet::with_columns(&table("a,b\n"), &names, "Species").unwrap();
        assert_eq!(unlabeled.n_rows(), 0);
        assert!(!unlabeled.has_labels());

        let labeled = FeatureSet::with_columns(&table("a,b,Species\n"), &names, "Species").unwrap();
        assert_eq!(labeled.n_rows(), 0);
        assert!(labeled.has_labels());
    }

    #[test]
    fn test_share_rounds_up() {
        assert_eq!(test_count(10, 0.2), 2);
        assert_eq!(test_count(11, 0.2), 3);
        assert_eq!(test_count(99, 0.2), 20);
        assert_eq!(test_count(5, 0.2), 1);
    }

    #[test]
    fn split_is_disjoint_complete_and_seeded() {
        let first = train_test_split(53, 0.2, 42).unwrap();
        let again = train_test_split(53, 0.2, 42).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.test.len(), 11);
        assert_eq!(first.train.len(), 42);

        let mut all: Vec<usize> = first.train.iter().chain(first.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..53).collect::<Vec<_>>());

        let other = train_test_split(53, 0.2, 7).unwrap();
        assert_ne!(first.test, other.test);
    }

    #[test]
    fn degenerate_splits_fail() {
        assert!(matches!(train_test_split(1, 0.2, 42), Err(SplitError::TooFewRows(1))));
        assert!(matches!(
            train_test_split(10, 1.0, 42),
            Err(SplitError::InvalidTestFraction(_))
        ));
        assert!(matches!(
            train_test_split(10, 0.0, 42),
            Err(SplitError::InvalidTestFraction(_))
        ));
    }
}
