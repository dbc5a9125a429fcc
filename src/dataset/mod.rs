//! Tabular dataset ingestion and preparation.

pub mod impute;
pub mod split;
pub mod table;

pub use impute::{FillReport, fill_missing};
pub use split::{FeatureSet, Partition, SplitError, test_count, train_test_split};
pub use table::{Cell, Table, TableError, read_csv, read_csv_from};
