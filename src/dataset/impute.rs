//! Missing-value imputation.

use super::table::{Cell, Table};

/// Summary of a fill pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillReport {
    /// Total number of cells replaced.
    pub filled: usize,
    /// `(column, filled)` for every column that had at least one gap.
    pub by_column: Vec<(String, usize)>,
}

/// Replace every missing cell in the table with `sentinel`.
///
/// Applies to all columns, the label column included. No row is dropped.
pub fn fill_missing(table: &mut Table, sentinel: f64) -> FillReport {
    let mut per_column = vec![0usize; table.n_columns()];
    for row in table.rows_mut() {
        for (idx, cell) in row.iter_mut().enumerate() {
            if cell.is_missing() {
                *cell = Cell::Number(sentinel);
                per_column[idx] += 1;
            }
        }
    }

    let by_column: Vec<(String, usize)> = table
        .columns()
        .iter()
        .zip(per_column)
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| (name.clone(), count))
        .collect();
    let filled = by_column.iter().map(|(_, count)| count).sum();
    for (column, count) in &by_column {
        tracing::debug!(column = %column, count, "Filled missing cells");
    }
    FillReport { filled, by_column }
}
