//! The DataTable and its transforms.
//!
//! Rows are flat vectors indexed by a table-wide column position; "unknown"
//! is `None`, distinct from numeric zero. Reads append cells as new columns
//! appear, so rows may be ragged until [`DataTable::fix_row_lengths`] pads
//! them, which always happens before a table leaves the query pipeline.
//!
//! Sorts are index-permutation sorts: compute the permutation once, then
//! apply it uniformly to `data`, `id_column`, `configs` and `timestamps`
//! (when their lengths match the row count), so no auxiliary array can fall
//! out of sync. `None` sorts before any value.

use crate::regress::{self, RegressionParams};
use perfview_core::names::{RECORD_NUM_NAME, REGRESS_NAME_PREFIX, TIME_NAME};
use perfview_core::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;

pub type DataRow = Vec<Option<f64>>;
pub type ConfigRow = Vec<Option<String>>;

/// The column-aligned wide table returned by range queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataTable {
    /// First entry is the X-axis label, the rest are `src:metric.stat`.
    #[serde(rename = "aggregatesColumnNames", skip_serializing_if = "Vec::is_empty")]
    pub column_names: Vec<String>,
    #[serde(rename = "aggregates", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataRow>,
    #[serde(rename = "ids", skip_serializing_if = "Vec::is_empty")]
    pub id_column: Vec<String>,
    #[serde(rename = "configsColumnNames", skip_serializing_if = "Vec::is_empty")]
    pub configs_column_names: Vec<String>,
    #[serde(rename = "configs", skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<ConfigRow>,
    /// Original time column, saved when the X axis is reassigned.
    #[serde(rename = "timestamps", skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<Option<f64>>>,
}

fn cmp_opt(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.total_cmp(&y),
    }
}

fn sort_permutation(names: &[String]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..names.len()).collect();
    perm.sort_by(|&a, &b| names[a].cmp(&names[b]));
    perm
}

fn permute<T: Default>(perm: &[usize], items: &mut Vec<T>) {
    let mut reordered: Vec<T> = Vec::with_capacity(items.len());
    for &i in perm {
        reordered.push(std::mem::take(&mut items[i]));
    }
    *items = reordered;
}

fn is_non_data(name: &str) -> bool {
    name == TIME_NAME || name == RECORD_NUM_NAME || name.starts_with(REGRESS_NAME_PREFIX)
}

impl DataTable {
    pub fn index_for_name(&self, col_name: &str) -> Result<usize> {
        index_of(&self.column_names, col_name)
    }

    pub fn index_for_config_name(&self, col_name: &str) -> Result<usize> {
        index_of(&self.configs_column_names, col_name)
    }

    /// Pads (or truncates) every data row to the current column count.
    pub fn fix_row_lengths(&mut self) {
        let required = self.column_names.len();
        for row in &mut self.data {
            if row.len() != required {
                row.resize(required, None);
            }
        }
    }

    /// Pads (or truncates) every config row to the config column count.
    pub fn fix_config_row_lengths(&mut self) {
        let required = self.configs_column_names.len();
        for row in &mut self.configs {
            if row.len() != required {
                row.resize(required, None);
            }
        }
    }

    /// Sorts data columns alphabetically by name, rearranging every row in
    /// lockstep. Rows are padded first.
    pub fn sort_data_columns(&mut self) {
        self.fix_row_lengths();
        let perm = sort_permutation(&self.column_names);
        permute(&perm, &mut self.column_names);
        for row in &mut self.data {
            permute(&perm, row);
        }
    }

    /// Sorts config columns by name, rearranging every config row.
    pub fn sort_configs_columns(&mut self) {
        self.fix_config_row_lengths();
        let perm = sort_permutation(&self.configs_column_names);
        permute(&perm, &mut self.configs_column_names);
        for row in &mut self.configs {
            permute(&perm, row);
        }
    }

    fn base_sort_rows(&mut self, reverse: bool, stable: bool) {
        let mut perm: Vec<usize> = (0..self.data.len()).collect();
        let data = &self.data;
        let key = |i: usize| data[i].first().copied().flatten();
        let compare = |&a: &usize, &b: &usize| {
            let ordering = cmp_opt(key(a), key(b));
            if reverse {
                ordering.reverse()
            } else {
                ordering
            }
        };
        if stable {
            perm.sort_by(compare);
        } else {
            perm.sort_unstable_by(compare);
        }
        self.apply_row_permutation(&perm);
    }

    /// Sorts rows ascending by the X column. `None` sorts first.
    pub fn sort_rows(&mut self) {
        self.base_sort_rows(false, false);
    }

    pub fn reverse_sort_rows(&mut self) {
        self.base_sort_rows(true, false);
    }

    /// Stable variant, for two-level sorts where the prior order is the
    /// secondary key.
    pub fn sort_rows_stable(&mut self) {
        self.base_sort_rows(false, true);
    }

    pub fn reverse_sort_rows_stable(&mut self) {
        self.base_sort_rows(true, true);
    }

    /// Reverses row order, keeping ids, configs and saved timestamps in
    /// sync.
    pub fn reverse_rows(&mut self) {
        let perm: Vec<usize> = (0..self.data.len()).rev().collect();
        self.apply_row_permutation(&perm);
    }

    fn apply_row_permutation(&mut self, perm: &[usize]) {
        let row_count = self.data.len();
        permute(perm, &mut self.data);
        if self.id_column.len() == row_count {
            permute(perm, &mut self.id_column);
        }
        if self.configs.len() == row_count {
            permute(perm, &mut self.configs);
        }
        if let Some(timestamps) = &mut self.timestamps {
            if timestamps.len() == row_count {
                permute(perm, timestamps);
            }
        }
    }

    /// Rewrites the X column with row indices. The prior X values must
    /// already be saved in `timestamps`.
    pub fn overwrite_x_axis_with_record_num(&mut self) {
        if let Some(name) = self.column_names.first_mut() {
            *name = RECORD_NUM_NAME.to_string();
        }
        for (i, row) in self.data.iter_mut().enumerate() {
            if let Some(x) = row.first_mut() {
                *x = Some(i as f64);
            }
        }
    }

    /// Saves the time column into `timestamps`, then rewrites X with row
    /// indices.
    pub fn change_x_axis_to_record_num_from_time(&mut self) {
        let mut timestamps = vec![None; self.data.len()];
        if let Some(name) = self.column_names.first_mut() {
            *name = RECORD_NUM_NAME.to_string();
        }
        for (i, row) in self.data.iter_mut().enumerate() {
            if let Some(x) = row.first_mut() {
                timestamps[i] = *x;
                *x = Some(i as f64);
            }
        }
        self.timestamps = Some(timestamps);
    }

    /// Copies the named column into the X position, saving the time column
    /// into `timestamps` and renaming column 0.
    pub fn change_x_axis_to_column_from_time(&mut self, col_name: &str) -> Result<()> {
        let col_idx = self.index_for_name(col_name)?;
        let mut timestamps = vec![None; self.data.len()];
        self.column_names[0] = col_name.to_string();
        for (i, row) in self.data.iter_mut().enumerate() {
            timestamps[i] = row.first().copied().flatten();
            let value = row.get(col_idx).copied().flatten();
            if let Some(x) = row.first_mut() {
                *x = value;
            }
        }
        self.timestamps = Some(timestamps);
        Ok(())
    }

    /// Replaces the X column with the named config column parsed as floats.
    /// Unparseable values leave the cell absent; rows without that config
    /// keep their current X. Saves the time column first when `from_time`.
    pub fn change_x_axis_to_config_column(&mut self, col_name: &str, from_time: bool) -> Result<()> {
        let col_idx = self.index_for_config_name(col_name)?;
        self.column_names[0] = col_name.to_string();
        let mut timestamps = if from_time {
            Some(vec![None; self.data.len()])
        } else {
            None
        };

        for (i, row) in self.data.iter_mut().enumerate() {
            if let Some(timestamps) = &mut timestamps {
                timestamps[i] = row.first().copied().flatten();
            }
            let Some(value) = self.configs.get(i).and_then(|c| c.get(col_idx)) else {
                continue;
            };
            let Some(value) = value else {
                continue;
            };
            if let Some(x) = row.first_mut() {
                *x = value.parse::<f64>().ok();
            }
        }

        if let Some(timestamps) = timestamps {
            self.timestamps = Some(timestamps);
        }
        Ok(())
    }

    /// Removes the named data column from the names and every row.
    pub fn delete_column(&mut self, col_name: &str) -> Result<()> {
        let col_idx = self.index_for_name(col_name)?;
        self.column_names.remove(col_idx);
        for row in &mut self.data {
            if col_idx < row.len() {
                row.remove(col_idx);
            }
        }
        Ok(())
    }

    /// Appends one value per row as a new trailing column.
    fn add_column(&mut self, col_name: String, column: Vec<Option<f64>>) {
        self.column_names.push(col_name);
        for (row, value) in self.data.iter_mut().zip(column) {
            row.push(value);
        }
    }

    /// Runs regression detection over every data column (never the time,
    /// record-number or an existing regression column) and attaches each
    /// non-empty result as a trailing `REGRESS:`-prefixed column. Rows must
    /// already be time-sorted.
    pub fn get_verified_regression(&mut self, params: &RegressionParams) {
        let original_columns = self.column_names.len();
        for col_idx in 0..original_columns {
            if is_non_data(&self.column_names[col_idx]) {
                continue;
            }
            if let Some(result) = regress::verified_regression(&self.data, col_idx, params) {
                let name = format!("{}{}", REGRESS_NAME_PREFIX, self.column_names[col_idx]);
                self.add_column(name, result);
            }
        }
    }
}

fn index_of(names: &[String], name: &str) -> Result<usize> {
    names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| Error::BadInput(format!("non-existent name: {name}")))
}
