//! Multi-source merge into a single sparse wide table.
//!
//! Rows are keyed by their X value (time): records from different sources
//! at the same X share one merged row, with the time cell written once.
//! Every non-time column is renamed `src:<origName>` so series from
//! different sources stay distinct. Column slots are assigned by a merged
//! column-position map in first-seen order; merged rows stay ragged until
//! the caller runs `fix_row_lengths`, and row order is unspecified until
//! the caller sorts.

use crate::table::{ConfigRow, DataRow, DataTable};
use perfview_core::names::TIME_NAME;
use std::collections::HashMap;

#[derive(Default)]
struct FullRow {
    data: DataRow,
    configs: ConfigRow,
    id: String,
}

pub fn merge_data_tables(
    tables: &[DataTable],
    srcs: &[String],
    return_ids: bool,
    return_configs: bool,
) -> DataTable {
    let mut result = DataTable::default();

    // Map from X value (by bit pattern) to the merged row.
    let mut row_map: HashMap<u64, FullRow> = HashMap::new();
    // Maps from merged column name to its slot.
    let mut column_slots: HashMap<String, usize> = HashMap::new();
    let mut config_column_slots: HashMap<String, usize> = HashMap::new();

    for (table_idx, table) in tables.iter().enumerate() {
        let src = &srcs[table_idx];
        for (row_idx, row) in table.data.iter().enumerate() {
            let Some(x_value) = row.first().copied().flatten() else {
                continue;
            };

            let merged = row_map.entry(x_value.to_bits()).or_insert_with(|| FullRow {
                data: vec![None; result.column_names.len()],
                configs: vec![None; result.configs_column_names.len()],
                id: String::new(),
            });

            for (col_idx, col_name) in table.column_names.iter().enumerate() {
                let merged_name = if col_name == TIME_NAME {
                    // Don't write the X column more than once.
                    if merged.data.first().is_some_and(|x| x.is_some()) {
                        continue;
                    }
                    col_name.clone()
                } else {
                    format!("{src}:{col_name}")
                };

                let value = row.get(col_idx).copied().flatten();
                match column_slots.get(&merged_name) {
                    None => {
                        column_slots.insert(merged_name.clone(), result.column_names.len());
                        result.column_names.push(merged_name);
                        merged.data.push(value);
                    }
                    Some(&slot) => {
                        if slot >= merged.data.len() {
                            merged.data.resize(slot + 1, None);
                        }
                        merged.data[slot] = value;
                    }
                }
            }

            if return_ids {
                merged.id = table.id_column.get(row_idx).cloned().unwrap_or_default();
            }

            if return_configs {
                let Some(config_row) = table.configs.get(row_idx) else {
                    continue;
                };
                for (col_idx, col_name) in table.configs_column_names.iter().enumerate() {
                    let value = config_row.get(col_idx).cloned().flatten();
                    match config_column_slots.get(col_name) {
                        None => {
                            config_column_slots
                                .insert(col_name.clone(), result.configs_column_names.len());
                            result.configs_column_names.push(col_name.clone());
                            merged.configs.push(value);
                        }
                        Some(&slot) => {
                            if slot >= merged.configs.len() {
                                merged.configs.resize(slot + 1, None);
                            }
                            merged.configs[slot] = value;
                        }
                    }
                }
            }
        }
    }

    for (_, full_row) in row_map {
        result.data.push(full_row.data);
        if return_ids {
            result.id_column.push(full_row.id);
        }
        if return_configs {
            result.configs.push(full_row.configs);
        }
    }

    result
}
