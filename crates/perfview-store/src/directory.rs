//! The directory index.
//!
//! The `children` family maps `/<path>` rows to one column per leaf file,
//! each holding a serialized directory entry (metric names plus a
//! deduplicated units dictionary). Browsing is a bounded range scan; a
//! trailing-`*` search widens the row range to every path sharing the
//! prefix.

use crate::{Column, ColumnFamily, Engine, Row};
use bytes::Bytes;
use perfview_core::keys::plus_one;
use perfview_core::names::src_components;
use perfview_core::{wire, DirectoryRequest, Result, SourceInfo};
use tracing::debug;

/// Directory scans never return more than this many path rows.
const MAX_DIR_ROWS: usize = 100;

fn file_matches(req: &DirectoryRequest, column_name: &str) -> bool {
    req.file_restrict.is_empty()
        || (req.file_prefix_match && column_name.starts_with(&req.file_restrict))
        || (!req.file_prefix_match && column_name == req.file_restrict)
}

impl Engine {
    /// Writes (or overwrites) the directory entry for `src`.
    pub async fn write_dir(&self, info: &SourceInfo, src: &str) -> Result<()> {
        debug!(src, "directory mutation");
        let (path, file) = src_components(src);
        let row = Row {
            key: format!("/{path}"),
            columns: vec![Column {
                name: Bytes::from(file.to_string()),
                value: wire::encode_source_info(info),
            }],
        };
        self.store().insert(ColumnFamily::Children, row).await
    }

    /// Browses the directory index. Emits `<path>/<file>` names, or with
    /// `return_metrics`/`return_units` one `<path>/<file>:<metric>` entry
    /// per metric; units and select-for-defaults ride along only when
    /// their stored arrays are length-consistent with the metric names.
    pub async fn read_dir(&self, req: &DirectoryRequest) -> Result<SourceInfo> {
        let prefix = format!("/{}", req.prefix);
        let prefix_end = if req.dir_prefix_match {
            plus_one(&prefix)
        } else {
            prefix.clone()
        };

        let rows = self
            .store()
            .range_get(ColumnFamily::Children, &prefix, &prefix_end, MAX_DIR_ROWS)
            .await?;

        let mut out = SourceInfo::default();
        for row in rows.into_iter().flatten() {
            let row_name = row.key.get(1..).unwrap_or_default().to_string();
            for column in &row.columns {
                let col_name = String::from_utf8_lossy(&column.name).to_string();
                if !file_matches(req, &col_name) {
                    continue;
                }
                let stored = wire::decode_source_info(&column.value)?;

                if !req.return_metrics && !req.return_units {
                    out.names.push(format!("{row_name}/{col_name}"));
                    continue;
                }

                let defaults_consistent =
                    stored.select_for_defaults.len() == stored.metric_names.len();
                let units_consistent = stored.units_indices.len() == stored.metric_names.len();

                for (idx, metric) in stored.metric_names.iter().enumerate() {
                    let output_okay = !req.defaults_only
                        || (defaults_consistent && stored.select_for_defaults[idx]);
                    if !output_okay {
                        continue;
                    }
                    out.names.push(format!("{row_name}/{col_name}:{metric}"));
                    if req.return_units && units_consistent {
                        let unit = stored
                            .units_map
                            .get(stored.units_indices[idx] as usize)
                            .cloned()
                            .unwrap_or_default();
                        out.units.push(unit);
                    }
                    if req.return_select_for_defaults && defaults_consistent {
                        out.select_for_defaults.push(stored.select_for_defaults[idx]);
                    }
                }
            }
        }

        Ok(out)
    }

    /// Removes one file's directory entry.
    pub async fn delete_dir(&self, path: &str, file: &str) -> Result<()> {
        debug!(path, file, "directory delete");
        self.store()
            .delete_columns(
                ColumnFamily::Children,
                &format!("/{path}"),
                &[Bytes::from(file.to_string())],
            )
            .await
    }
}
