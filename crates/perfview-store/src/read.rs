//! The read engine.
//!
//! Both read paths fan out one task per storage fetch and hand each result
//! back over a dedicated oneshot channel, so the column families (and, for
//! range reads, the sources) are fetched concurrently while the parent
//! consumes them in a fixed order. The first error aborts assembly;
//! fetches still in flight run to completion and their results are
//! dropped.

use crate::{ColumnFamily, Engine, Row, RowRangeRequests};
use perfview_core::keys::extract_timestamp;
use perfview_core::names::TIME_NAME;
use perfview_core::wire;
use perfview_core::{Error, ReadRecord, Result, RowRequest};
use perfview_table::{merge_data_tables, DataRow, DataTable};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

impl Engine {
    /// Starts one row fetch in the background and returns its channel.
    fn spawn_get(&self, cf: ColumnFamily, row_key: String) -> oneshot::Receiver<Result<Option<Row>>> {
        let store = Arc::clone(self.store());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            debug!(cf = cf.as_str(), "reading row");
            let _ = tx.send(store.get(cf, &row_key).await);
        });
        rx
    }

    /// Starts one range fetch in the background and returns its channel.
    fn spawn_range_get(
        &self,
        cf: ColumnFamily,
        start_key: String,
        end_key: String,
        max_count: usize,
    ) -> oneshot::Receiver<Result<Vec<Option<Row>>>> {
        let store = Arc::clone(self.store());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            debug!(cf = cf.as_str(), "reading row range");
            let _ = tx.send(store.range_get(cf, &start_key, &end_key, max_count).await);
        });
        rx
    }

    /// Reads one record by id, fanning out across the points, source,
    /// aggregates and configs families.
    pub async fn read_row(&self, req: &RowRequest) -> Result<ReadRecord> {
        let agg_rx = (!req.no_return_aggregates)
            .then(|| self.spawn_get(ColumnFamily::Aggregates, req.id.clone()));
        let points_rx = self.spawn_get(ColumnFamily::Points, req.id.clone());
        let src_rx = self.spawn_get(ColumnFamily::Source, req.id.clone());
        let cfg_rx = self.spawn_get(ColumnFamily::Configs, req.id.clone());

        let mut record = ReadRecord::default();

        // Points.
        let points_row = recv(points_rx).await?;
        if let Some(points_row) = points_row {
            record.record_timestamp = Some(extract_timestamp(&points_row.key));
            self.assemble_points(&points_row, &mut record)?;
        }

        // Source.
        let src_row = recv(src_rx).await?;
        if let Some(src_row) = src_row {
            if let Some(column) = src_row.columns.first() {
                record.source = Some(String::from_utf8_lossy(&column.name).to_string());
            }
        }

        // Aggregates.
        if let Some(agg_rx) = agg_rx {
            let agg_row = recv(agg_rx).await?;
            if let Some(agg_row) = agg_row {
                if record.record_timestamp.is_none() {
                    record.record_timestamp = Some(extract_timestamp(&agg_row.key));
                }
                let mut checked_type = false;
                for column in &agg_row.columns {
                    let mut aggregation = wire::decode_aggregation(&column.value)?;
                    aggregation.make_double();
                    // The record's data type is uniform; take the first tag.
                    if !checked_type {
                        checked_type = true;
                        if let Some(data_type) = aggregation.data_type {
                            record.aggregates_data_type = data_type.as_str().to_string();
                        }
                    }
                    let metric = String::from_utf8_lossy(&column.name);
                    for (stat, value) in aggregation.double_fields_and_values() {
                        record
                            .aggregates_column_names
                            .push(format!("{metric}.{stat}"));
                        record.aggregates.push(Some(value));
                    }
                }
                record.sort_aggregates();
            }
        }

        // Configs.
        let cfg_row = recv(cfg_rx).await?;
        if let Some(cfg_row) = cfg_row {
            if record.record_timestamp.is_none() {
                record.record_timestamp = Some(extract_timestamp(&cfg_row.key));
            }
            for column in &cfg_row.columns {
                record.config_pairs.insert(
                    String::from_utf8_lossy(&column.name).to_string(),
                    String::from_utf8_lossy(&column.value).to_string(),
                );
            }
        }

        Ok(record)
    }

    /// Builds the points table: a map from timestamp to a sparse row, one
    /// column per stored point stream, column 0 the timestamp itself.
    /// Streams without timestamps (or with mismatched lengths) key their
    /// values by a monotonic 0..n-1 counter into the same map.
    fn assemble_points(&self, points_row: &Row, record: &mut ReadRecord) -> Result<()> {
        // The time header carries a leading "!" so the column sort leaves
        // it leftmost; restored after sorting.
        record.points_column_names.push(format!("!{TIME_NAME}"));

        let column_count = points_row.columns.len();
        let mut points_map: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
        let mut checked_type = false;

        for (col_idx, column) in points_row.columns.iter().enumerate() {
            let mut points = wire::decode_points(&column.value)?;

            if !checked_type {
                checked_type = true;
                if let Some(data_type) = points.data_type {
                    record.points_data_type = data_type.as_str().to_string();
                }
            }

            points.make_values_double();

            let mut slot = |timestamp: i64, value: f64| {
                let row = points_map.entry(timestamp).or_insert_with(|| {
                    let mut row = vec![None; column_count + 1];
                    row[0] = Some(timestamp as f64);
                    row
                });
                row[col_idx + 1] = Some(value);
            };

            let has_timestamps = !points.delta_timestamps.is_empty()
                && points.delta_timestamps.len() == points.values_double.len();
            if has_timestamps {
                let mut previous = 0i64;
                for (i, &delta) in points.delta_timestamps.iter().enumerate() {
                    let timestamp = previous + delta;
                    previous = timestamp;
                    slot(timestamp, points.values_double[i]);
                }
            } else {
                // No timestamps, or counts disagree: key by position.
                for (i, &value) in points.values_double.iter().enumerate() {
                    slot(i as i64, value);
                }
            }

            record
                .points_column_names
                .push(String::from_utf8_lossy(&column.name).to_string());
        }

        record.points = points_map.into_values().collect();
        record.sort_points();
        record.points_column_names[0] = TIME_NAME.to_string();
        Ok(())
    }

    /// Reads every requested source concurrently; a single source returns
    /// its table unmodified, multiple sources are merged.
    pub async fn read_rows(&self, req: &RowRangeRequests) -> Result<DataTable> {
        let req = Arc::new(req.clone());
        let mut handles = Vec::with_capacity(req.filtered_sources.len());
        for i in 0..req.filtered_sources.len() {
            let engine = self.clone();
            let req = Arc::clone(&req);
            handles.push(tokio::spawn(async move {
                debug!(source = %req.filtered_sources[i].source, "starting range read");
                engine.read_row_range(&req, i).await
            }));
        }

        let mut tables = Vec::with_capacity(handles.len());
        for handle in handles {
            let table = handle
                .await
                .map_err(|_| Error::Storage("range read task aborted".to_string()))??;
            tables.push(table);
        }

        if tables.len() == 1 {
            return Ok(tables.pop().unwrap_or_default());
        }

        let srcs: Vec<String> = req
            .filtered_sources
            .iter()
            .map(|fs| fs.source.clone())
            .collect();
        Ok(merge_data_tables(
            &tables,
            &srcs,
            req.return_ids,
            req.return_configs,
        ))
    }

    /// Reads one source's key window: configs first (so a configs filter
    /// can exclude whole records), then aggregates.
    pub async fn read_row_range(&self, req: &RowRangeRequests, req_num: usize) -> Result<DataTable> {
        let fs = &req.filtered_sources[req_num];
        let (start_prefix, end_prefix) =
            perfview_core::keys::row_prefixes(&fs.source, req.start_timestamp, req.end_timestamp);
        debug!(start = %start_prefix, end = %end_prefix, "range window");

        let agg_rx = (!req.no_return_aggregates).then(|| {
            self.spawn_range_get(
                ColumnFamily::Aggregates,
                start_prefix.clone(),
                end_prefix.clone(),
                req.max_results,
            )
        });
        let cfg_rx = req.return_configs.then(|| {
            self.spawn_range_get(
                ColumnFamily::Configs,
                start_prefix.clone(),
                end_prefix.clone(),
                req.max_results,
            )
        });

        let mut table = DataTable::default();
        let mut exclude_ids: HashSet<String> = HashSet::new();

        // Configs.
        if let Some(cfg_rx) = cfg_rx {
            let cfg_rows = recv(cfg_rx).await?;
            debug!(rows = cfg_rows.len(), "config rows");

            // Map from config name to its slot in the growing row.
            let mut column_slots: HashMap<String, usize> = HashMap::new();

            for cfg_row in cfg_rows.into_iter().flatten() {
                let mut config_row: Vec<Option<String>> =
                    vec![None; table.configs_column_names.len()];

                let mut row_match = false;
                for column in &cfg_row.columns {
                    let name = String::from_utf8_lossy(&column.name).to_string();
                    let value = String::from_utf8_lossy(&column.value).to_string();
                    if let Some(filter) = &fs.configs_filter {
                        if filter.get(&name) == Some(&value) {
                            row_match = true;
                        }
                    }
                    match column_slots.get(&name) {
                        None => {
                            column_slots.insert(name.clone(), table.configs_column_names.len());
                            table.configs_column_names.push(name);
                            config_row.push(Some(value));
                        }
                        Some(&slot) => {
                            if slot >= config_row.len() {
                                config_row.resize(slot + 1, None);
                            }
                            config_row[slot] = Some(value);
                        }
                    }
                }

                if fs.configs_filter.is_some() && !row_match {
                    // Remember the exclusion so the aggregates pass drops
                    // the same record.
                    exclude_ids.insert(cfg_row.key);
                    continue;
                }

                table.configs.push(config_row);
                if req.no_return_aggregates && req.return_ids {
                    table.id_column.push(cfg_row.key);
                }
            }

            table.sort_configs_columns();
        }

        // Aggregates.
        if let Some(agg_rx) = agg_rx {
            let agg_rows = recv(agg_rx).await?;
            debug!(rows = agg_rows.len(), "aggregate rows");

            // Map from metric.stat name to its slot in the growing row.
            let mut column_slots: HashMap<String, usize> = HashMap::new();
            table.column_names.push(TIME_NAME.to_string());

            for agg_row in agg_rows.into_iter().flatten() {
                if fs.configs_filter.is_some() && exclude_ids.contains(&agg_row.key) {
                    continue;
                }

                let mut data_row: DataRow = vec![None; table.column_names.len()];
                data_row[0] = Some(extract_timestamp(&agg_row.key) as f64);

                for column in &agg_row.columns {
                    let metric = String::from_utf8_lossy(&column.name).to_string();
                    if let Some(filter) = &fs.metrics_filter {
                        if !filter.contains(&metric) {
                            continue;
                        }
                    }

                    let mut aggregation = wire::decode_aggregation(&column.value)?;
                    aggregation.make_double();

                    let fields = aggregation.double_fields_and_values_filtered(
                        fs.aggregates_filter.as_ref(),
                        req.set_aggregate_if_missing,
                    );
                    for (stat, value) in fields {
                        let column_name = format!("{metric}.{stat}");
                        match column_slots.get(&column_name) {
                            None => {
                                column_slots.insert(column_name.clone(), table.column_names.len());
                                table.column_names.push(column_name);
                                data_row.push(value);
                            }
                            Some(&slot) => {
                                if slot >= data_row.len() {
                                    data_row.resize(slot + 1, None);
                                }
                                data_row[slot] = value;
                            }
                        }
                    }
                }

                table.data.push(data_row);
                if req.return_ids {
                    table.id_column.push(agg_row.key);
                }
            }

            if table.column_names.len() == 1 {
                return Err(Error::EmptyResult(fs.source.clone()));
            }
        }

        Ok(table)
    }
}

async fn recv<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await
        .map_err(|_| Error::Storage("storage fetch task aborted".to_string()))?
}
