//! The write engine.
//!
//! One [`WriteRecord`] becomes at most one row per column family, all under
//! the same fresh row key. Aggregates the caller did not supply are derived
//! from the raw point streams before scaling. Partial writes are possible
//! when a later family fails; there is no rollback.
//!
//! [`WriteRecord`]: perfview_core::WriteRecord

use crate::{Column, ColumnFamily, Engine, Row};
use bytes::Bytes;
use perfview_core::codec::{Aggregation, DataType, DoubleStats, Points};
use perfview_core::names::metric_components;
use perfview_core::{keys, wire, Error, Result, WriteRecord};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

impl Engine {
    /// Writes one record for `src`, returning its row key.
    pub async fn write_row(&self, record: WriteRecord, src: &str) -> Result<String> {
        if record.aggregates_column_names.len() != record.aggregates.len() {
            return Err(Error::BadInput(
                "aggregates names and data don't match".to_string(),
            ));
        }

        let timestamp = record.record_timestamp.unwrap_or(0);
        let unique = Uuid::new_v4().simple().to_string();
        let row_key = keys::make_row_key(src, timestamp, &unique);

        // Raw point data per metric, kept for deriving missing aggregates.
        let mut raw_points: HashMap<String, Vec<f64>> = HashMap::new();
        // Metric name -> stat name -> value.
        let mut aggs: HashMap<String, HashMap<String, Option<f64>>> = HashMap::new();

        if !record.points.is_empty() {
            // Only tag the stored value when the caller named a type.
            let points_data_type = DataType::parse(&record.points_data_type);

            let mut columns = Vec::with_capacity(record.points.len());
            for points_record in &record.points {
                if !points_record.timestamps.is_empty()
                    && points_record.data.len() != points_record.timestamps.len()
                {
                    return Err(Error::BadInput(format!(
                        "points data and timestamps don't match for: {}",
                        points_record.name
                    )));
                }

                raw_points.insert(points_record.name.clone(), points_record.data.clone());
                // A blank entry ensures the aggregate loop below derives
                // the full standard set for this metric.
                aggs.entry(points_record.name.clone()).or_default();

                let mut points = Points {
                    data_type: points_data_type,
                    values_double: points_record.data.clone(),
                    ..Default::default()
                };
                let effective = points.effective_type();
                points.make_delta_values_scaled(effective);

                let mut previous = 0i64;
                for &ts in &points_record.timestamps {
                    points.delta_timestamps.push(ts - previous);
                    previous = ts;
                }

                columns.push(Column {
                    name: Bytes::from(points_record.name.clone()),
                    value: wire::encode_points(&points),
                });
            }

            debug!(key = %row_key, streams = columns.len(), "writing points row");
            self.store()
                .insert(
                    ColumnFamily::Points,
                    Row {
                        key: row_key.clone(),
                        columns,
                    },
                )
                .await?;
        }

        if !record.aggregates_column_names.is_empty() || !record.points.is_empty() {
            let agg_data_type = DataType::parse(&record.aggregates_data_type);

            for (idx, full_name) in record.aggregates_column_names.iter().enumerate() {
                let (metric, stat) = metric_components(full_name);
                if metric.is_empty() {
                    return Err(Error::BadInput(format!(
                        "missing metric name in: {full_name}"
                    )));
                }
                if stat.is_empty() {
                    return Err(Error::BadInput(format!(
                        "missing aggregate name in: {full_name}"
                    )));
                }
                aggs.entry(metric.to_string())
                    .or_default()
                    .insert(stat.to_string(), record.aggregates[idx]);
            }

            let mut columns = Vec::with_capacity(aggs.len());
            for (metric, stat_map) in &aggs {
                let mut double = DoubleStats::default();
                for (stat, value) in stat_map {
                    double.set(stat, *value);
                }
                let mut aggregation = Aggregation {
                    data_type: agg_data_type,
                    scaled: None,
                    double: Some(double),
                };
                let raw = raw_points.get(metric).map(Vec::as_slice).unwrap_or(&[]);
                aggregation.create_missing_double_aggregates(raw);
                let effective = aggregation.effective_type();
                aggregation.make_scaled(effective);

                columns.push(Column {
                    name: Bytes::from(metric.clone()),
                    value: wire::encode_aggregation(&aggregation),
                });
            }

            debug!(key = %row_key, metrics = columns.len(), "writing aggregates row");
            self.store()
                .insert(
                    ColumnFamily::Aggregates,
                    Row {
                        key: row_key.clone(),
                        columns,
                    },
                )
                .await?;
        }

        if !record.config_pairs.is_empty() {
            let columns = record
                .config_pairs
                .iter()
                .map(|(key, value)| Column {
                    name: Bytes::from(key.clone()),
                    value: Bytes::from(value.clone()),
                })
                .collect();
            self.store()
                .insert(
                    ColumnFamily::Configs,
                    Row {
                        key: row_key.clone(),
                        columns,
                    },
                )
                .await?;
        }

        let wrote_anything = !record.points.is_empty()
            || !record.aggregates_column_names.is_empty()
            || !record.config_pairs.is_empty();
        if !wrote_anything {
            return Err(Error::NoData);
        }

        // Placeholder row mapping the record back to its source string.
        let source_row = Row {
            key: row_key.clone(),
            columns: vec![Column {
                name: Bytes::from(src.to_string()),
                value: Bytes::new(),
            }],
        };
        self.store().insert(ColumnFamily::Source, source_row).await?;

        Ok(row_key)
    }
}
