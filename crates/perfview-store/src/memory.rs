//! In-memory store for development and tests.
//!
//! A `BTreeMap` per column family gives the ascending-key range scans the
//! adapter contract requires; columns within a row are also kept ordered by
//! name so reads are deterministic. Insert has column-level upsert
//! semantics: existing columns with the same names are overwritten, the
//! rest are kept.

use crate::{Column, ColumnFamily, Row, Store};
use async_trait::async_trait;
use bytes::Bytes;
use perfview_core::Result;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

type ColumnMap = BTreeMap<Bytes, Bytes>;
type RowMap = BTreeMap<String, ColumnMap>;

#[derive(Default)]
pub struct MemoryStore {
    families: RwLock<HashMap<ColumnFamily, RowMap>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn to_row(key: &str, columns: &ColumnMap) -> Row {
    Row {
        key: key.to_string(),
        columns: columns
            .iter()
            .map(|(name, value)| Column {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, cf: ColumnFamily, row_key: &str) -> Result<Option<Row>> {
        let families = self.families.read().await;
        Ok(families
            .get(&cf)
            .and_then(|rows| rows.get(row_key))
            .map(|columns| to_row(row_key, columns)))
    }

    async fn range_get(
        &self,
        cf: ColumnFamily,
        start_key: &str,
        end_key_exclusive: &str,
        max_count: usize,
    ) -> Result<Vec<Option<Row>>> {
        let families = self.families.read().await;
        let Some(rows) = families.get(&cf) else {
            return Ok(Vec::new());
        };

        if start_key == end_key_exclusive {
            // Degenerate bounds: exact-key fetch.
            return Ok(rows
                .get(start_key)
                .map(|columns| vec![Some(to_row(start_key, columns))])
                .unwrap_or_default());
        }

        Ok(rows
            .range::<str, _>((Bound::Included(start_key), Bound::Excluded(end_key_exclusive)))
            .take(max_count)
            .map(|(key, columns)| Some(to_row(key, columns)))
            .collect())
    }

    async fn insert(&self, cf: ColumnFamily, row: Row) -> Result<()> {
        let mut families = self.families.write().await;
        let columns = families
            .entry(cf)
            .or_default()
            .entry(row.key)
            .or_default();
        for column in row.columns {
            columns.insert(column.name, column.value);
        }
        Ok(())
    }

    async fn delete(&self, cf: ColumnFamily, row_key: &str) -> Result<()> {
        let mut families = self.families.write().await;
        if let Some(rows) = families.get_mut(&cf) {
            rows.remove(row_key);
        }
        Ok(())
    }

    async fn delete_columns(
        &self,
        cf: ColumnFamily,
        row_key: &str,
        column_names: &[Bytes],
    ) -> Result<()> {
        let mut families = self.families.write().await;
        if let Some(columns) = families.get_mut(&cf).and_then(|rows| rows.get_mut(row_key)) {
            for name in column_names {
                columns.remove(name);
            }
        }
        Ok(())
    }
}
