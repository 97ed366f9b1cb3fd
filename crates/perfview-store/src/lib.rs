//! Storage adapter and read/write engines for PerfView.
//!
//! The [`Store`] trait is the whole contract with the wide-column backend:
//! get a row by key, range-scan rows in ascending key order, insert a row,
//! delete a row or individual columns. Key bytes are opaque to the store;
//! the reversed-time layout lives entirely in `perfview_core::keys`.
//!
//! The [`Engine`] drives a `Store` to implement the record operations:
//! parallel per-CF fan-out reads assembling [`ReadRecord`]s, per-source
//! range reads assembling and merging [`DataTable`]s, per-CF row
//! composition for writes, and the directory index.
//!
//! [`MemoryStore`] is the in-process backend used for development and
//! tests; production deployments plug in a wide-column server behind the
//! same trait.
//!
//! [`ReadRecord`]: perfview_core::ReadRecord
//! [`DataTable`]: perfview_table::DataTable

pub mod directory;
pub mod memory;
pub mod read;
pub mod timeout;
pub mod write;

use async_trait::async_trait;
use bytes::Bytes;
use perfview_core::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use timeout::TimeoutStore;

/// The five column families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    Aggregates,
    Points,
    Configs,
    Source,
    Children,
}

impl ColumnFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnFamily::Aggregates => "aggregates",
            ColumnFamily::Points => "points",
            ColumnFamily::Configs => "configs",
            ColumnFamily::Source => "source",
            ColumnFamily::Children => "children",
        }
    }
}

/// One named cell of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Bytes,
    pub value: Bytes,
}

/// One row of a column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub columns: Vec<Column>,
}

/// Wide-column storage adapter. Implementations must be shareable across
/// tasks (`Arc<dyn Store>`); every operation may suspend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetches one row by exact key; `None` when absent.
    async fn get(&self, cf: ColumnFamily, row_key: &str) -> Result<Option<Row>>;

    /// Scans rows with `start_key <= key < end_key_exclusive` in ascending
    /// key order, up to `max_count`. `None` placeholders for gaps are
    /// permitted. When the bounds are equal the scan degenerates to an
    /// exact-key fetch (the directory index's exact-path case).
    async fn range_get(
        &self,
        cf: ColumnFamily,
        start_key: &str,
        end_key_exclusive: &str,
        max_count: usize,
    ) -> Result<Vec<Option<Row>>>;

    /// Upserts a row; existing columns with the same names are overwritten,
    /// other existing columns are kept.
    async fn insert(&self, cf: ColumnFamily, row: Row) -> Result<()>;

    /// Removes an entire row. Absent rows are not an error.
    async fn delete(&self, cf: ColumnFamily, row_key: &str) -> Result<()>;

    /// Removes the named columns from a row. Absent rows or columns are not
    /// an error.
    async fn delete_columns(
        &self,
        cf: ColumnFamily,
        row_key: &str,
        column_names: &[Bytes],
    ) -> Result<()>;
}

/// A parsed `src:metric.agg$k=v$...` selector turned into per-source
/// filters for one range read.
#[derive(Debug, Clone, Default)]
pub struct FilteredSource {
    pub source: String,
    /// Keep only these metrics; `None` keeps all.
    pub metrics_filter: Option<HashSet<String>>,
    /// Keep only these stats; `None` keeps all.
    pub aggregates_filter: Option<HashSet<String>>,
    /// Keep only rows carrying one of these exact config pairs.
    pub configs_filter: Option<HashMap<String, String>>,
}

/// One multi-source range read.
#[derive(Debug, Clone, Default)]
pub struct RowRangeRequests {
    pub filtered_sources: Vec<FilteredSource>,

    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub max_results: usize,

    /// Emit filtered-but-absent stats as explicit empty cells.
    pub set_aggregate_if_missing: bool,

    pub equal_x: bool,
    pub sort_by_column: String,
    /// Overrides `sort_by_column` when both are set.
    pub sort_by_config: String,

    pub return_ids: bool,
    pub return_configs: bool,
    pub no_return_aggregates: bool,
}

/// The record engine: all reads and writes against a [`Store`].
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Engine {
        Engine { store }
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Removes one record across all its column families.
    pub async fn delete_row(&self, row_key: &str) -> Result<()> {
        for cf in [
            ColumnFamily::Aggregates,
            ColumnFamily::Points,
            ColumnFamily::Source,
            ColumnFamily::Configs,
        ] {
            self.store.delete(cf, row_key).await?;
        }
        Ok(())
    }
}
