//! Deadline wrapper for storage adapters.
//!
//! Wraps any [`Store`] so every operation carries a timeout (default
//! 3000 ms). A deadline overrun surfaces as a storage failure, which the
//! read path treats like any other adapter error.

use crate::{ColumnFamily, Row, Store};
use async_trait::async_trait;
use bytes::Bytes;
use perfview_core::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(3000);

pub struct TimeoutStore {
    inner: Arc<dyn Store>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn Store>, timeout: Duration) -> TimeoutStore {
        TimeoutStore { inner, timeout }
    }

    pub fn with_default(inner: Arc<dyn Store>) -> TimeoutStore {
        TimeoutStore::new(inner, DEFAULT_STORE_TIMEOUT)
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| Error::Storage("storage operation timed out".to_string()))?
    }
}

#[async_trait]
impl Store for TimeoutStore {
    async fn get(&self, cf: ColumnFamily, row_key: &str) -> Result<Option<Row>> {
        self.bounded(self.inner.get(cf, row_key)).await
    }

    async fn range_get(
        &self,
        cf: ColumnFamily,
        start_key: &str,
        end_key_exclusive: &str,
        max_count: usize,
    ) -> Result<Vec<Option<Row>>> {
        self.bounded(
            self.inner
                .range_get(cf, start_key, end_key_exclusive, max_count),
        )
        .await
    }

    async fn insert(&self, cf: ColumnFamily, row: Row) -> Result<()> {
        self.bounded(self.inner.insert(cf, row)).await
    }

    async fn delete(&self, cf: ColumnFamily, row_key: &str) -> Result<()> {
        self.bounded(self.inner.delete(cf, row_key)).await
    }

    async fn delete_columns(
        &self,
        cf: ColumnFamily,
        row_key: &str,
        column_names: &[Bytes],
    ) -> Result<()> {
        self.bounded(self.inner.delete_columns(cf, row_key, column_names))
            .await
    }
}
