//! Response cache with stale-while-revalidate and single-flight builds.
//!
//! Responses are cached per (group, key): the group names a registered
//! content builder (`srcs-json`, `record-json`, ...) and the key is the
//! raw canonicalized query string. Per key:
//!
//! - At most one build runs at a time; concurrent requests share it.
//! - Within the TTL the entry is served as-is.
//! - Past the TTL but within the stale period, a background rebuild is
//!   triggered; the caller waits at most the stale deadline for it and
//!   then gets the stale bytes. Builders are detached tasks, so they keep
//!   running (and other waiters keep benefiting) even when the request
//!   that started them goes away.
//! - Past the stale period the entry counts as absent and the caller
//!   blocks on a fresh build.
//! - A failed build never replaces an existing entry.
//!
//! The group registry is written only at initialization: groups are
//! registered on the builder value, and the cache is shared as an
//! immutable `Arc` afterwards. A background sweeper evicts entries past
//! the stale period.

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use perfview_core::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How often the sweeper scans for dead entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Duration before cached data is considered expired.
    pub expiration: Duration,
    /// Duration after expiration where stale data may be served.
    pub stale_period: Duration,
    /// How long to wait for a regeneration before returning stale data.
    pub stale_deadline: Duration,
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            expiration: Duration::from_secs(20),
            stale_period: Duration::from_secs(48 * 3600),
            stale_deadline: Duration::from_millis(50),
        }
    }
}

/// A registered content builder: raw key in, uncompressed body out.
type ContentCreator =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>> + Send + Sync>;

struct CacheEntry {
    bytes: Bytes,
    built_at: Instant,
    built_at_unix: i64,
}

/// Build outcomes are shared between waiters; the error keeps its kind so
/// a failed cold build maps to the same HTTP status as an uncached one.
type BuildResult = std::result::Result<Arc<CacheEntry>, Error>;

struct Group {
    creator: ContentCreator,
    content_type: String,
    zip: bool,
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    inflight: Mutex<HashMap<String, watch::Receiver<Option<BuildResult>>>>,
}

/// One cached response plus the headers the HTTP layer needs.
#[derive(Debug)]
pub struct CachedResponse {
    pub bytes: Bytes,
    pub content_type: String,
    pub gzipped: bool,
    pub age_seconds: i64,
}

pub struct ResponseCache {
    config: CacheConfig,
    groups: HashMap<String, Arc<Group>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> ResponseCache {
        ResponseCache {
            config,
            groups: HashMap::new(),
        }
    }

    /// Registers a content builder under a group name. Must be called
    /// before the cache is shared; the router only ever sees `Arc<Self>`.
    pub fn register<F, Fut>(&mut self, group: &str, content_type: &str, zip: bool, creator: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let creator: ContentCreator = Arc::new(move |key| Box::pin(creator(key)));
        self.groups.insert(
            group.to_string(),
            Arc::new(Group {
                creator,
                content_type: content_type.to_string(),
                zip,
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        );
    }

    /// Serves (group, key), building, refreshing or reusing per the
    /// freshness contract.
    pub async fn get(&self, group_name: &str, key: &str) -> Result<CachedResponse> {
        let group = self
            .groups
            .get(group_name)
            .ok_or_else(|| Error::Internal(format!("unknown cache group: {group_name}")))?;

        let entry = self.get_entry(group, key).await?;
        Ok(CachedResponse {
            bytes: entry.bytes.clone(),
            content_type: group.content_type.clone(),
            gzipped: group.zip,
            age_seconds: (chrono::Utc::now().timestamp() - entry.built_at_unix).max(0),
        })
    }

    async fn get_entry(&self, group: &Arc<Group>, key: &str) -> Result<Arc<CacheEntry>> {
        let existing = group.entries.lock().await.get(key).cloned();

        if let Some(entry) = existing {
            let age = entry.built_at.elapsed();
            if age <= self.config.expiration {
                return Ok(entry);
            }
            if age <= self.config.expiration + self.config.stale_period {
                // Stale: kick off a regeneration, but only wait for it
                // briefly before serving the stale bytes.
                debug!(key, "serving within stale period, regenerating");
                let rx = self.start_build(group, key).await;
                return match tokio::time::timeout(self.config.stale_deadline, wait_build(rx)).await
                {
                    Ok(Ok(fresh)) => Ok(fresh),
                    Ok(Err(build_error)) => {
                        warn!(key, error = %build_error, "regeneration failed, serving stale");
                        Ok(entry)
                    }
                    Err(_) => Ok(entry),
                };
            }
            // Past the stale period the entry is dead weight.
        }

        let rx = self.start_build(group, key).await;
        wait_build(rx).await
    }

    /// Joins the in-flight build for this key, or starts one.
    async fn start_build(
        &self,
        group: &Arc<Group>,
        key: &str,
    ) -> watch::Receiver<Option<BuildResult>> {
        let mut inflight = group.inflight.lock().await;
        if let Some(rx) = inflight.get(key) {
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), rx.clone());

        let group = Arc::clone(group);
        let key = key.to_string();
        tokio::spawn(async move {
            debug!(key = %key, "start content generation");
            let outcome: BuildResult = match build_entry(&group, &key).await {
                Ok(entry) => {
                    group
                        .entries
                        .lock()
                        .await
                        .insert(key.clone(), Arc::clone(&entry));
                    Ok(entry)
                }
                Err(e) => Err(e),
            };
            group.inflight.lock().await.remove(&key);
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    /// Evicts every entry past the stale period.
    pub async fn sweep(&self) {
        let dead_after = self.config.expiration + self.config.stale_period;
        for group in self.groups.values() {
            let mut entries = group.entries.lock().await;
            entries.retain(|_, entry| entry.built_at.elapsed() <= dead_after);
        }
    }

    /// Spawns the periodic sweeper.
    pub fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // First tick fires immediately.
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        });
    }
}

async fn build_entry(group: &Group, key: &str) -> Result<Arc<CacheEntry>> {
    let content = (group.creator)(key.to_string()).await?;
    let bytes = if group.zip {
        gzip(&content)?
    } else {
        Bytes::from(content)
    };
    Ok(Arc::new(CacheEntry {
        bytes,
        built_at: Instant::now(),
        built_at_unix: chrono::Utc::now().timestamp(),
    }))
}

async fn wait_build(mut rx: watch::Receiver<Option<BuildResult>>) -> BuildResult {
    match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or_else(|| Err(Error::Internal("empty build outcome".to_string()))),
        Err(_) => Err(Error::Internal("content build aborted".to_string())),
    }
}

fn gzip(content: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|e| Error::Internal(format!("gzip: {e}")))?;
    encoder
        .finish()
        .map(Bytes::from)
        .map_err(|e| Error::Internal(format!("gzip: {e}")))
}
