//! PerfView server entry point.
//!
//! Wires the storage backend, the record engine, the response cache and
//! the HTTP router, then serves. Logging is controlled via `RUST_LOG`
//! (default `info`). Exits non-zero when initialization fails.

use clap::Parser;
use perfview_server::{build_cache, create_router, AppState, BinderDefaults, CacheConfig};
use perfview_store::{Engine, MemoryStore, Store, TimeoutStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;

#[derive(Parser, Debug)]
#[command(name = "perfview-server", about = "Time-series performance-data server")]
struct Args {
    /// API service port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Storage backend to use.
    #[arg(long, default_value = "memory")]
    use_db: String,

    /// Duration before cached data is considered expired.
    #[arg(long, default_value = "20s", value_parser = parse_duration)]
    cache_expiration: Duration,

    /// Duration after cache expiration where stale data may be served.
    #[arg(long, default_value = "48h", value_parser = parse_duration)]
    cache_stale_period: Duration,

    /// How long to wait for a regeneration before returning stale data.
    /// Typically a few milliseconds.
    #[arg(long, default_value = "50ms", value_parser = parse_duration)]
    cache_stale_deadline: Duration,

    /// Default number of result records when no startDate is set.
    #[arg(long, default_value_t = 25)]
    default_results: usize,

    /// Maximum number of result records when maxResults is not given.
    #[arg(long, default_value_t = 100_000)]
    default_max_results: usize,

    /// Static resource directory served at /.
    #[arg(long, default_value = "resources")]
    resource_dir: PathBuf,
}

/// Parses `500ms` / `20s` / `5m` / `48h` style durations.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let unit_start = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(unit_start);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("bad duration: {raw}"))?;
    let millis = match unit {
        "ms" => value,
        "" | "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(format!("bad duration unit: {raw}")),
    };
    if !millis.is_finite() || millis < 0.0 {
        return Err(format!("bad duration: {raw}"));
    }
    Ok(Duration::from_millis(millis as u64))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let backend: Arc<dyn Store> = match args.use_db.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        other => return Err(format!("unknown DB: {other}").into()),
    };
    let store: Arc<dyn Store> = Arc::new(TimeoutStore::with_default(backend));
    tracing::info!(backend = %args.use_db, "storage initialized");
    let engine = Engine::new(store);

    let defaults = BinderDefaults {
        default_results: args.default_results,
        default_max_results: args.default_max_results,
    };
    let cache_config = CacheConfig {
        expiration: args.cache_expiration,
        stale_period: args.cache_stale_period,
        stale_deadline: args.cache_stale_deadline,
    };
    let cache = Arc::new(build_cache(engine.clone(), defaults, cache_config));
    cache.start_sweeper();

    let state = AppState { engine, cache };
    let router = create_router(state).fallback_service(ServeDir::new(&args.resource_dir));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("starting PerfView server on {addr}");
    tracing::info!(
        expiration = ?cache_config.expiration,
        stale_period = ?cache_config.stale_period,
        stale_deadline = ?cache_config.stale_deadline,
        "cache configuration"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("20").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("48h").unwrap(), Duration::from_secs(48 * 3600));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-5s").is_err());
    }
}
