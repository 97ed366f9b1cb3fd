//! Axum handlers and router for the HTTP surface.
//!
//! Range and record GETs are served through the response cache; writes,
//! deletes and the directory/search endpoints hit the engine directly.
//! Every cacheable response carries Etag/Age/Cache-Control headers and
//! honors `If-None-Match` with a bodyless 304. Error bodies are plain
//! text: BadInput/NoData/EmptyResult map to 400, storage and
//! serialization failures to 500.

use crate::cache::{CacheConfig, CachedResponse, ResponseCache};
use crate::content;
use crate::requests::{self, BinderDefaults};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use md5::{Digest, Md5};
use perfview_core::names::src_components;
use perfview_core::{DirectoryRequest, Error, SourceInfo, WriteRecord};
use perfview_store::Engine;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Maximum accepted body for POST or PUT.
pub const MAX_INPUT_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub cache: Arc<ResponseCache>,
}

/// Maps engine errors onto HTTP statuses with plain-text bodies.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> ApiError {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadInput(_) | Error::NoData | Error::EmptyResult(_) => StatusCode::BAD_REQUEST,
            Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Registers the content-builder groups. Called once at startup; the
/// resulting cache is shared immutably.
pub fn build_cache(engine: Engine, defaults: BinderDefaults, config: CacheConfig) -> ResponseCache {
    let mut cache = ResponseCache::new(config);

    let e = engine.clone();
    cache.register("srcs-json", "application/json", true, move |key: String| {
        let engine = e.clone();
        async move { content::make_srcs_json_content(&engine, &defaults, &key).await }
    });

    let e = engine.clone();
    cache.register("record-json", "application/json", true, move |key: String| {
        let engine = e.clone();
        async move { content::make_record_json_content(&engine, &key).await }
    });

    cache.register(
        "srcs-inline-graph",
        "text/html; charset=UTF-8",
        true,
        move |key: String| {
            let engine = engine.clone();
            async move { content::make_srcs_inline_graph_content(&engine, &defaults, &key).await }
        },
    );

    cache
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/srcs", get(srcs_get))
        .route("/src/*source", axum::routing::post(src_post).put(src_put))
        .route("/record/*id", get(record_get).delete(record_delete))
        .route("/dir/", get(dir_get_root))
        .route("/dir/*prefix", get(dir_get).delete(dir_delete))
        .route("/search", get(search_get))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_INPUT_SIZE))
        // Outermost, so the body-limit rejection is rewritten to the 400
        // the API promises for oversized payloads.
        .layer(axum::middleware::map_response(content_too_large_as_bad_request))
        .with_state(state)
}

/// The body-limit layer rejects with 413; the API contract is 400 for any
/// payload over the input limit.
async fn content_too_large_as_bad_request(response: Response) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return (StatusCode::BAD_REQUEST, "content too large").into_response();
    }
    response
}

fn etag_for(content: &[u8]) -> String {
    let digest = Md5::digest(content);
    let mut etag = String::with_capacity(34);
    etag.push('"');
    for byte in digest {
        let _ = write!(etag, "{:02x}", byte);
    }
    etag.push('"');
    etag
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(etag)
}

/// Wraps cached bytes with the cache's HTTP headers; 304 on etag match.
fn cached_response(headers: &HeaderMap, cached: CachedResponse) -> Response {
    let etag = etag_for(&cached.bytes);
    if if_none_match(headers, &etag) {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, cached.content_type.as_str())
        .header(header::CACHE_CONTROL, "private, max-age=20")
        .header(header::CONTENT_LENGTH, cached.bytes.len())
        .header(header::AGE, cached.age_seconds)
        .header(header::ETAG, etag.as_str());
    if cached.gzipped {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    builder
        .body(axum::body::Body::from(cached.bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Uncached small responses (directory, search) still carry etags.
fn etagged_response(headers: &HeaderMap, content_type: &str, body: Vec<u8>) -> Response {
    let etag = etag_for(&body);
    if if_none_match(headers, &etag) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "private, max-age=20".to_string()),
            (header::ETAG, etag),
        ],
        body,
    )
        .into_response()
}

async fn srcs_get(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let raw_query = raw_query.unwrap_or_default();
    let pairs = requests::parse_query(&raw_query);
    let kind = pairs
        .iter()
        .find(|(k, _)| k == "type")
        .map(|(_, v)| v.as_str())
        .unwrap_or("json");

    let group = match kind {
        "json" => "srcs-json",
        "inline-graph" => "srcs-inline-graph",
        other => {
            return Err(Error::BadInput(format!("bad srcs 'type' parameter: {other}")).into());
        }
    };

    let cached = state.cache.get(group, &raw_query).await?;
    Ok(cached_response(&headers, cached))
}

fn parse_payload<T: serde::de::DeserializeOwned + Default>(
    body: &Bytes,
    what: &str,
) -> Result<T, ApiError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|_| Error::BadInput(format!("malformed {what} data")).into())
}

async fn src_post(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    debug!(%source, "src POST");
    let mut record: WriteRecord = parse_payload(&body, "POST")?;
    if record.record_timestamp.is_none() {
        record.record_timestamp = Some(chrono::Utc::now().timestamp_millis());
    }

    let row_key = state.engine.write_row(record, &source).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        format!(r#"{{"id":"{row_key}"}}"#),
    )
        .into_response())
}

async fn src_put(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    debug!(%source, "src PUT");
    let info: SourceInfo = parse_payload(&body, "PUT")?;
    state.engine.write_dir(&info, &source).await?;
    Ok(StatusCode::OK.into_response())
}

async fn record_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = requests::record_cache_key(&id, &raw_query.unwrap_or_default());
    let cached = state.cache.get("record-json", &key).await?;
    Ok(cached_response(&headers, cached))
}

async fn record_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    debug!(%id, "record DELETE");
    state
        .engine
        .delete_row(&id)
        .await
        .map_err(|_| Error::Storage(format!("an error occurred deleting id: {id}")))?;
    Ok(StatusCode::OK.into_response())
}

/// The directory search: a directory-only scan first, then a
/// file-restricted scan of the parent path when nothing matched.
async fn read_dir_two_pass(
    engine: &Engine,
    pairs: &[(String, String)],
    mut search: String,
) -> Result<SourceInfo, Error> {
    let flag = |key: &str| pairs.iter().any(|(k, v)| k == key && v == "1");

    let mut prefix_match = false;
    if search.ends_with('*') {
        prefix_match = true;
        search.pop();
    }

    let mut req = DirectoryRequest {
        prefix: search.clone(),
        file_restrict: String::new(),
        return_metrics: flag("returnMetrics"),
        return_units: flag("returnUnits"),
        return_select_for_defaults: flag("returnSelectForDefaults"),
        defaults_only: flag("defaultsOnly"),
        dir_prefix_match: prefix_match,
        file_prefix_match: false,
    };

    let info = engine.read_dir(&req).await?;
    if !info.names.is_empty() {
        return Ok(info);
    }

    // File-only search.
    let (path, file) = src_components(&search);
    req.prefix = path.to_string();
    req.file_restrict = file.to_string();
    req.dir_prefix_match = false;
    req.file_prefix_match = prefix_match;
    engine.read_dir(&req).await
}

async fn dir_get_inner(
    state: AppState,
    raw_query: Option<String>,
    headers: HeaderMap,
    prefix: String,
) -> Result<Response, ApiError> {
    debug!(%prefix, "dir GET");
    let pairs = requests::parse_query(&raw_query.unwrap_or_default());
    let info = read_dir_two_pass(&state.engine, &pairs, prefix).await?;
    let body = serde_json::to_vec(&info)
        .map_err(|e| Error::Internal(format!("json marshalling: {e}")))?;
    Ok(etagged_response(&headers, "application/json", body))
}

async fn dir_get(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    dir_get_inner(state, raw_query, headers, prefix).await
}

async fn dir_get_root(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    dir_get_inner(state, raw_query, headers, String::new()).await
}

async fn dir_delete(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<Response, ApiError> {
    let (path, file) = src_components(&source);
    debug!(path, file, "dir DELETE");
    state.engine.delete_dir(path, file).await.map_err(|_| {
        Error::Storage(format!(
            "an error occurred deleting path: {path}, file: {file}"
        ))
    })?;
    Ok(StatusCode::OK.into_response())
}

async fn search_get(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let pairs = requests::parse_query(&raw_query.unwrap_or_default());
    let query = pairs
        .iter()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let search = format!("{query}*");

    let info = read_dir_two_pass(&state.engine, &pairs, search.clone()).await?;
    let page = content::render_search_page(&search, &info.names);
    Ok(etagged_response(&headers, "text/html", page.into_bytes()))
}
