//! Request binder: raw query strings into engine requests.
//!
//! Range queries carry repeatable `src` selectors, a date window, result
//! sizing, filters, sort directives and regression parameters, all as
//! string query parameters. Malformed numerics are `BadInput`; a malformed
//! date falls back to epoch 0, so a typo widens the window instead of
//! failing the query.

use perfview_core::names::TIME_NAME;
use perfview_core::{srcparse, Error, Result, RowRequest};
use perfview_store::{FilteredSource, RowRangeRequests};
use perfview_table::RegressionParams;
use std::collections::{HashMap, HashSet};
use tracing::warn;

const MILLIS_PER_DAY: i64 = 3600 * 24 * 1000;

/// Result sizing defaults, set from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct BinderDefaults {
    /// Record count returned when no `startDate` is set.
    pub default_results: usize,
    /// Record cap when `startDate` is explicit.
    pub default_max_results: usize,
}

impl Default for BinderDefaults {
    fn default() -> BinderDefaults {
        BinderDefaults {
            default_results: 25,
            default_max_results: 100_000,
        }
    }
}

/// Decoded query pairs, preserving order and repeats.
pub fn parse_query(raw_query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect()
}

fn get<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn get_all<'a>(pairs: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

fn flag(pairs: &[(String, String)], key: &str) -> bool {
    get(pairs, key) == Some("1")
}

/// True when the named parameter is exactly `1` in the raw query.
pub fn flag_from_query(raw_query: &str, key: &str) -> bool {
    flag(&parse_query(raw_query), key)
}

/// Form-urlencodes one value (for links rendered into HTML).
pub fn url_escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// `YYYYMMDD` to epoch milliseconds at 00:00 UTC; 0 on a malformed date.
fn epoch_millis(date: &str) -> i64 {
    match chrono::NaiveDate::parse_from_str(date, "%Y%m%d") {
        Ok(day) => day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp() * 1000)
            .unwrap_or(0),
        Err(_) => {
            warn!(date, "unparseable date");
            0
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp() * 1000
}

/// Binds a single-record request: `id` plus `noReturnAggregates`.
pub fn make_row_req(raw_query: &str) -> RowRequest {
    let pairs = parse_query(raw_query);
    RowRequest {
        id: get(&pairs, "id").unwrap_or_default().to_string(),
        no_return_aggregates: flag(&pairs, "noReturnAggregates"),
    }
}

/// Rebuilds the canonical cache key for a record request: the original
/// query plus the path id, re-encoded with keys sorted.
pub fn record_cache_key(id: &str, raw_query: &str) -> String {
    let mut pairs = parse_query(raw_query);
    pairs.push(("id".to_string(), id.to_string()));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Binds a range query into per-source filtered requests.
pub fn make_row_range_reqs(
    raw_query: &str,
    defaults: &BinderDefaults,
) -> Result<RowRangeRequests> {
    let pairs = parse_query(raw_query);

    let srcs = get_all(&pairs, "src");

    let mut days_of_data: i64 = 0;
    if let Some(days) = get(&pairs, "daysOfData") {
        days_of_data = days
            .parse()
            .map_err(|_| Error::BadInput("bad input for daysOfData parameter".to_string()))?;
    }

    let end_date = get(&pairs, "endDate");
    let end_timestamp = match end_date {
        None | Some("") => now_millis(),
        Some(date) => epoch_millis(date),
    };

    let start_date = get(&pairs, "startDate").filter(|d| !d.is_empty());
    let start_timestamp = match start_date {
        Some(date) => epoch_millis(date),
        None => {
            if days_of_data > 0 {
                end_timestamp - MILLIS_PER_DAY * days_of_data
            } else {
                0
            }
        }
    };

    let max_results = match get(&pairs, "maxResults") {
        None | Some("") => {
            if start_date.is_some() {
                // An explicit start date means return as much as possible.
                defaults.default_max_results
            } else {
                defaults.default_results
            }
        }
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::BadInput("bad input for maxResults parameter".to_string()))?,
    };

    let aggregates_filter: Option<HashSet<String>> = get(&pairs, "aggregates")
        .filter(|s| !s.is_empty())
        .map(|list| list.split(',').map(str::to_string).collect());

    let metrics_filter: Option<HashSet<String>> = get(&pairs, "metrics")
        .filter(|s| !s.is_empty())
        .map(|list| list.split(',').map(str::to_string).collect());

    let config_pairs = get_all(&pairs, "config");
    let configs_filter: Option<HashMap<String, String>> = if config_pairs.is_empty() {
        None
    } else {
        Some(
            config_pairs
                .iter()
                .map(|kv| {
                    let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
                    (k.to_string(), v.to_string())
                })
                .collect(),
        )
    };

    let sort_by_column = match get(&pairs, "sortByColumn") {
        None | Some("") => TIME_NAME.to_string(),
        Some(column) => column.to_string(),
    };

    let filtered_sources = srcs
        .iter()
        .map(|raw_src| {
            let selector = srcparse::parse(raw_src);

            // A selector's own metric/aggregate/configs override the
            // query-wide filters for that source.
            let metrics = match selector.metric {
                Some(metric) => Some(HashSet::from([metric])),
                None => metrics_filter.clone(),
            };
            let aggregates = match selector.aggregate {
                Some(aggregate) => Some(HashSet::from([aggregate])),
                None => aggregates_filter.clone(),
            };
            let configs = if selector.configs.is_empty() {
                configs_filter.clone()
            } else {
                Some(selector.configs)
            };

            FilteredSource {
                source: selector.source,
                metrics_filter: metrics,
                aggregates_filter: aggregates,
                configs_filter: configs,
            }
        })
        .collect();

    Ok(RowRangeRequests {
        filtered_sources,
        start_timestamp,
        end_timestamp,
        max_results,
        set_aggregate_if_missing: flag(&pairs, "setAggregateIfMissing"),
        equal_x: flag(&pairs, "equalX"),
        sort_by_column,
        sort_by_config: get(&pairs, "sortByConfig").unwrap_or_default().to_string(),
        return_ids: flag(&pairs, "returnIds"),
        return_configs: flag(&pairs, "returnConfigs"),
        no_return_aggregates: flag(&pairs, "noReturnAggregates"),
    })
}

/// Binds regression parameters. Detection is enabled only when at least
/// one of `regressPos`/`regressNeg` is present.
pub fn make_regression_params(raw_query: &str) -> Result<RegressionParams> {
    let pairs = parse_query(raw_query);
    let mut params = RegressionParams {
        window: 1,
        ..Default::default()
    };

    if let Some(pos) = get(&pairs, "regressPos").filter(|s| !s.is_empty()) {
        params.pos = Some(pos.parse().map_err(|_| {
            Error::BadInput("bad input for regressPos parameter".to_string())
        })?);
        params.selected = true;
    }
    if let Some(neg) = get(&pairs, "regressNeg").filter(|s| !s.is_empty()) {
        params.neg = Some(neg.parse().map_err(|_| {
            Error::BadInput("bad input for regressNeg parameter".to_string())
        })?);
        params.selected = true;
    }
    if !params.selected {
        return Ok(params);
    }

    if let Some(radius) = get(&pairs, "regressRadius").filter(|s| !s.is_empty()) {
        params.radius = radius.parse().map_err(|_| {
            Error::BadInput("bad input for regressRadius parameter".to_string())
        })?;
    }
    if let Some(window) = get(&pairs, "regressWindow").filter(|s| !s.is_empty()) {
        params.window = window.parse().map_err(|_| {
            Error::BadInput("bad input for regressWindow parameter".to_string())
        })?;
        if params.window < 1 {
            return Err(Error::BadInput("regressWindow must be > 0".to_string()));
        }
    }
    params.use_percent = flag(&pairs, "regressUsePercent");
    if let Some(ignore) = get(&pairs, "regressIgnoreLT").filter(|s| !s.is_empty()) {
        params.ignore_lt = ignore.parse().map_err(|_| {
            Error::BadInput("bad input for regressIgnoreLT parameter".to_string())
        })?;
    }
    params.return_segments = flag(&pairs, "regressReturnSegments");

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BinderDefaults {
        BinderDefaults::default()
    }

    #[test]
    fn test_row_req() {
        let req = make_row_req("id=abc123&noReturnAggregates=1");
        assert_eq!(req.id, "abc123");
        assert!(req.no_return_aggregates);

        let req = make_row_req("id=abc123");
        assert!(!req.no_return_aggregates);
    }

    #[test]
    fn test_record_cache_key_sorted() {
        let key = record_cache_key("row-1", "zeta=1&alpha=2");
        assert_eq!(key, "alpha=2&id=row-1&zeta=1");
    }

    #[test]
    fn test_default_max_results() {
        let req = make_row_range_reqs("src=a", &defaults()).unwrap();
        assert_eq!(req.max_results, 25);

        let req = make_row_range_reqs("src=a&startDate=20130601", &defaults()).unwrap();
        assert_eq!(req.max_results, 100_000, "explicit startDate lifts the cap");

        let req = make_row_range_reqs("src=a&maxResults=7", &defaults()).unwrap();
        assert_eq!(req.max_results, 7);
    }

    #[test]
    fn test_date_window() {
        let req =
            make_row_range_reqs("src=a&startDate=20130601&endDate=20130602", &defaults()).unwrap();
        assert_eq!(req.start_timestamp, 1_370_044_800_000);
        assert_eq!(req.end_timestamp, 1_370_131_200_000);
    }

    #[test]
    fn test_days_of_data() {
        let req = make_row_range_reqs("src=a&endDate=20130602&daysOfData=1", &defaults()).unwrap();
        assert_eq!(req.end_timestamp - req.start_timestamp, MILLIS_PER_DAY);
    }

    #[test]
    fn test_days_of_data_ignored_with_start_date() {
        let req = make_row_range_reqs(
            "src=a&startDate=20130601&endDate=20130602&daysOfData=9",
            &defaults(),
        )
        .unwrap();
        assert_eq!(req.start_timestamp, 1_370_044_800_000);
    }

    #[test]
    fn test_malformed_numerics_are_bad_input() {
        assert!(make_row_range_reqs("src=a&maxResults=nope", &defaults()).is_err());
        assert!(make_row_range_reqs("src=a&daysOfData=nope", &defaults()).is_err());
        assert!(make_regression_params("regressPos=abc").is_err());
        assert!(make_regression_params("regressPos=1&regressWindow=zero").is_err());
    }

    #[test]
    fn test_filters() {
        let req = make_row_range_reqs(
            "src=a&aggregates=mean,p99&metrics=latency&config=arch=x86&config=os=linux",
            &defaults(),
        )
        .unwrap();
        let fs = &req.filtered_sources[0];
        assert_eq!(
            fs.aggregates_filter.as_ref().unwrap(),
            &HashSet::from(["mean".to_string(), "p99".to_string()])
        );
        assert_eq!(
            fs.metrics_filter.as_ref().unwrap(),
            &HashSet::from(["latency".to_string()])
        );
        let configs = fs.configs_filter.as_ref().unwrap();
        assert_eq!(configs["arch"], "x86");
        assert_eq!(configs["os"], "linux");
    }

    #[test]
    fn test_selector_overrides_global_filters() {
        let req = make_row_range_reqs(
            "src=a:latency.p99%24arch%3Darm&src=b&metrics=qps&aggregates=mean",
            &defaults(),
        )
        .unwrap();

        let a = &req.filtered_sources[0];
        assert_eq!(a.source, "a");
        assert_eq!(
            a.metrics_filter.as_ref().unwrap(),
            &HashSet::from(["latency".to_string()])
        );
        assert_eq!(
            a.aggregates_filter.as_ref().unwrap(),
            &HashSet::from(["p99".to_string()])
        );
        assert_eq!(a.configs_filter.as_ref().unwrap()["arch"], "arm");

        let b = &req.filtered_sources[1];
        assert_eq!(
            b.metrics_filter.as_ref().unwrap(),
            &HashSet::from(["qps".to_string()])
        );
        assert_eq!(
            b.aggregates_filter.as_ref().unwrap(),
            &HashSet::from(["mean".to_string()])
        );
        assert!(b.configs_filter.is_none());
    }

    #[test]
    fn test_booleans_and_sorts() {
        let req = make_row_range_reqs(
            "src=a&equalX=1&reverse=1&returnIds=1&returnConfigs=1&noReturnAggregates=1&setAggregateIfMissing=1&sortByColumn=a:m.mean&sortByConfig=build",
            &defaults(),
        )
        .unwrap();
        assert!(req.equal_x);
        assert!(req.return_ids);
        assert!(req.return_configs);
        assert!(req.no_return_aggregates);
        assert!(req.set_aggregate_if_missing);
        assert_eq!(req.sort_by_column, "a:m.mean");
        assert_eq!(req.sort_by_config, "build");

        let req = make_row_range_reqs("src=a", &defaults()).unwrap();
        assert_eq!(req.sort_by_column, TIME_NAME);
    }

    #[test]
    fn test_regression_params() {
        let params = make_regression_params("src=a").unwrap();
        assert!(!params.selected);

        let params = make_regression_params(
            "regressPos=5&regressNeg=-3&regressRadius=2&regressWindow=4&regressUsePercent=1&regressIgnoreLT=0.5&regressReturnSegments=1",
        )
        .unwrap();
        assert!(params.selected);
        assert_eq!(params.pos, Some(5.0));
        assert_eq!(params.neg, Some(-3.0));
        assert_eq!(params.radius, 2);
        assert_eq!(params.window, 4);
        assert!(params.use_percent);
        assert_eq!(params.ignore_lt, 0.5);
        assert!(params.return_segments);

        let params = make_regression_params("regressNeg=-1").unwrap();
        assert!(params.selected);
        assert_eq!(params.window, 1, "window defaults to 1");

        assert!(make_regression_params("regressPos=1&regressWindow=0").is_err());
    }
}
