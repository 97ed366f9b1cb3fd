//! End-to-end engine tests over the in-memory store: write records, read
//! them back as single records and as range tables, exercise filters,
//! merging, the directory index and deletion.

use perfview_core::{DirectoryRequest, PointsRecord, RowRequest, SourceInfo, WriteRecord};
use perfview_store::{Engine, FilteredSource, MemoryStore, RowRangeRequests};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn engine() -> Engine {
    Engine::new(Arc::new(MemoryStore::new()))
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn basic_record(ts: i64, mean: f64) -> WriteRecord {
    WriteRecord {
        record_timestamp: Some(ts),
        aggregates_column_names: vec!["latency.mean".to_string(), "latency.p99".to_string()],
        aggregates: vec![Some(mean), Some(mean * 2.0)],
        ..Default::default()
    }
}

fn range_req(src: &str) -> RowRangeRequests {
    RowRangeRequests {
        filtered_sources: vec![FilteredSource {
            source: src.to_string(),
            ..Default::default()
        }],
        start_timestamp: 0,
        end_timestamp: 10_000_000,
        max_results: 100,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_write_then_read_row() {
    let engine = engine();
    let record = WriteRecord {
        record_timestamp: Some(12_345),
        points: vec![PointsRecord {
            name: "latency".to_string(),
            timestamps: vec![100, 200, 300],
            data: vec![1.0, 2.0, 3.0],
        }],
        points_data_type: "SCALED2".to_string(),
        aggregates_column_names: vec!["latency.mean".to_string()],
        aggregates: vec![Some(2.0)],
        aggregates_data_type: "SCALED2".to_string(),
        config_pairs: HashMap::from([("build".to_string(), "42".to_string())]),
    };

    let row_key = engine.write_row(record, "proj/bench").await.unwrap();

    let read = engine
        .read_row(&RowRequest {
            id: row_key,
            no_return_aggregates: false,
        })
        .await
        .unwrap();

    assert_eq!(read.source.as_deref(), Some("proj/bench"));
    assert_eq!(read.record_timestamp, Some(12_345));
    assert_eq!(read.points_data_type, "SCALED2");
    assert_eq!(read.aggregates_data_type, "SCALED2");
    assert_eq!(read.config_pairs["build"], "42");

    // Points come back as a small wide table, time column first.
    assert_eq!(read.points_column_names, vec!["TIME", "latency"]);
    assert_eq!(
        read.points,
        vec![
            vec![Some(100.0), Some(1.0)],
            vec![Some(200.0), Some(2.0)],
            vec![Some(300.0), Some(3.0)],
        ]
    );

    // The explicit mean survives; count/min/max and the standard
    // percentile subset are derived from the raw points.
    let find = |name: &str| -> Option<f64> {
        read.aggregates_column_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| read.aggregates[i])
    };
    assert_eq!(find("latency.mean"), Some(2.0));
    assert_eq!(find("latency.count"), Some(3.0));
    assert_eq!(find("latency.min"), Some(1.0));
    assert_eq!(find("latency.max"), Some(3.0));
    assert_eq!(find("latency.p50"), Some(2.0));
    assert_eq!(find("latency.p85"), None, "p85 is never fabricated");

    // Aggregate names are sorted.
    let mut sorted = read.aggregates_column_names.clone();
    sorted.sort();
    assert_eq!(read.aggregates_column_names, sorted);
}

#[tokio::test]
async fn test_read_row_no_aggregates() {
    let engine = engine();
    let row_key = engine
        .write_row(basic_record(1_000, 5.0), "s")
        .await
        .unwrap();
    let read = engine
        .read_row(&RowRequest {
            id: row_key,
            no_return_aggregates: true,
        })
        .await
        .unwrap();
    assert!(read.aggregates.is_empty());
    assert_eq!(read.source.as_deref(), Some("s"));
}

#[tokio::test]
async fn test_points_without_timestamps_key_by_position() {
    let engine = engine();
    let record = WriteRecord {
        record_timestamp: Some(1),
        points: vec![
            PointsRecord {
                name: "with_ts".to_string(),
                timestamps: vec![1_000, 2_000],
                data: vec![10.0, 20.0],
            },
            PointsRecord {
                name: "without_ts".to_string(),
                timestamps: vec![],
                data: vec![7.0, 8.0],
            },
        ],
        ..Default::default()
    };
    let row_key = engine.write_row(record, "s").await.unwrap();
    let read = engine
        .read_row(&RowRequest {
            id: row_key,
            no_return_aggregates: true,
        })
        .await
        .unwrap();

    // The timestamp-less stream lands at X = 0..n-1, mixed into the same
    // table as the real timestamps of its sibling.
    assert_eq!(read.points_column_names, vec!["TIME", "with_ts", "without_ts"]);
    assert_eq!(
        read.points,
        vec![
            vec![Some(0.0), None, Some(7.0)],
            vec![Some(1.0), None, Some(8.0)],
            vec![Some(1_000.0), Some(10.0), None],
            vec![Some(2_000.0), Some(20.0), None],
        ]
    );
}

#[tokio::test]
async fn test_write_row_validations() {
    let engine = engine();

    let mismatched = WriteRecord {
        aggregates_column_names: vec!["m.mean".to_string()],
        aggregates: vec![],
        ..Default::default()
    };
    assert!(engine.write_row(mismatched, "s").await.is_err());

    let bad_points = WriteRecord {
        points: vec![PointsRecord {
            name: "m".to_string(),
            timestamps: vec![1],
            data: vec![1.0, 2.0],
        }],
        ..Default::default()
    };
    assert!(engine.write_row(bad_points, "s").await.is_err());

    let missing_stat = WriteRecord {
        aggregates_column_names: vec!["metriconly".to_string()],
        aggregates: vec![Some(1.0)],
        ..Default::default()
    };
    assert!(engine.write_row(missing_stat, "s").await.is_err());

    let missing_metric = WriteRecord {
        aggregates_column_names: vec![".mean".to_string()],
        aggregates: vec![Some(1.0)],
        ..Default::default()
    };
    assert!(engine.write_row(missing_metric, "s").await.is_err());

    let empty = WriteRecord::default();
    assert!(engine.write_row(empty, "s").await.is_err());
}

#[tokio::test]
async fn test_range_read_single_source() {
    let engine = engine();
    for (ts, mean) in [(1_000, 1.0), (2_000, 2.0), (3_000, 3.0)] {
        engine
            .write_row(basic_record(ts, mean), "proj/bench")
            .await
            .unwrap();
    }

    let mut req = range_req("proj/bench");
    req.return_ids = true;
    let mut table = engine.read_rows(&req).await.unwrap();

    assert_eq!(table.column_names[0], "TIME");
    assert!(table.column_names.contains(&"latency.mean".to_string()));
    assert!(table.column_names.contains(&"latency.p99".to_string()));
    assert_eq!(table.data.len(), 3);
    assert_eq!(table.id_column.len(), 3);

    // Ascending key order is descending time order.
    let times: Vec<f64> = table.data.iter().map(|r| r[0].unwrap()).collect();
    assert_eq!(times, vec![3_000.0, 2_000.0, 1_000.0]);

    table.fix_row_lengths();
    let mean_idx = table.index_for_name("latency.mean").unwrap();
    assert_eq!(table.data[0][mean_idx], Some(3.0));
}

#[tokio::test]
async fn test_range_read_window_bounds() {
    let engine = engine();
    for ts in [1_000, 2_000, 3_000, 4_000] {
        engine
            .write_row(basic_record(ts, ts as f64), "s")
            .await
            .unwrap();
    }
    let mut req = range_req("s");
    req.start_timestamp = 2_000;
    req.end_timestamp = 3_000;
    let table = engine.read_rows(&req).await.unwrap();
    let times: Vec<f64> = table.data.iter().map(|r| r[0].unwrap()).collect();
    assert_eq!(times, vec![3_000.0, 2_000.0], "window is inclusive both ends");
}

#[tokio::test]
async fn test_range_read_max_results() {
    let engine = engine();
    for ts in 0..10 {
        engine
            .write_row(basic_record(ts * 1_000, 1.0), "s")
            .await
            .unwrap();
    }
    let mut req = range_req("s");
    req.max_results = 4;
    let table = engine.read_rows(&req).await.unwrap();
    assert_eq!(table.data.len(), 4);
}

#[tokio::test]
async fn test_empty_range_is_error() {
    let engine = engine();
    engine.write_row(basic_record(1_000, 1.0), "s").await.unwrap();
    let mut req = range_req("s");
    req.start_timestamp = 500_000;
    req.end_timestamp = 600_000;
    let err = engine.read_rows(&req).await.unwrap_err();
    assert!(err.to_string().contains("s"), "names the source: {err}");
}

#[tokio::test]
async fn test_aggregates_filter_mean_only() {
    let engine = engine();
    engine.write_row(basic_record(1_000, 5.0), "s").await.unwrap();

    let mut req = range_req("s");
    req.filtered_sources[0].aggregates_filter = Some(set(&["mean"]));
    let table = engine.read_rows(&req).await.unwrap();

    for name in &table.column_names {
        assert!(
            name == "TIME" || name.ends_with(".mean"),
            "unexpected column {name}"
        );
    }
}

#[tokio::test]
async fn test_aggregates_filter_set_if_missing_reserves_slot() {
    let engine = engine();
    engine.write_row(basic_record(1_000, 5.0), "s").await.unwrap();

    let mut req = range_req("s");
    req.filtered_sources[0].aggregates_filter = Some(set(&["mean", "stdev"]));
    req.set_aggregate_if_missing = true;
    let mut table = engine.read_rows(&req).await.unwrap();
    table.fix_row_lengths();

    let stdev_idx = table.index_for_name("latency.stdev").unwrap();
    assert_eq!(table.data[0][stdev_idx], None, "absent stat, reserved slot");
}

#[tokio::test]
async fn test_metrics_filter() {
    let engine = engine();
    let record = WriteRecord {
        record_timestamp: Some(1_000),
        aggregates_column_names: vec!["a.mean".to_string(), "b.mean".to_string()],
        aggregates: vec![Some(1.0), Some(2.0)],
        ..Default::default()
    };
    engine.write_row(record, "s").await.unwrap();

    let mut req = range_req("s");
    req.filtered_sources[0].metrics_filter = Some(set(&["a"]));
    let table = engine.read_rows(&req).await.unwrap();
    assert!(table.column_names.contains(&"a.mean".to_string()));
    assert!(!table.column_names.contains(&"b.mean".to_string()));
}

#[tokio::test]
async fn test_configs_filter_excludes_aggregate_rows() {
    let engine = engine();
    let mut matching = basic_record(1_000, 1.0);
    matching.config_pairs = HashMap::from([("arch".to_string(), "x86".to_string())]);
    let mut excluded = basic_record(2_000, 2.0);
    excluded.config_pairs = HashMap::from([("arch".to_string(), "arm".to_string())]);
    engine.write_row(matching, "s").await.unwrap();
    engine.write_row(excluded, "s").await.unwrap();

    let mut req = range_req("s");
    req.return_configs = true;
    req.filtered_sources[0].configs_filter =
        Some(HashMap::from([("arch".to_string(), "x86".to_string())]));
    let table = engine.read_rows(&req).await.unwrap();

    assert_eq!(table.data.len(), 1, "the arm row is pruned");
    assert_eq!(table.data[0][0], Some(1_000.0));
    assert_eq!(table.configs.len(), 1);
    assert_eq!(table.configs_column_names, vec!["arch"]);
    assert_eq!(table.configs[0][0].as_deref(), Some("x86"));
}

#[tokio::test]
async fn test_configs_only_read_with_filter() {
    // With aggregates suppressed, the exclusion set is still computed but
    // never consulted; config rows themselves are filtered.
    let engine = engine();
    let mut matching = basic_record(1_000, 1.0);
    matching.config_pairs = HashMap::from([("arch".to_string(), "x86".to_string())]);
    let mut excluded = basic_record(2_000, 2.0);
    excluded.config_pairs = HashMap::from([("arch".to_string(), "arm".to_string())]);
    engine.write_row(matching, "s").await.unwrap();
    engine.write_row(excluded, "s").await.unwrap();

    let mut req = range_req("s");
    req.no_return_aggregates = true;
    req.return_configs = true;
    req.return_ids = true;
    req.filtered_sources[0].configs_filter =
        Some(HashMap::from([("arch".to_string(), "x86".to_string())]));
    let table = engine.read_rows(&req).await.unwrap();

    assert!(table.data.is_empty());
    assert_eq!(table.configs.len(), 1);
    assert_eq!(table.id_column.len(), 1, "ids ride along with config rows");
}

#[tokio::test]
async fn test_multi_source_merge_names_columns_per_source() {
    let engine = engine();
    engine.write_row(basic_record(1_000, 1.0), "src-a").await.unwrap();
    engine.write_row(basic_record(2_000, 2.0), "src-b").await.unwrap();

    let mut req = range_req("src-a");
    req.filtered_sources.push(FilteredSource {
        source: "src-b".to_string(),
        ..Default::default()
    });
    let mut table = engine.read_rows(&req).await.unwrap();

    assert!(table.column_names.contains(&"TIME".to_string()));
    assert!(table.column_names.contains(&"src-a:latency.mean".to_string()));
    assert!(table.column_names.contains(&"src-b:latency.mean".to_string()));
    assert_eq!(table.data.len(), 2);

    table.fix_row_lengths();
    table.sort_rows();
    let a_idx = table.index_for_name("src-a:latency.mean").unwrap();
    let b_idx = table.index_for_name("src-b:latency.mean").unwrap();
    assert_eq!(table.data[0][a_idx], Some(1.0));
    assert_eq!(table.data[0][b_idx], None);
    assert_eq!(table.data[1][b_idx], Some(2.0));
}

#[tokio::test]
async fn test_missing_source_in_multi_read_fails() {
    let engine = engine();
    engine.write_row(basic_record(1_000, 1.0), "src-a").await.unwrap();

    let mut req = range_req("src-a");
    req.filtered_sources.push(FilteredSource {
        source: "src-missing".to_string(),
        ..Default::default()
    });
    let err = engine.read_rows(&req).await.unwrap_err();
    assert!(err.to_string().contains("src-missing"));
}

#[tokio::test]
async fn test_delete_row_removes_all_families() {
    let engine = engine();
    let mut record = basic_record(1_000, 1.0);
    record.config_pairs = HashMap::from([("k".to_string(), "v".to_string())]);
    let row_key = engine.write_row(record, "s").await.unwrap();

    engine.delete_row(&row_key).await.unwrap();

    let read = engine
        .read_row(&RowRequest {
            id: row_key,
            no_return_aggregates: false,
        })
        .await
        .unwrap();
    assert!(read.source.is_none());
    assert!(read.aggregates.is_empty());
    assert!(read.config_pairs.is_empty());
    assert!(read.record_timestamp.is_none());
}

#[tokio::test]
async fn test_directory_write_read_delete() {
    let engine = engine();
    let info = SourceInfo {
        names: vec!["latency".to_string(), "qps".to_string()],
        units: vec!["ms".to_string(), "1/s".to_string()],
        select_for_defaults: vec![true, false],
    };
    engine.write_dir(&info, "proj/sub/bench").await.unwrap();

    // Exact path.
    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj/sub".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names, vec!["proj/sub/bench"]);

    // Directory-prefix match.
    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj".to_string(),
            dir_prefix_match: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names, vec!["proj/sub/bench"]);

    // Metric expansion with units and flags.
    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj/sub".to_string(),
            return_metrics: true,
            return_units: true,
            return_select_for_defaults: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        got.names,
        vec!["proj/sub/bench:latency", "proj/sub/bench:qps"]
    );
    assert_eq!(got.units, vec!["ms", "1/s"]);
    assert_eq!(got.select_for_defaults, vec![true, false]);

    // defaults_only keeps flagged metrics.
    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj/sub".to_string(),
            return_metrics: true,
            defaults_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names, vec!["proj/sub/bench:latency"]);

    engine.delete_dir("proj/sub", "bench").await.unwrap();
    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj/sub".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(got.names.is_empty());
}

#[tokio::test]
async fn test_directory_file_restrict() {
    let engine = engine();
    engine
        .write_dir(&SourceInfo::default(), "proj/bench-one")
        .await
        .unwrap();
    engine
        .write_dir(&SourceInfo::default(), "proj/bench-two")
        .await
        .unwrap();
    engine
        .write_dir(&SourceInfo::default(), "proj/other")
        .await
        .unwrap();

    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj".to_string(),
            file_restrict: "bench-one".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names, vec!["proj/bench-one"]);

    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj".to_string(),
            file_restrict: "bench".to_string(),
            file_prefix_match: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names, vec!["proj/bench-one", "proj/bench-two"]);
}

#[tokio::test]
async fn test_directory_inconsistent_arrays_omitted() {
    let engine = engine();
    let info = SourceInfo {
        names: vec!["latency".to_string(), "qps".to_string()],
        units: vec!["ms".to_string()], // Wrong length.
        select_for_defaults: vec![true], // Wrong length.
    };
    engine.write_dir(&info, "proj/bench").await.unwrap();

    let got = engine
        .read_dir(&DirectoryRequest {
            prefix: "proj".to_string(),
            return_metrics: true,
            return_units: true,
            return_select_for_defaults: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got.names.len(), 2);
    assert!(got.units.is_empty(), "inconsistent units are omitted");
    assert!(got.select_for_defaults.is_empty());
}
