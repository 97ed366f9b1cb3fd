//! JSON wire records for the HTTP surface plus the per-record request types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One metric's raw point stream as POSTed by a client. When timestamps are
/// present their count must match the value count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamps: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<f64>,
}

/// Everything one POST attaches to a (source, timestamp): aggregates as
/// parallel `metric.stat` name/value arrays, optional raw point streams, and
/// arbitrary string config pairs. The data-type strings apply uniformly to
/// all aggregates (respectively all points) of the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<PointsRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub points_data_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates_column_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregates_data_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config_pairs: HashMap<String, String>,
}

/// One fully-assembled record as returned by `GET /record/<id>`. Points come
/// back as a small wide table (time column first); aggregates as parallel
/// sorted name/value arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points_column_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub points_data_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates_column_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregates_data_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config_pairs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl ReadRecord {
    /// Sorts point columns by name, rearranging every row in lockstep.
    pub fn sort_points(&mut self) {
        let perm = sort_permutation(&self.points_column_names);
        apply_permutation(&perm, &mut self.points_column_names);
        for row in &mut self.points {
            row.resize(self.points_column_names.len(), None);
            apply_permutation(&perm, row);
        }
    }

    /// Sorts the parallel aggregate name/value arrays by name.
    pub fn sort_aggregates(&mut self) {
        let perm = sort_permutation(&self.aggregates_column_names);
        apply_permutation(&perm, &mut self.aggregates_column_names);
        apply_permutation(&perm, &mut self.aggregates);
    }
}

fn sort_permutation(names: &[String]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..names.len()).collect();
    perm.sort_by(|&a, &b| names[a].cmp(&names[b]));
    perm
}

fn apply_permutation<T: Clone>(perm: &[usize], row: &mut Vec<T>) {
    let reordered: Vec<T> = perm.iter().map(|&i| row[i].clone()).collect();
    *row = reordered;
}

/// Directory entry written by `PUT /src/<source>`: metric names with
/// optional parallel units and select-for-defaults flags. When a parallel
/// array exists but its length disagrees with the names, that field is
/// silently omitted from results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_for_defaults: Vec<bool>,
}

/// A single-record read request.
#[derive(Debug, Clone, Default)]
pub struct RowRequest {
    pub id: String,
    pub no_return_aggregates: bool,
}

/// A directory browse/search request against the children index.
#[derive(Debug, Clone, Default)]
pub struct DirectoryRequest {
    pub prefix: String,
    /// Restrict matches to this leaf file name; empty matches every file.
    pub file_restrict: String,
    pub return_metrics: bool,
    pub return_units: bool,
    pub return_select_for_defaults: bool,
    /// Keep only metrics flagged select-for-defaults.
    pub defaults_only: bool,
    /// Treat `prefix` as a directory prefix instead of an exact path.
    pub dir_prefix_match: bool,
    /// Treat `file_restrict` as a prefix instead of an exact name.
    pub file_prefix_match: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_record_json_shape() {
        let json = r#"{
            "recordTimestamp": 1370044800000,
            "points": [{"name": "latency", "timestamps": [1, 2], "data": [0.5, 0.7]}],
            "pointsDataType": "SCALED2",
            "aggregatesColumnNames": ["latency.mean", "latency.p99"],
            "aggregates": [0.6, 0.7],
            "aggregatesDataType": "SCALED2",
            "configPairs": {"build": "1234"}
        }"#;
        let rec: WriteRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.record_timestamp, Some(1_370_044_800_000));
        assert_eq!(rec.points.len(), 1);
        assert_eq!(rec.points[0].name, "latency");
        assert_eq!(rec.aggregates_column_names.len(), 2);
        assert_eq!(rec.aggregates, vec![Some(0.6), Some(0.7)]);
        assert_eq!(rec.config_pairs["build"], "1234");
    }

    #[test]
    fn test_write_record_empty_json() {
        let rec: WriteRecord = serde_json::from_str("{}").unwrap();
        assert!(rec.record_timestamp.is_none());
        assert!(rec.points.is_empty());
        assert!(rec.aggregates.is_empty());
    }

    #[test]
    fn test_read_record_omits_empty_fields() {
        let rec = ReadRecord {
            id: "abc".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"id":"abc"}"#);
    }

    #[test]
    fn test_sort_points_rearranges_rows_in_lockstep() {
        let mut rec = ReadRecord {
            points_column_names: vec!["b".into(), "a".into(), "c".into()],
            points: vec![
                vec![Some(2.0), Some(1.0), Some(3.0)],
                vec![None, Some(10.0), None],
            ],
            ..Default::default()
        };
        rec.sort_points();
        assert_eq!(rec.points_column_names, vec!["a", "b", "c"]);
        assert_eq!(rec.points[0], vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(rec.points[1], vec![Some(10.0), None, None]);
    }

    #[test]
    fn test_sort_aggregates_parallel() {
        let mut rec = ReadRecord {
            aggregates_column_names: vec!["m.p99".into(), "m.count".into(), "m.mean".into()],
            aggregates: vec![Some(9.0), Some(1.0), Some(5.0)],
            ..Default::default()
        };
        rec.sort_aggregates();
        assert_eq!(
            rec.aggregates_column_names,
            vec!["m.count", "m.mean", "m.p99"]
        );
        assert_eq!(rec.aggregates, vec![Some(1.0), Some(5.0), Some(9.0)]);
    }

    #[test]
    fn test_source_info_json_roundtrip() {
        let si = SourceInfo {
            names: vec!["latency".into(), "qps".into()],
            units: vec!["ms".into(), "1/s".into()],
            select_for_defaults: vec![true, false],
        };
        let json = serde_json::to_string(&si).unwrap();
        let back: SourceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(si, back);
        assert!(json.contains("selectForDefaults"));
    }
}
