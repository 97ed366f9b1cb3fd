//! Row-key scheme.
//!
//! The store sorts rows in ascending byte order, but range queries want the
//! most-recent records first. Keys therefore embed the timestamp subtracted
//! from a maximum, so natural ascending key order is descending time order:
//!
//! ```text
//! <32-hex-char md5 of source> '_' <13-digit MAX_TIME_MILLIS - ts> '_' <unique id>
//! ```
//!
//! The hash prefix clusters one source's records together; the unique
//! suffix keeps same-millisecond writes distinct. Range scans are half-open
//! `[start, end)` between two exact keys, so window prefixes bump the last
//! byte of the inclusive bound by one.

use md5::{Digest, Md5};
use std::fmt::Write;

/// 13 nines: the largest timestamp the key format can carry.
pub const MAX_TIME_MILLIS: i64 = 9_999_999_999_999;

// Key layout: (32 hash) + '_' + (13 timestamp) = 46 bytes minimum.
const TIMESTAMP_OFFSET: usize = 33;
const TIMESTAMP_END: usize = 46;

/// Lowercase-hex md5 of the source string, 32 chars.
pub fn source_hash(src: &str) -> String {
    let digest = Md5::digest(src.as_bytes());
    let mut out = String::with_capacity(32);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Full row key for one record of `src` at `timestamp_millis`.
pub fn make_row_key(src: &str, timestamp_millis: i64, unique: &str) -> String {
    format!(
        "{}_{:013}_{}",
        source_hash(src),
        MAX_TIME_MILLIS - timestamp_millis,
        unique
    )
}

/// The smallest string strictly greater than every string with `input` as a
/// prefix, obtained by incrementing the last byte.
pub fn plus_one(input: &str) -> String {
    let bytes = input.as_bytes();
    let Some((&last, head)) = bytes.split_last() else {
        return input.to_string();
    };
    let mut out = String::with_capacity(input.len());
    out.push_str(std::str::from_utf8(head).unwrap_or_default());
    out.push((last + 1) as char);
    out
}

/// Half-open `[start, end)` key range scanning `src` records newest-first
/// within the inclusive `[start_timestamp, end_timestamp]` window. The time
/// field is reversed, so the scan's start bound comes from the window's end.
pub fn row_prefixes(src: &str, start_timestamp: i64, end_timestamp: i64) -> (String, String) {
    let base = source_hash(src);
    let start_key = format!("{}_{:013}", base, MAX_TIME_MILLIS - end_timestamp);
    let end_key = format!("{}_{:013}", base, MAX_TIME_MILLIS - start_timestamp);
    (start_key, plus_one(&end_key))
}

/// Recovers the record timestamp from a row key; 0 for keys too short to
/// carry one.
pub fn extract_timestamp(row_key: &str) -> i64 {
    row_key
        .get(TIMESTAMP_OFFSET..TIMESTAMP_END)
        .and_then(|digits| digits.parse::<i64>().ok())
        .map(|reversed| MAX_TIME_MILLIS - reversed)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_hash_is_32_lowercase_hex() {
        let hash = source_hash("a/b/c");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, source_hash("a/b/c"), "deterministic");
        assert_ne!(hash, source_hash("a/b/C"), "case-sensitive");
    }

    #[test]
    fn test_extract_timestamp_roundtrip() {
        for ts in [0, 1, 1_370_000_000_000, MAX_TIME_MILLIS] {
            let key = make_row_key("some/src", ts, "u-1");
            assert_eq!(extract_timestamp(&key), ts);
        }
    }

    #[test]
    fn test_extract_timestamp_short_key() {
        assert_eq!(extract_timestamp("too-short"), 0);
        assert_eq!(extract_timestamp(""), 0);
    }

    #[test]
    fn test_ascending_key_order_is_descending_time() {
        let timestamps = [5i64, 1_000, 999, 1_370_000_000_000, 0, MAX_TIME_MILLIS];
        let mut keys: Vec<(String, i64)> = timestamps
            .iter()
            .map(|&ts| (make_row_key("src", ts, "u"), ts))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        let sorted_times: Vec<i64> = keys.iter().map(|(_, ts)| *ts).collect();
        let mut want = timestamps.to_vec();
        want.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted_times, want);
    }

    #[test]
    fn test_plus_one() {
        assert_eq!(plus_one("abc"), "abd");
        assert_eq!(plus_one("ab9"), "ab:");
        assert_eq!(plus_one(""), "");
    }

    #[test]
    fn test_row_prefixes_bracket_window() {
        let (start, end) = row_prefixes("src", 1_000, 2_000);
        let inside = make_row_key("src", 1_500, "u");
        let at_start = make_row_key("src", 2_000, "u");
        let at_end = make_row_key("src", 1_000, "u");
        let before = make_row_key("src", 999, "u");
        let after = make_row_key("src", 2_001, "u");

        let in_range = |k: &str| start.as_str() <= k && k < end.as_str();
        assert!(in_range(&inside));
        assert!(in_range(&at_start), "window end is inclusive");
        assert!(in_range(&at_end), "window start is inclusive");
        assert!(!in_range(&before));
        assert!(!in_range(&after));
    }

    #[test]
    fn test_row_prefixes_distinct_sources_disjoint() {
        let (start_a, end_a) = row_prefixes("src-a", 0, MAX_TIME_MILLIS);
        let key_b = make_row_key("src-b", 1_000, "u");
        assert!(!(start_a.as_str() <= key_b.as_str() && key_b.as_str() < end_a.as_str()));
    }
}
