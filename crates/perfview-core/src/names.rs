//! Shared column-name conventions.

/// Label of the time column, always column 0 of a fresh range read.
pub const TIME_NAME: &str = "TIME";

/// Label of the X column after an equal-X rewrite.
pub const RECORD_NUM_NAME: &str = "RECORD_NUM";

/// Prefix of derived regression columns; `REGRESS:src:metric.mean` is the
/// regression over `src:metric.mean`.
pub const REGRESS_NAME_PREFIX: &str = "REGRESS:";

/// Splits a `metric.stat` column name at the first dot. Either half may come
/// back empty; callers decide whether that is an error.
pub fn metric_components(full_name: &str) -> (&str, &str) {
    match full_name.split_once('.') {
        Some((metric, stat)) => (metric, stat),
        None => (full_name, ""),
    }
}

/// Splits a slash-delimited source into (directory path, leaf file name).
pub fn src_components(src: &str) -> (&str, &str) {
    match src.rsplit_once('/') {
        Some((path, file)) => (path, file),
        None => ("", src),
    }
}
