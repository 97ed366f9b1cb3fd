//! Sparse wide tables for range-query responses.
//!
//! A [`DataTable`] is the column-aligned result of a range read: column 0 is
//! the X axis (time, until reassigned), every other column is one
//! `src:metric.stat` series, and rows are sparse vectors of optional
//! doubles. This crate owns everything that happens to a table after the
//! storage reads: column and row sorting, X-axis reassignment, multi-source
//! merging, and regression detection.

pub mod merge;
pub mod regress;
pub mod table;

pub use merge::merge_data_tables;
pub use regress::RegressionParams;
pub use table::{ConfigRow, DataRow, DataTable};
