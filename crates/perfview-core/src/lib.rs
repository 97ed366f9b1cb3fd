//! Core types and codecs for PerfView.
//!
//! This crate holds everything the storage and query layers share:
//! - the error kinds every operation returns,
//! - the scaled-integer codec between user doubles and storage form,
//! - the binary wire encoding used for stored column values,
//! - the hash-prefixed, reversed-time row-key scheme,
//! - the `src:metric.agg$k=v` selector parser,
//! - the JSON wire records for the HTTP surface.

pub mod codec;
pub mod error;
pub mod keys;
pub mod names;
pub mod record;
pub mod srcparse;
pub mod varint;
pub mod wire;

pub use codec::{Aggregation, DataType, DoubleStats, Points, ScaledStats, STAT_NAMES};
pub use error::{Error, Result};
pub use record::{
    DirectoryRequest, PointsRecord, ReadRecord, RowRequest, SourceInfo, WriteRecord,
};
pub use srcparse::SrcSelector;
