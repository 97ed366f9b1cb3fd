//! Error types for PerfView operations.
//!
//! Five kinds cover the whole system:
//! - `BadInput`: malformed queries, mismatched array lengths, unparseable
//!   numerics (HTTP 400)
//! - `NoData`: a write attempted with an empty payload (HTTP 400)
//! - `EmptyResult`: a range read yielded no aggregate columns (HTTP 400)
//! - `Storage`: transport or decoding failure from the storage adapter
//!   (HTTP 500)
//! - `Internal`: serialization failure (HTTP 500)
//!
//! All fallible functions return `Result<T>` aliased to `Result<T, Error>`
//! so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("no data to write")]
    NoData,

    #[error("no results for: {0}")]
    EmptyResult(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
