//! Error types for the aggregator.
//!
//! Only validation errors ever reach a caller as a top-level failure. Source failures are
//! contained per source and decode errors are per frame.

/// Errors surfaced before a dispatch begins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// Bad input: empty query or no usable source.
    #[error("invalid search request: {0}")]
    Validation(String),

    /// The client-side runner has shut down.
    #[error("search runner has stopped")]
    Closed,
}

/// Why a single source did not produce results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed upstream payload: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,
}

/// A single event frame that could not be decoded. The stream carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame has no data field")]
    MissingData,

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("invalid event json: {0}")]
    Json(String),
}
