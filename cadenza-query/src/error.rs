//! Error types for the query runtime.

use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by the query runtime.
///
/// Only misuse errors ([`UnserializableArgs`](Self::UnserializableArgs),
/// [`UnknownEndpoint`](Self::UnknownEndpoint)) escape as `Err` — fetch-path
/// failures are caught at the runtime boundary and stored in the per-key
/// state as `{status: Error, error_message}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Fetch arguments could not be canonicalized (non-string map keys,
    /// non-finite floats). Fail-fast at the call site, never stored.
    #[error("fetch args are not serializable: {0}")]
    UnserializableArgs(String),

    /// No endpoint with this name was registered.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// A fetch resolved but carried no usable payload.
    #[error("remote data not found")]
    RemoteDataNotFound,
}
