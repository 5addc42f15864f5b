use super::models::PageToken;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by the lister, the reader and the store clients
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Network failure, throttling or 5xx. Retried internally.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("listing failed after retries (resume token: {resume_token:?}): {reason}")]
    ListingFailed {
        resume_token: Option<PageToken>,
        reason: String,
    },

    #[error("read failed after {bytes_delivered} bytes were delivered: {reason}")]
    PartialReadFailure { bytes_delivered: u64, reason: String },

    #[error("object content changed during read (expected {expected}, got {actual})")]
    ContentChanged { expected: String, actual: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {bytes_delivered} bytes were delivered")]
    TimedOut { bytes_delivered: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("range {start}-{end} is not satisfiable for an object of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },

    #[error("failed writing to sink after {bytes_delivered} bytes: {source}")]
    Sink {
        bytes_delivered: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("object {key} is not valid JSON: {source}")]
    InvalidJson {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the operation may succeed if repeated unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub(crate) fn not_found(bucket: &str, key: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}
