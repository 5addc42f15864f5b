use super::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::fmt;

/// Represents one remote object as returned by a listing or a metadata probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Opaque content tag (ETag) used for change detection
    pub etag: String,
}

/// Opaque continuation marker handed out by the store for truncated listings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single listing response
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Grouped key prefixes when the query carries a delimiter
    pub common_prefixes: Vec<String>,
    pub next_token: Option<PageToken>,
}

/// Immutable listing input, validated at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    bucket: String,
    prefix: String,
    delimiter: Option<String>,
    max_results: Option<usize>,
}

impl ListingQuery {
    /// An empty prefix lists the whole bucket.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(StoreError::InvalidInput(
                "bucket name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bucket,
            prefix: prefix.into(),
            delimiter: None,
            max_results: None,
        })
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Result<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(StoreError::InvalidInput(
                "delimiter must not be empty".to_string(),
            ));
        }
        self.delimiter = Some(delimiter);
        Ok(self)
    }

    pub fn with_max_results(mut self, max_results: usize) -> Result<Self> {
        if max_results == 0 {
            return Err(StoreError::InvalidInput(
                "max results must be greater than zero".to_string(),
            ));
        }
        self.max_results = Some(max_results);
        Ok(self)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }
}

/// Inclusive byte range, `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(StoreError::InvalidInput(format!(
                "range start {} is past range end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Saturates at `u64::MAX` for `0..=u64::MAX`
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Never true: an inclusive range holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Clamp the range to an object of `size` bytes
    pub fn clamp_to(&self, size: u64) -> Result<Self> {
        if self.start >= size {
            return Err(StoreError::InvalidRange {
                start: self.start,
                end: self.end,
                size,
            });
        }
        Ok(Self {
            start: self.start,
            end: self.end.min(size - 1),
        })
    }

    /// Value for an HTTP `Range` header
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Immutable read input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    bucket: String,
    key: String,
    range: Option<ByteRange>,
}

impl ReadRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || key.is_empty() {
            return Err(StoreError::InvalidInput(
                "bucket and key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            bucket,
            key,
            range: None,
        })
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Cancelled,
}

/// Finalization record of a single read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// Metadata probed before streaming; `None` only when the read was
    /// cancelled before the probe completed
    pub object: Option<ObjectDescriptor>,
    pub bytes_transferred: u64,
    pub status: CompletionStatus,
}

impl ReadResult {
    pub fn is_complete(&self) -> bool {
        self.status == CompletionStatus::Completed
    }
}
