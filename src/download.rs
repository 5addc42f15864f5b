//! Download objects into a local directory, one file per key, or into
//! memory as raw bytes or decoded JSON.

use crate::lister::Lister;
use crate::reader::Reader;
use crate::types::{CompletionStatus, ReadRequest, Result, StoreError};
use futures::stream::{self, StreamExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Result of downloading one key
#[derive(Debug)]
pub struct DownloadOutcome {
    pub key: String,
    pub path: PathBuf,
    /// Bytes written on success
    pub result: Result<u64>,
}

/// Shape of objects downloaded into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Decode each object as a JSON document
    #[default]
    Json,
    Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Result of downloading one key into memory
#[derive(Debug)]
pub struct MemoryOutcome {
    pub key: String,
    pub result: Result<Payload>,
}

/// Map a key onto a path below `output_dir`, refusing keys that would
/// escape it or that name a directory.
pub fn target_path(output_dir: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    let is_plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));

    if key.is_empty() || key.ends_with('/') || !is_plain {
        return Err(StoreError::InvalidInput(format!(
            "key {:?} cannot be stored as a local file",
            key
        )));
    }

    Ok(output_dir.join(relative))
}

async fn download_one(
    reader: &Reader,
    bucket: &str,
    key: &str,
    path: &Path,
    cancel: CancellationToken,
) -> Result<u64> {
    let request = ReadRequest::new(bucket, key)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Sink {
                bytes_delivered: 0,
                source,
            })?;
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| StoreError::Sink {
            bytes_delivered: 0,
            source,
        })?;

    let result = reader.read(&request, &mut file, None, cancel).await?;
    match result.status {
        CompletionStatus::Completed => Ok(result.bytes_transferred),
        CompletionStatus::Cancelled => Err(StoreError::Cancelled),
    }
}

/// Download `keys` into `output_dir` with at most `concurrency` reads in
/// flight. Outcomes are returned in the order of `keys`.
pub async fn download_keys(
    reader: &Reader,
    bucket: &str,
    keys: &[String],
    output_dir: &Path,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<DownloadOutcome> {
    let total = keys.len();
    let done = AtomicUsize::new(0);

    stream::iter(keys)
        .map(|key| {
            let cancel = cancel.clone();
            let done = &done;
            async move {
                let (path, result) = match target_path(output_dir, key) {
                    Ok(path) => {
                        let result = download_one(reader, bucket, key, &path, cancel).await;
                        (path, result)
                    }
                    Err(err) => (PathBuf::new(), Err(err)),
                };

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                match &result {
                    Ok(bytes) => {
                        tracing::info!("[{}/{}] Downloaded {} ({} bytes)", finished, total, key, bytes)
                    }
                    Err(err) => {
                        tracing::error!("[{}/{}] Failed to download {}: {}", finished, total, key, err)
                    }
                }

                DownloadOutcome {
                    key: key.clone(),
                    path,
                    result,
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

async fn fetch_payload(
    reader: &Reader,
    bucket: &str,
    key: &str,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<Payload> {
    let request = ReadRequest::new(bucket, key)?;
    let data = reader.read_to_bytes(&request, cancel).await?;

    match format {
        OutputFormat::Bytes => Ok(Payload::Bytes(data)),
        OutputFormat::Json => serde_json::from_slice(&data)
            .map(Payload::Json)
            .map_err(|source| StoreError::InvalidJson {
                key: key.to_string(),
                source,
            }),
    }
}

/// Read `keys` into memory with at most `concurrency` reads in flight.
/// Outcomes are returned in the order of `keys`.
pub async fn download_keys_to_memory(
    reader: &Reader,
    bucket: &str,
    keys: &[String],
    format: OutputFormat,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<MemoryOutcome> {
    let total = keys.len();
    let done = AtomicUsize::new(0);

    stream::iter(keys)
        .map(|key| {
            let cancel = cancel.clone();
            let done = &done;
            async move {
                let result = fetch_payload(reader, bucket, key, format, cancel).await;

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                match &result {
                    Ok(_) => tracing::info!("[{}/{}] Fetched {}", finished, total, key),
                    Err(err) => {
                        tracing::error!("[{}/{}] Failed to fetch {}: {}", finished, total, key, err)
                    }
                }

                MemoryOutcome {
                    key: key.clone(),
                    result,
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Keys under `prefixes`, in prefix order, without directory markers.
pub async fn list_object_keys(
    lister: &Lister,
    bucket: &str,
    prefixes: &[String],
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<Vec<String>> {
    let keys = lister
        .list_prefixes(bucket, prefixes, concurrency, cancel)
        .await?;

    // Directory markers have no content to store
    Ok(keys.into_iter().filter(|key| !key.ends_with('/')).collect())
}

/// List `prefixes` and download every key found.
pub async fn download_prefixes(
    lister: &Lister,
    reader: &Reader,
    bucket: &str,
    prefixes: &[String],
    output_dir: &Path,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<Vec<DownloadOutcome>> {
    let keys = list_object_keys(lister, bucket, prefixes, concurrency, cancel.clone()).await?;
    Ok(download_keys(reader, bucket, &keys, output_dir, concurrency, cancel).await)
}
