//! Streaming reads into a caller-supplied sink.
//!
//! A read probes the object's metadata first and pins its content tag. Body
//! bytes are written to the sink in pieces of at most `chunk_size` bytes, so
//! memory use does not depend on object size. Failures before the first byte
//! reaches the sink are retried; after that they surface as
//! [`StoreError::PartialReadFailure`] and resuming is up to the caller.

use crate::config::ReadingConfig;
use crate::retry::{RetryConfig, attempt, sleep_or_cancel, with_retry};
use crate::storage::ObjectStoreClient;
use crate::types::{
    ByteRange, CompletionStatus, ObjectDescriptor, ReadRequest, ReadResult, Result, StoreError,
};
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Called after every successful write to the sink with the cumulative byte
/// count. The transfer waits for it to return.
pub type Progress<'a> = Option<&'a (dyn Fn(u64) + Send + Sync)>;

#[derive(Clone)]
pub struct Reader {
    client: Arc<dyn ObjectStoreClient>,
    reading: ReadingConfig,
    retry: RetryConfig,
}

impl Reader {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        reading: ReadingConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            reading,
            retry,
        }
    }

    /// Stream the requested object (or range) into `sink`.
    ///
    /// Cancellation returns `Ok` with [`CompletionStatus::Cancelled`]; the sink
    /// keeps whatever was already written.
    pub async fn read<W>(
        &self,
        request: &ReadRequest,
        sink: &mut W,
        progress: Progress<'_>,
        cancel: CancellationToken,
    ) -> Result<ReadResult>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut delivered = 0u64;
        let mut object = None;

        let outcome = match self.reading.call_timeout() {
            Some(limit) => {
                let transfer =
                    self.transfer(request, sink, progress, &cancel, &mut delivered, &mut object);
                tokio::time::timeout(limit, transfer).await.ok()
            }
            None => Some(
                self.transfer(request, sink, progress, &cancel, &mut delivered, &mut object)
                    .await,
            ),
        };

        let status = match outcome {
            Some(Ok(status)) => status,
            Some(Err(err)) => {
                tracing::error!(
                    "Read of s3://{}/{} failed after {} bytes: {}",
                    request.bucket(),
                    request.key(),
                    delivered,
                    err
                );
                return Err(err);
            }
            None => {
                tracing::error!(
                    "Read of s3://{}/{} timed out after {} bytes",
                    request.bucket(),
                    request.key(),
                    delivered
                );
                return Err(StoreError::TimedOut {
                    bytes_delivered: delivered,
                });
            }
        };

        match status {
            CompletionStatus::Completed => tracing::info!(
                "Read {} bytes from s3://{}/{}",
                delivered,
                request.bucket(),
                request.key()
            ),
            CompletionStatus::Cancelled => tracing::info!(
                "Read of s3://{}/{} cancelled after {} bytes",
                request.bucket(),
                request.key(),
                delivered
            ),
        }

        Ok(ReadResult {
            object,
            bytes_transferred: delivered,
            status,
        })
    }

    /// Read a whole object (or range) into memory. Meant for small objects.
    pub async fn read_to_bytes(
        &self,
        request: &ReadRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result = self.read(request, &mut buf, None, cancel).await?;
        match result.status {
            CompletionStatus::Completed => Ok(buf),
            CompletionStatus::Cancelled => Err(StoreError::Cancelled),
        }
    }

    async fn transfer<W>(
        &self,
        request: &ReadRequest,
        sink: &mut W,
        progress: Progress<'_>,
        cancel: &CancellationToken,
        delivered: &mut u64,
        probed: &mut Option<ObjectDescriptor>,
    ) -> Result<CompletionStatus>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let (bucket, key) = (request.bucket(), request.key());
        let chunk_timeout = self.reading.chunk_timeout();

        let probe = with_retry(&self.retry, "head_object", chunk_timeout, cancel, || {
            self.client.head_object(bucket, key)
        })
        .await;

        let object = match probe {
            Ok(object) => object,
            Err(StoreError::Cancelled) => return Ok(CompletionStatus::Cancelled),
            Err(err) => return Err(err),
        };
        *probed = Some(object.clone());

        let range = request
            .range()
            .map(|range| range.clamp_to(object.size))
            .transpose()?;

        let mut attempt_no = 0;
        loop {
            let err = match self
                .stream_once(request, range, &object, sink, progress, cancel, delivered)
                .await
            {
                Ok(status) => return Ok(status),
                Err(err) => err,
            };

            if *delivered > 0 {
                return Err(match err {
                    StoreError::ContentChanged { .. } | StoreError::Sink { .. } => err,
                    err => StoreError::PartialReadFailure {
                        bytes_delivered: *delivered,
                        reason: err.to_string(),
                    },
                });
            }

            if !err.is_transient() || attempt_no >= self.retry.max_retries {
                return Err(err);
            }

            let backoff = self.retry.backoff_duration(attempt_no);
            tracing::warn!(
                "Read of s3://{}/{} failed before any byte was delivered (attempt {}), retrying in {}ms: {}",
                bucket,
                key,
                attempt_no,
                backoff.as_millis(),
                err
            );
            if sleep_or_cancel(backoff, cancel).await.is_err() {
                return Ok(CompletionStatus::Cancelled);
            }
            attempt_no += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_once<W>(
        &self,
        request: &ReadRequest,
        range: Option<ByteRange>,
        object: &ObjectDescriptor,
        sink: &mut W,
        progress: Progress<'_>,
        cancel: &CancellationToken,
        delivered: &mut u64,
    ) -> Result<CompletionStatus>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let chunk_timeout = self.reading.chunk_timeout();
        let chunk_size = self.reading.chunk_size.max(1);
        let expected_len = range.map_or(object.size, |r| r.len());

        let opened = attempt(
            "get_object",
            chunk_timeout,
            cancel,
            self.client.get_object(request.bucket(), request.key(), range),
        )
        .await;

        let (mut stream, served) = match opened {
            Ok(opened) => opened,
            Err(StoreError::Cancelled) => return Ok(CompletionStatus::Cancelled),
            Err(err) => return Err(err),
        };

        if served.etag != object.etag {
            return Err(StoreError::ContentChanged {
                expected: object.etag.clone(),
                actual: served.etag,
            });
        }

        let mut received = 0u64;
        loop {
            let next = attempt("read_chunk", chunk_timeout, cancel, async {
                Ok(stream.next().await)
            })
            .await;

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => break,
                Err(StoreError::Cancelled) => return Ok(CompletionStatus::Cancelled),
                Err(err) => return Err(err),
            };

            received += chunk.len() as u64;
            if received > expected_len {
                return Err(StoreError::ContentChanged {
                    expected: format!("{} bytes", expected_len),
                    actual: format!("at least {} bytes", received),
                });
            }

            for piece in chunk.chunks(chunk_size) {
                // A sink may take part of a piece; count what it accepted
                let mut pending = piece;
                while !pending.is_empty() {
                    let written = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Ok(CompletionStatus::Cancelled),
                        written = sink.write(pending) => written,
                    };
                    let written = match written {
                        Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero)),
                        other => other,
                    }
                    .map_err(|source| StoreError::Sink {
                        bytes_delivered: *delivered,
                        source,
                    })?;

                    *delivered += written as u64;
                    pending = &pending[written..];

                    if let Some(progress) = progress {
                        progress(*delivered);
                    }
                }
            }
        }

        if received < expected_len {
            return Err(StoreError::Transient(format!(
                "body ended after {} of {} bytes",
                received, expected_len
            )));
        }

        sink.flush().await.map_err(|source| StoreError::Sink {
            bytes_delivered: *delivered,
            source,
        })?;

        Ok(CompletionStatus::Completed)
    }
}
