#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use s3reader::{
    ByteRange, InMemoryStorage, ListPage, ListingConfig, ListingQuery, Lister, ObjectDescriptor,
    ObjectStoreClient, ObjectStream, PageToken, Reader, ReadingConfig, Result, RetryConfig,
    StoreError,
};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

pub const TEST_BUCKET: &str = "b";

/// Retry quickly so failure paths do not slow the suite down
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_retries(3)
        .with_initial_backoff_ms(1)
        .with_max_backoff_ms(5)
        .with_jitter(false)
}

/// Wraps `InMemoryStorage` with request counters and injectable faults
///
/// Faults apply to every call unless a countdown is given, in which case
/// only the first N calls fail.
pub struct FaultyClient {
    inner: InMemoryStorage,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    list_failures: AtomicUsize,
    list_fail_from_call: Option<usize>,
    list_error: Option<fn() -> StoreError>,
    open_failures: AtomicUsize,
    body_fail_after: Option<u64>,
    served_etag: Option<String>,
    extra_bytes: usize,
    chunk_delay: Option<Duration>,
    list_delay: Option<Duration>,
}

impl FaultyClient {
    pub fn new(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            list_failures: AtomicUsize::new(0),
            list_fail_from_call: None,
            list_error: None,
            open_failures: AtomicUsize::new(0),
            body_fail_after: None,
            served_etag: None,
            extra_bytes: 0,
            chunk_delay: None,
            list_delay: None,
        }
    }

    /// The first `n` list calls fail transiently
    pub fn failing_first_lists(self, n: usize) -> Self {
        self.list_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every list call from the `n`th (1-based) on fails transiently
    pub fn failing_lists_from(mut self, n: usize) -> Self {
        self.list_fail_from_call = Some(n);
        self
    }

    /// Every list call fails with the given error
    pub fn list_error(mut self, error: fn() -> StoreError) -> Self {
        self.list_error = Some(error);
        self
    }

    /// The first `n` get_object calls fail transiently before any body byte
    pub fn failing_first_opens(self, n: usize) -> Self {
        self.open_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every body stream fails transiently once `bytes` have been sent
    pub fn failing_body_after(mut self, bytes: u64) -> Self {
        self.body_fail_after = Some(bytes);
        self
    }

    /// Streams report this content tag instead of the stored one
    pub fn serving_etag(mut self, etag: &str) -> Self {
        self.served_etag = Some(etag.to_string());
        self
    }

    /// Bodies carry `n` bytes past the object's end
    pub fn serving_extra_bytes(mut self, n: usize) -> Self {
        self.extra_bytes = n;
        self
    }

    /// Sleep before answering every list call
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Sleep before every body chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStoreClient for FaultyClient {
    async fn list_page(
        &self,
        query: &ListingQuery,
        token: Option<&PageToken>,
        max_keys: usize,
    ) -> Result<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.list_error {
            return Err(error());
        }
        if Self::take_failure(&self.list_failures) {
            return Err(StoreError::Transient("injected list failure".to_string()));
        }
        if self.list_fail_from_call.is_some_and(|from| call >= from) {
            return Err(StoreError::Transient("injected list outage".to_string()));
        }

        self.inner.list_page(query, token, max_keys).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor> {
        self.inner.head_object(bucket, key).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectStream, ObjectDescriptor)> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_failure(&self.open_failures) {
            return Err(StoreError::Transient("injected open failure".to_string()));
        }

        let (mut inner, mut descriptor) = self.inner.get_object(bucket, key, range).await?;
        if let Some(etag) = &self.served_etag {
            descriptor.etag = etag.clone();
        }

        let fail_after = self.body_fail_after;
        let extra_bytes = self.extra_bytes;
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            let mut sent = 0u64;
            while let Some(chunk) = inner.next().await {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let chunk: Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                if fail_after.is_some_and(|limit| sent + chunk.len() as u64 > limit) {
                    yield Err(StoreError::Transient("connection reset".to_string()));
                    return;
                }
                sent += chunk.len() as u64;
                yield Ok(chunk);
            }
            if extra_bytes > 0 {
                yield Ok(Bytes::from(vec![0u8; extra_bytes]));
            }
        };

        Ok((Box::pin(stream), descriptor))
    }
}

/// Store `count` one-byte objects named `{prefix}{i:05}`
pub async fn seed_objects(storage: &InMemoryStorage, prefix: &str, count: usize) {
    for i in 0..count {
        storage
            .put_object(TEST_BUCKET, &format!("{}{:05}", prefix, i), Bytes::from("x"))
            .await;
    }
}

pub fn lister(client: Arc<dyn ObjectStoreClient>, page_size: usize) -> Lister {
    let listing = ListingConfig {
        page_size,
        ..ListingConfig::default()
    };
    Lister::new(client, listing, fast_retry())
}

pub fn reader(client: Arc<dyn ObjectStoreClient>, reading: ReadingConfig) -> Reader {
    Reader::new(client, reading, fast_retry())
}

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) % 251) as u8)
        .collect::<Vec<u8>>()
        .into()
}

/// In-memory sink with a fixed capacity. Writes past it fail, or stall
/// forever when built with [`LimitedSink::stalling`].
pub struct LimitedSink {
    pub data: Vec<u8>,
    capacity: usize,
    stall_when_full: bool,
}

impl LimitedSink {
    pub fn failing(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            stall_when_full: false,
        }
    }

    pub fn stalling(capacity: usize) -> Self {
        Self {
            stall_when_full: true,
            ..Self::failing(capacity)
        }
    }
}

impl AsyncWrite for LimitedSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let room = self.capacity - self.data.len();
        if room == 0 {
            if self.stall_when_full {
                return Poll::Pending;
            }
            return Poll::Ready(Err(io::Error::other("sink is full")));
        }

        let n = room.min(buf.len());
        self.data.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
