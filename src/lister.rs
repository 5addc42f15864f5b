//! Paginated listing.
//!
//! [`Lister::list`] turns a [`ListingQuery`] into a lazy stream of
//! [`ObjectDescriptor`]s. Page requests are issued only as the stream is
//! polled, and continuation tokens never leave the stream except inside
//! [`StoreError::ListingFailed`].

use crate::config::ListingConfig;
use crate::retry::{RetryConfig, with_retry};
use crate::storage::ObjectStoreClient;
use crate::types::{ListingQuery, ObjectDescriptor, PageToken, Result, StoreError};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lazy, finite, single-pass stream of listed objects. Listing again
/// requires a fresh call to [`Lister::list`].
pub type DescriptorStream = Pin<Box<dyn Stream<Item = Result<ObjectDescriptor>> + Send>>;

#[derive(Clone)]
pub struct Lister {
    client: Arc<dyn ObjectStoreClient>,
    listing: ListingConfig,
    retry: RetryConfig,
}

impl Lister {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        listing: ListingConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            listing,
            retry,
        }
    }

    /// List objects matching `query` in store order.
    ///
    /// Transient page failures are retried; once retries are exhausted the
    /// stream yields [`StoreError::ListingFailed`] carrying the token of the
    /// failed page and ends. The same error, with the same token, ends the
    /// stream when the listing outlives `call_timeout_ms`. Cancellation ends
    /// the stream with [`StoreError::Cancelled`]. A missing bucket or prefix
    /// yields nothing.
    pub fn list(&self, query: ListingQuery, cancel: CancellationToken) -> DescriptorStream {
        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        let page_size = self.listing.page_size.max(1);
        let page_timeout = self.listing.page_timeout();
        let call_timeout = self.listing.call_timeout();

        Box::pin(async_stream::stream! {
            // The deadline starts with the first poll
            let deadline = call_timeout.map(|limit| tokio::time::Instant::now() + limit);
            let mut token: Option<PageToken> = None;
            let mut yielded = 0usize;
            let mut pages = 0usize;

            loop {
                let max_keys = match query.max_results() {
                    Some(cap) => (cap - yielded).min(page_size),
                    None => page_size,
                };

                let fetch = with_retry(&retry, "list_page", page_timeout, &cancel, || {
                    client.list_page(&query, token.as_ref(), max_keys)
                });
                let result = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, fetch).await.ok(),
                    None => Some(fetch.await),
                };

                let Some(result) = result else {
                    tracing::error!(
                        "Listing s3://{}/{} timed out at page {} after {} objects",
                        query.bucket(),
                        query.prefix(),
                        pages + 1,
                        yielded
                    );
                    yield Err(StoreError::ListingFailed {
                        resume_token: token.clone(),
                        reason: format!(
                            "listing did not finish within {}ms",
                            call_timeout.unwrap_or_default().as_millis()
                        ),
                    });
                    return;
                };

                let page = match result {
                    Ok(page) => page,
                    Err(StoreError::Cancelled) => {
                        tracing::info!(
                            "Listing s3://{}/{} cancelled after {} objects",
                            query.bucket(),
                            query.prefix(),
                            yielded
                        );
                        yield Err(StoreError::Cancelled);
                        return;
                    }
                    Err(err) if err.is_transient() => {
                        tracing::error!(
                            "Listing s3://{}/{} failed at page {}: {}",
                            query.bucket(),
                            query.prefix(),
                            pages + 1,
                            err
                        );
                        yield Err(StoreError::ListingFailed {
                            resume_token: token.clone(),
                            reason: err.to_string(),
                        });
                        return;
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                pages += 1;
                tracing::debug!(
                    "Page {} of s3://{}/{}: {} objects, {} common prefixes, truncated: {}",
                    pages,
                    query.bucket(),
                    query.prefix(),
                    page.objects.len(),
                    page.common_prefixes.len(),
                    page.next_token.is_some()
                );
                for common_prefix in &page.common_prefixes {
                    tracing::debug!("Common prefix: {}", common_prefix);
                }

                for object in page.objects {
                    if cancel.is_cancelled() {
                        yield Err(StoreError::Cancelled);
                        return;
                    }
                    yield Ok(object);
                    yielded += 1;

                    if query.max_results() == Some(yielded) {
                        tracing::debug!("Reached max results ({}) after {} pages", yielded, pages);
                        return;
                    }
                }

                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }

            tracing::info!(
                "Listed {} objects under s3://{}/{} in {} pages",
                yielded,
                query.bucket(),
                query.prefix(),
                pages
            );
        })
    }

    /// Collect the keys of a listing, stopping at the first error.
    pub async fn list_keys(
        &self,
        query: ListingQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        self.list(query, cancel)
            .map_ok(|object| object.key)
            .try_collect()
            .await
    }

    /// List several prefixes of one bucket with at most `concurrency` listings
    /// in flight. Keys are grouped per prefix, in the order prefixes were given.
    pub async fn list_prefixes(
        &self,
        bucket: &str,
        prefixes: &[String],
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        let queries = prefixes
            .iter()
            .map(|prefix| ListingQuery::new(bucket, prefix.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let per_prefix: Vec<Vec<String>> = stream::iter(queries)
            .map(|query| self.list_keys(query, cancel.clone()))
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        Ok(per_prefix.into_iter().flatten().collect())
    }
}
