use crate::types::{ByteRange, ListPage, ListingQuery, ObjectDescriptor, PageToken, Result};
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;

/// Stream of object body chunks as delivered by the store
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Object store client capability - implement this for different stores
///
/// Authentication, request signing and transport live behind this trait.
/// Implementations are shared read-only across concurrent calls.
#[async_trait::async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch one listing page. A missing bucket yields an empty page.
    async fn list_page(
        &self,
        query: &ListingQuery,
        token: Option<&PageToken>,
        max_keys: usize,
    ) -> Result<ListPage>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor>;

    /// Open a body stream. The returned descriptor reflects the object the
    /// stream is served from.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectStream, ObjectDescriptor)>;
}
