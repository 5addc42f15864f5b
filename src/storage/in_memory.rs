use super::backend::{ObjectStoreClient, ObjectStream};
use crate::types::{
    ByteRange, ListPage, ListingQuery, ObjectDescriptor, PageToken, Result, StoreError,
};
use bytes::Bytes;
use futures::stream;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Largest page the store hands out, mirroring S3's ListObjectsV2 limit
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory object store for testing/development
#[derive(Clone)]
pub struct InMemoryStorage {
    buckets: Arc<RwLock<HashMap<String, BTreeMap<String, StoredObject>>>>,
    page_size: usize,
    chunk_size: usize,
}

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectDescriptor,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Cap the number of entries returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Size of the body chunks produced by `get_object`
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn calculate_etag(data: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(data);
        format!("\"{}\"", hex::encode(hash))
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating the bucket if needed. Returns the new ETag.
    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> String {
        let etag = Self::calculate_etag(&data);

        let metadata = ObjectDescriptor {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: chrono::Utc::now(),
            etag: etag.clone(),
        };

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, metadata });

        etag
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
    }

    fn common_prefix(key: &str, prefix: &str, delimiter: Option<&str>) -> Option<String> {
        let delimiter = delimiter?;
        let rest = &key[prefix.len()..];
        rest.find(delimiter)
            .map(|idx| key[..prefix.len() + idx + delimiter.len()].to_string())
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for InMemoryStorage {
    async fn list_page(
        &self,
        query: &ListingQuery,
        token: Option<&PageToken>,
        max_keys: usize,
    ) -> Result<ListPage> {
        let buckets = self.buckets.read().await;

        let Some(objects) = buckets.get(query.bucket()) else {
            return Ok(ListPage::default());
        };

        let prefix = query.prefix();
        let limit = max_keys.clamp(1, self.page_size);
        let start = match token {
            Some(token) => Bound::Excluded(token.as_str()),
            None => Bound::Included(prefix),
        };

        let mut page = ListPage::default();
        let mut count = 0;
        let mut last_key: Option<&str> = None;

        let matching = objects
            .range::<str, _>((start, Bound::Unbounded))
            .skip_while(|(key, _)| key.as_str() < prefix)
            .take_while(|(key, _)| key.starts_with(prefix));

        for (key, obj) in matching {
            let group = Self::common_prefix(key, prefix, query.delimiter());

            // Keys folded into the prefix emitted last do not count
            if group.is_some() && page.common_prefixes.last() == group.as_ref() {
                last_key = Some(key.as_str());
                continue;
            }

            if count == limit {
                page.next_token = last_key.map(PageToken::new);
                break;
            }

            match group {
                Some(group) => page.common_prefixes.push(group),
                None => page.objects.push(obj.metadata.clone()),
            }
            count += 1;
            last_key = Some(key.as_str());
        }

        Ok(page)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor> {
        let buckets = self.buckets.read().await;

        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.metadata.clone())
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectStream, ObjectDescriptor)> {
        let buckets = self.buckets.read().await;

        let obj = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StoreError::not_found(bucket, key))?;

        let data = match range {
            Some(range) => {
                let range = range.clamp_to(obj.metadata.size)?;
                obj.data
                    .slice(range.start() as usize..=range.end() as usize)
            }
            None => obj.data.clone(),
        };

        let chunks: Vec<Result<Bytes>> = data
            .chunks(self.chunk_size)
            .map(|chunk| Ok(data.slice_ref(chunk)))
            .collect();

        Ok((Box::pin(stream::iter(chunks)), obj.metadata.clone()))
    }
}
