use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{ObjectPage, ObjectStore};
use crate::errors::StorageError;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-process object store.
///
/// Keys list in lexicographic order, `page_size` at a time. Failures can be
/// injected per object and per listing page to exercise error paths.
#[derive(Debug)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    page_size: usize,
    failing_keys: RwLock<HashSet<String>>,
    failing_pages: RwLock<HashSet<usize>>,
    requests: RwLock<Vec<String>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Store that splits listings into pages of at most `page_size` keys
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            failing_keys: RwLock::new(HashSet::new()),
            failing_pages: RwLock::new(HashSet::new()),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Create an empty bucket
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating the bucket if needed
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// Current contents of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.read().get(bucket)?.get(key).cloned()
    }

    /// Make every read and write of `key` fail
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Make the listing page with this zero-based index fail
    pub fn fail_listing_page(&self, page: usize) {
        self.failing_pages.write().insert(page);
    }

    /// Keys read or written so far, in request order
    pub fn requests(&self) -> Vec<String> {
        self.requests.read().clone()
    }

    fn check_key(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.requests.write().push(key.to_string());

        if self.failing_keys.read().contains(key) {
            return Err(StorageError::Request {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StorageError> {
        let listing_error = |message: String| StorageError::Listing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            message,
        };

        let offset = match &continuation {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| listing_error(format!("invalid continuation token '{}'", token)))?,
        };

        let page_index = offset / self.page_size;
        if self.failing_pages.read().contains(&page_index) {
            return Err(listing_error(format!("injected failure on page {}", page_index)));
        }

        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let matching: Vec<&String> = objects.keys().filter(|k| k.starts_with(prefix)).collect();
        let keys: Vec<String> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|k| (*k).clone())
            .collect();

        let end = offset + keys.len();
        let next_token = (end < matching.len()).then(|| end.to_string());

        trace!(
            bucket = %bucket,
            prefix = %prefix,
            page = page_index,
            keys = keys.len(),
            more = next_token.is_some(),
            "Listed memory objects"
        );

        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_key(bucket, key)?;

        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.check_key(bucket, key)?;

        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }
}
