//! Object storage capability
//!
//! The catalog lives in a bucket of an object store. The renewer needs four
//! operations from it: list keys under a prefix one page at a time, read an
//! object, download an object to a local file, and write an object back.
//!
//! # Backends
//!
//! - [`MemoryObjectStore`]: in-process, with fault injection
//! - [`FsObjectStore`]: a local directory tree, one file per object
//! - `S3ObjectStore`: Amazon S3 (cargo feature `s3`)

mod filesystem;
mod memory;
#[cfg(feature = "s3")]
mod s3;

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use tracing::trace;

use crate::account::materializer::write_private_file;
use crate::errors::StorageError;

pub use filesystem::FsObjectStore;
pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// One page of a key listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Keys on this page, in listing order
    pub keys: Vec<String>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Object storage backend
///
/// Implementations must be thread-safe; records are renewed concurrently
/// against one shared store.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Backend name for logs (e.g. "s3", "filesystem")
    fn name(&self) -> &'static str;

    /// List one page of keys starting with `prefix`.
    ///
    /// Pass `None` for the first page and the previous page's
    /// [`ObjectPage::next_token`] afterwards.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StorageError>;

    /// Read a whole object
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace an object
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>)
        -> Result<(), StorageError>;

    /// Download an object into a new owner-only file at `path`.
    ///
    /// Fails if `path` already exists.
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StorageError> {
        let body = self.get_object(bucket, key).await?;
        let path = path.to_path_buf();
        let len = body.len();

        tokio::task::spawn_blocking({
            let path = path.clone();
            move || write_private_file(&path, &body)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        trace!(
            backend = self.name(),
            bucket = %bucket,
            key = %key,
            path = %path.display(),
            bytes = len,
            "Downloaded object"
        );

        Ok(())
    }
}
