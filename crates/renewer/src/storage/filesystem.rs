use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{ObjectPage, ObjectStore};
use crate::errors::StorageError;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Object store backed by a local directory tree.
///
/// The object `<key>` of bucket `<bucket>` is the file
/// `<root>/<bucket>/<key>`; `/` in keys maps to directories. Listings are
/// lexicographic and continue after the last key of the previous page.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_segment(bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let dir = self.root.join(bucket);
        if !dir.is_dir() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(dir)
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        if key.is_empty() || !key.split('/').all(is_safe_segment) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(dir.join(key))
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}

fn collect_keys(dir: &Path, relative: &str, keys: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let key = if relative.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", relative, name)
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_keys(&entry.path(), &key, keys)?;
        } else if file_type.is_file() {
            keys.push(key);
        }
    }
    Ok(())
}

fn map_read_error(bucket: &str, key: &str, e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => StorageError::Request {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        },
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        let page_size = self.page_size;
        let prefix_owned = prefix.to_string();

        let page = tokio::task::spawn_blocking(move || -> io::Result<ObjectPage> {
            let mut keys = Vec::new();
            collect_keys(&dir, "", &mut keys)?;
            keys.sort();

            let mut matching = keys.into_iter().filter(|k| k.starts_with(&prefix_owned));
            let page: Vec<String> = match &continuation {
                Some(after) => matching
                    .by_ref()
                    .skip_while(|k| k <= after)
                    .take(page_size)
                    .collect(),
                None => matching.by_ref().take(page_size).collect(),
            };

            let more = matching.next().is_some();
            let next_token = if more { page.last().cloned() } else { None };
            Ok(ObjectPage {
                keys: page,
                next_token,
            })
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))?
        .map_err(|e| StorageError::Listing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            message: e.to_string(),
        })?;

        trace!(
            bucket = %bucket,
            prefix = %prefix,
            keys = page.keys.len(),
            more = page.next_token.is_some(),
            "Listed filesystem objects"
        );

        Ok(page)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_read_error(bucket, key, e))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        let request_error = |e: io::Error| StorageError::Request {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(request_error)?;
        }

        // Readers never observe a partially written object
        let temp = path.with_file_name(format!(
            ".{}.{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            Uuid::new_v4()
        ));
        tokio::fs::write(&temp, &body).await.map_err(request_error)?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(request_error(e));
        }

        debug!(bucket = %bucket, key = %key, bytes = body.len(), "Stored filesystem object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded(keys: &[&str]) -> (TempDir, FsObjectStore) {
        let root = TempDir::new().unwrap();
        for key in keys {
            let path = root.path().join("bucket").join(key);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, key.as_bytes()).unwrap();
        }
        fs::create_dir_all(root.path().join("bucket")).unwrap();
        let store = FsObjectStore::new(root.path());
        (root, store)
    }

    #[tokio::test]
    async fn test_list_is_lexicographic() {
        let (_root, store) = seeded(&["certs/b/cert", "certs/a/key", "certs/a/cert", "top"]);

        let page = store.list_objects("bucket", "certs/", None).await.unwrap();
        assert_eq!(page.keys, vec!["certs/a/cert", "certs/a/key", "certs/b/cert"]);
        assert_eq!(page.next_token, None);
    }

    #[tokio::test]
    async fn test_list_continues_after_token() {
        let (_root, store) = seeded(&["p/a", "p/b", "p/c", "p/d", "p/e"]);
        let store = store.with_page_size(2);

        let mut all = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = store.list_objects("bucket", "p/", token).await.unwrap();
            pages += 1;
            all.extend(page.keys);
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(all, vec!["p/a", "p/b", "p/c", "p/d", "p/e"]);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (_root, store) = seeded(&["p/a"]);

        let err = store.get_object("bucket", "p/z").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));

        let err = store.get_object("missing", "p/a").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_root, store) = seeded(&["p/a"]);

        let err = store.get_object("bucket", "../outside").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let err = store
            .put_object("bucket", "p//a", b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_put_creates_and_replaces() {
        let (root, store) = seeded(&["p/a/cert"]);

        store
            .put_object("bucket", "p/a/cert", b"new".to_vec())
            .await
            .unwrap();
        store
            .put_object("bucket", "p/b/cert", b"fresh".to_vec())
            .await
            .unwrap();

        assert_eq!(fs::read(root.path().join("bucket/p/a/cert")).unwrap(), b"new");
        assert_eq!(store.get_object("bucket", "p/b/cert").await.unwrap(), b"fresh");

        // No temporary files left behind
        let page = store.list_objects("bucket", "p/", None).await.unwrap();
        assert_eq!(page.keys, vec!["p/a/cert", "p/b/cert"]);
    }
}
