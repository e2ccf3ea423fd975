//! Catalog discovery
//!
//! A certificate is under management when its `<prefix>/<identifier>/cert`
//! object exists. Discovery lists the catalog prefix across all pages and
//! recovers identifiers from those marker keys.

use std::time::Instant;

use tracing::{debug, info, warn};

use certkeeper_common::{CatalogLayout, CertificateId, KeyMatch};

use crate::errors::StorageError;
use crate::storage::ObjectStore;

/// List the identifiers of every certificate in the catalog, in listing order.
///
/// An empty catalog yields an empty list. Markers whose identifier is not a
/// safe path segment are skipped with a warning.
///
/// # Errors
///
/// Any failing page fails the whole discovery; identifiers from earlier
/// pages are discarded.
pub async fn discover(
    store: &dyn ObjectStore,
    bucket: &str,
    layout: &CatalogLayout,
) -> Result<Vec<CertificateId>, StorageError> {
    let started = Instant::now();
    let prefix = layout.listing_prefix();

    let mut identifiers = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0usize;
    let mut scanned = 0usize;

    loop {
        let page = store
            .list_objects(bucket, &prefix, continuation.clone())
            .await?;
        pages += 1;
        scanned += page.keys.len();

        for key in &page.keys {
            match layout.match_key(key) {
                KeyMatch::Certificate(id) => {
                    debug!(identifier = %id, key = %key, "Discovered certificate");
                    identifiers.push(id);
                }
                KeyMatch::NotMarker => {}
                KeyMatch::Invalid { key, reason } => {
                    warn!(key = %key, reason = %reason, "Skipping certificate with unusable identifier");
                }
            }
        }

        match page.next_token {
            Some(token) if continuation.as_deref() == Some(token.as_str()) => {
                return Err(StorageError::Listing {
                    bucket: bucket.to_string(),
                    prefix,
                    message: format!("listing did not advance past token '{}'", token),
                });
            }
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    info!(
        bucket = %bucket,
        prefix = %prefix,
        certificates = identifiers.len(),
        keys_scanned = scanned,
        pages = pages,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Discovered catalog"
    );

    Ok(identifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use std::collections::BTreeSet;

    fn ids(identifiers: &[CertificateId]) -> Vec<&str> {
        identifiers.iter().map(|id| id.as_str()).collect()
    }

    fn seeded(page_size: usize, keys: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::with_page_size(page_size);
        store.create_bucket("bucket");
        for key in keys {
            store.insert("bucket", key, Vec::new());
        }
        store
    }

    #[tokio::test]
    async fn test_only_cert_markers_count() {
        let store = seeded(
            100,
            &["certs/a/cert", "certs/a/key", "certs/b/cert", "certs/c/other"],
        );

        let found = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_paginated_listing_matches_single_page() {
        let keys: Vec<String> = (0..9)
            .flat_map(|i| {
                [
                    format!("certs/host{}/cert", i),
                    format!("certs/host{}/csr", i),
                    format!("certs/host{}/key", i),
                ]
            })
            .collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let layout = CatalogLayout::new("certs");

        // 27 keys in pages of 9
        let paged = seeded(9, &keys);
        let single = seeded(1000, &keys);

        let from_pages: BTreeSet<_> = discover(&paged, "bucket", &layout)
            .await
            .unwrap()
            .into_iter()
            .collect();
        let from_single: BTreeSet<_> = discover(&single, "bucket", &layout)
            .await
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(from_pages.len(), 9);
        assert_eq!(from_pages, from_single);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let store = seeded(10, &["elsewhere/a/cert"]);

        let found = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_failed_page_discards_everything() {
        let store = seeded(2, &["certs/a/cert", "certs/b/cert", "certs/c/cert"]);
        store.fail_listing_page(1);

        let err = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Listing { .. }));
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let store = MemoryObjectStore::new();

        let err = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn test_skips_nested_and_sibling_objects() {
        let store = seeded(
            10,
            &[
                "certs/ca.cert",
                "certs/config.json",
                "certs/deep/nested/cert",
                "certs/ok/cert",
                "certsextra/x/cert",
            ],
        );

        let found = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_skips_unusable_identifiers() {
        let store = seeded(10, &["certs/../cert", "certs/bad id/cert", "certs/good/cert"]);

        let found = discover(&store, "bucket", &CatalogLayout::new("certs"))
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["good"]);
    }

    #[tokio::test]
    async fn test_bucket_root_catalog() {
        let store = seeded(10, &["a/cert", "b/key"]);

        let found = discover(&store, "bucket", &CatalogLayout::new(""))
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["a"]);
    }
}
