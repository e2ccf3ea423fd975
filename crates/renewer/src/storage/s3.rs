//! Amazon S3 backend.
//!
//! Credentials and region come from the default provider chain
//! (environment, profile, instance or task role); `storage.region` in the
//! runner configuration overrides the region.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, trace};

use super::{ObjectPage, ObjectStore};
use crate::errors::StorageError;

/// S3 object store
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from the default AWS configuration
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        debug!(region = ?config.region(), "Loaded AWS configuration");
        Self {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_bucket()) {
                    StorageError::BucketNotFound(bucket.to_string())
                } else {
                    StorageError::Listing {
                        bucket: bucket.to_string(),
                        prefix: prefix.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        let keys: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        trace!(
            bucket = %bucket,
            prefix = %prefix,
            keys = keys.len(),
            more = next_token.is_some(),
            "Listed S3 objects"
        );

        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Request {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: format!("reading body: {}", e),
            })?;

        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let len = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Request {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(bucket = %bucket, key = %key, bytes = len, "Stored S3 object");
        Ok(())
    }
}
