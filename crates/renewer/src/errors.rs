//! Renewal error types
//!
//! Errors split along how far they reach:
//!
//! - [`BootstrapError`] aborts the whole run before any certificate is touched
//! - [`RenewalError`] is attributed to a single certificate and never stops its siblings

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use certkeeper_config::ConfigError;

/// Errors from the object storage capability
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket does not exist or is not accessible
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Listing a page of keys failed
    #[error("failed to list s3://{bucket}/{prefix}: {message}")]
    Listing {
        bucket: String,
        prefix: String,
        message: String,
    },

    /// Key cannot be represented by this backend
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    /// Backend-specific request failure (network, permissions, throttling)
    #[error("storage request failed for s3://{bucket}/{key}: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
    },

    /// IO error while writing a download or reading a local object
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Local filesystem allocation failures
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Directory could not be created
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory already exists where a fresh one was required
    #[error("directory already exists: {path:?}")]
    Collision { path: PathBuf },

    /// File could not be written
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Staged directory could not be moved into place
    #[error("failed to move {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory could not be removed
    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Malformed or missing account configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The stored configuration document is unusable
    #[error(transparent)]
    Document(#[from] ConfigError),

    /// The stored account key cannot be parsed
    #[error("invalid account key: {0}")]
    InvalidKey(String),

    /// The account key parses but its algorithm cannot be exported
    #[error("unsupported account key: {0}")]
    UnsupportedKey(String),
}

/// Errors from the ACME issuance capability
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// The ACME client could not be started
    #[error("failed to start ACME client {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The ACME client reported failure
    #[error("ACME client exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    /// The ACME client reported success but produced no certificate
    #[error("ACME client produced no certificate at {0:?}")]
    MissingCertificate(PathBuf),

    /// Issuance refused by the CA or client (used by non-process issuers)
    #[error("issuance rejected: {0}")]
    Rejected(String),
}

/// Failure of a single certificate's renewal
#[derive(Debug, Error)]
pub enum RenewalError {
    /// Staging key or CSR failed
    #[error("staging failed: {0}")]
    Storage(#[from] StorageError),

    /// Working directory for the certificate could not be created
    #[error("working directory unavailable: {0}")]
    Resource(#[from] ResourceError),

    /// The ACME call failed
    #[error("issuance failed: {0}")]
    Issuance(#[from] IssuanceError),

    /// Issued certificate could not be uploaded
    #[error("publishing issued certificate failed: {0}")]
    Publish(#[source] StorageError),

    /// The certificate's own deadline passed
    #[error("renewal timed out after {0:?}")]
    Timeout(Duration),

    /// The run deadline passed before the certificate finished
    #[error("run deadline of {0:?} reached before renewal finished")]
    RunDeadline(Duration),
}

impl RenewalError {
    /// Short, stable name of the failure class for reports and alerting
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Resource(_) => "resource",
            Self::Issuance(_) => "issuance",
            Self::Publish(_) => "publish",
            Self::Timeout(_) => "timeout",
            Self::RunDeadline(_) => "run_deadline",
        }
    }
}

/// Fatal errors; no certificate is renewed
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// The run deadline passed before the first certificate was attempted
    #[error("run deadline of {0:?} reached during startup")]
    Deadline(Duration),
}

impl From<ConfigError> for BootstrapError {
    fn from(e: ConfigError) -> Self {
        BootstrapError::Configuration(ConfigurationError::Document(e))
    }
}
