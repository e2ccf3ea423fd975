//! Configuration for the Certkeeper renewal runner.
//!
//! Two documents are loaded per run:
//!
//! - [`AccountConfig`]: the catalog's stored `config.json`, describing the
//!   ACME account every certificate is renewed under
//! - [`RunnerConfig`]: the runner's own TOML file (storage backend, working
//!   area, deadlines, certbot invocation, logging)

pub mod account;
pub mod runner;
pub mod validate;

use std::path::PathBuf;

use thiserror::Error;

pub use account::AccountConfig;
pub use runner::{
    CatalogConfig, CertbotConfig, LogFormat, LoggingConfig, RenewalConfig, RunnerConfig,
    StorageBackend, StorageConfig, WorkingAreaConfig,
};
pub use validate::{validate_config, ValidationResult};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration syntax: {0}")]
    Parse(String),

    #[error("invalid account configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("invalid CA directory URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("CA directory URL '{0}' has no host")]
    UrlWithoutHost(String),

    #[error("invalid contact email '{0}'")]
    InvalidEmail(String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
