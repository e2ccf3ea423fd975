//! Runner configuration.
//!
//! Everything that tunes a renewal run but is not part of the catalog
//! itself. Loaded from an optional TOML file; every field has a default so
//! an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [catalog]
//! bucket = "example-ca"
//! prefix = "letsencrypt/live"
//!
//! [storage]
//! backend = "s3"
//!
//! [working_area]
//! retain = false
//!
//! [renewal]
//! concurrency = 2
//! record_timeout_secs = 600
//! run_timeout_secs = 840
//! publish = true
//! renew_before_days = 21
//!
//! [certbot]
//! binary = "certbot"
//! dns_plugin = "dns-route53"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use crate::ConfigError;

/// Top-level runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Catalog location; usually supplied on the command line instead
    #[serde(default)]
    #[validate(nested)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub working_area: WorkingAreaConfig,

    #[serde(default)]
    #[validate(nested)]
    pub renewal: RenewalConfig,

    #[serde(default)]
    #[validate(nested)]
    pub certbot: CertbotConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RunnerConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml(&content)?;

        info!(path = %path.display(), "Loaded runner configuration");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate_all()?;

        debug!(
            backend = ?config.storage.backend,
            concurrency = config.renewal.concurrency,
            publish = config.renewal.publish,
            "Parsed runner configuration"
        );

        Ok(config)
    }

    /// Field-level and cross-field validation
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.storage.backend == StorageBackend::Filesystem && self.storage.root.is_none() {
            return Err(ConfigError::Validation(
                "storage.root is required for the filesystem backend".to_string(),
            ));
        }

        if self.renewal.record_timeout_secs > self.renewal.run_timeout_secs {
            return Err(ConfigError::Validation(format!(
                "renewal.record_timeout_secs ({}) exceeds renewal.run_timeout_secs ({})",
                self.renewal.record_timeout_secs, self.renewal.run_timeout_secs
            )));
        }

        Ok(())
    }
}

/// Where the catalog lives
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Bucket holding the catalog
    #[validate(length(min = 1))]
    pub bucket: Option<String>,

    /// Key prefix of the catalog inside the bucket
    pub prefix: Option<String>,
}

/// Object storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 (requires the `s3` feature)
    #[default]
    S3,
    /// Local directory tree: `<root>/<bucket>/<key>`
    Filesystem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the filesystem backend
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Region override for the S3 backend
    #[serde(default)]
    #[validate(length(min = 1))]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkingAreaConfig {
    /// Directory the per-run working area is created in (system temp dir if unset)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Keep the working area after the run for post-mortem log inspection
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RenewalConfig {
    /// Certificates in flight at the same time. Staging and publishing
    /// overlap; certbot itself runs one certificate at a time.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,

    /// Deadline for a single certificate, staging through issuance
    #[serde(default = "default_record_timeout_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub record_timeout_secs: u64,

    /// Deadline for one run, from loading the account to the last certificate
    #[serde(default = "default_run_timeout_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub run_timeout_secs: u64,

    /// Upload issued certificates back to `<prefix>/<identifier>/cert`
    #[serde(default = "default_publish")]
    pub publish: bool,

    /// Skip certificates valid for longer than this many days (always renew if unset)
    #[serde(default)]
    #[validate(range(min = 1, max = 365))]
    pub renew_before_days: Option<u32>,

    /// Opaque label recorded as the account's creation host
    #[serde(default = "default_creation_host")]
    #[validate(length(min = 1))]
    pub creation_host: String,
}

fn default_concurrency() -> usize { 1 }
fn default_record_timeout_secs() -> u64 { 600 }
fn default_run_timeout_secs() -> u64 { 840 }
fn default_publish() -> bool { true }
fn default_creation_host() -> String { "certkeeper".to_string() }

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            record_timeout_secs: default_record_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            publish: default_publish(),
            renew_before_days: None,
            creation_host: default_creation_host(),
        }
    }
}

impl RenewalConfig {
    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CertbotConfig {
    /// certbot executable (looked up on PATH unless absolute)
    #[serde(default = "default_certbot_binary")]
    pub binary: PathBuf,

    /// DNS plugin used for DNS-01, passed as `--<dns_plugin>`
    #[serde(default = "default_dns_plugin")]
    #[validate(length(min = 1))]
    pub dns_plugin: String,

    /// Additional arguments appended to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_certbot_binary() -> PathBuf { PathBuf::from("certbot") }
fn default_dns_plugin() -> String { "dns-route53".to_string() }

impl Default for CertbotConfig {
    fn default() -> Self {
        Self {
            binary: default_certbot_binary(),
            dns_plugin: default_dns_plugin(),
            extra_args: Vec::new(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RunnerConfig::from_toml("").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.renewal.concurrency, 1);
        assert!(config.renewal.publish);
        assert_eq!(config.renewal.renew_before_days, None);
        assert_eq!(config.certbot.dns_plugin, "dns-route53");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(!config.working_area.retain);
    }

    #[test]
    fn test_full_config() {
        let config = RunnerConfig::from_toml(
            r#"
            [catalog]
            bucket = "example-ca"
            prefix = "letsencrypt/live"

            [storage]
            backend = "filesystem"
            root = "/srv/catalog"

            [working_area]
            root = "/var/tmp"
            retain = true

            [renewal]
            concurrency = 4
            record_timeout_secs = 300
            run_timeout_secs = 900
            publish = false
            renew_before_days = 21

            [certbot]
            binary = "/usr/local/bin/certbot"
            dns_plugin = "dns-cloudflare"
            extra_args = ["--dns-cloudflare-propagation-seconds", "30"]

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.bucket.as_deref(), Some("example-ca"));
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.renewal.record_timeout(), Duration::from_secs(300));
        assert_eq!(config.renewal.renew_before_days, Some(21));
        assert_eq!(config.certbot.extra_args.len(), 2);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_filesystem_backend_requires_root() {
        let err = RunnerConfig::from_toml("[storage]\nbackend = \"filesystem\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_concurrency_range() {
        let err = RunnerConfig::from_toml("[renewal]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_record_timeout_within_run_timeout() {
        let err = RunnerConfig::from_toml(
            "[renewal]\nrecord_timeout_secs = 1000\nrun_timeout_secs = 10\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_timeouts_are_bounded() {
        let err = RunnerConfig::from_toml("[renewal]\nrun_timeout_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = RunnerConfig::from_toml(
            "[renewal]\nrecord_timeout_secs = 86401\nrun_timeout_secs = 86400\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let config = RunnerConfig::from_toml(
            "[renewal]\nrecord_timeout_secs = 86400\nrun_timeout_secs = 86400\n",
        )
        .unwrap();
        assert_eq!(config.renewal.run_timeout(), Duration::from_secs(86400));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RunnerConfig::from_toml("[renewal]\nconcurency = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[renewal]\nconcurrency = 2").unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.renewal.concurrency, 2);
    }

    #[test]
    fn test_missing_file() {
        let err = RunnerConfig::from_file("/nonexistent/certkeeper.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
