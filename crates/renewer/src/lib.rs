//! Certkeeper renews a catalog of ACME certificates kept in object storage.
//!
//! The catalog stores one shared ACME account (`config.json`,
//! `account.key`) and, per certificate, its private key, CSR and current
//! certificate. A run rebuilds the account in a private working area so the
//! ACME client reuses it, discovers the certificates, and renews each one
//! independently.
//!
//! # Modules
//!
//! - [`orchestrator`]: one run from account load to report
//! - [`account`]: account key parsing and materialization
//! - [`catalog`]: certificate discovery
//! - [`driver`]: renewal of a single certificate
//! - [`issuance`]: the ACME client capability (`certbot`)
//! - [`storage`]: the object storage capability
//! - [`working_area`]: the per-run directory tree
//! - [`report`]: the per-run outcome report

pub mod account;
pub mod catalog;
pub mod driver;
pub mod errors;
pub mod expiry;
pub mod issuance;
pub mod orchestrator;
pub mod report;
pub mod storage;
pub mod working_area;

pub use account::{AccountIdentity, AccountKey, AccountMaterializer, Jwk};
pub use driver::{CertificateRecord, RecordState, RenewalDriver, Renewed};
pub use errors::{
    BootstrapError, ConfigurationError, IssuanceError, RenewalError, ResourceError, StorageError,
};
pub use issuance::{CertbotIssuer, ChallengeType, IssuanceRequest, Issuer};
pub use orchestrator::{LoadedAccount, Orchestrator, RunOptions};
pub use report::{RecordOutcome, RecordReport, RunReport, Summary};
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectPage, ObjectStore};
#[cfg(feature = "s3")]
pub use storage::S3ObjectStore;
pub use working_area::WorkingArea;

pub use certkeeper_common::{CatalogLayout, CertificateId, RunId};
pub use certkeeper_config::{AccountConfig, RunnerConfig};
