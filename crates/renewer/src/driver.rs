//! Renewal driver
//!
//! Renews one certificate: stage its key and CSR from the catalog into a
//! private directory, run the issuer against the shared account, and
//! publish the result back to the catalog.
//!
//! A record moves through
//!
//! ```text
//! Pending -> Staged -> Issuing -> Issued
//!    |         |          |
//!    +---------+----------+-----> Failed
//! ```
//!
//! plus `Current` straight from `Pending` when an expiry window is
//! configured and the stored certificate is not yet due.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};

use certkeeper_common::{CatalogLayout, CertificateId, CertificateObject};
use certkeeper_config::AccountConfig;

use crate::errors::{RenewalError, StorageError};
use crate::expiry;
use crate::issuance::{ChallengeType, IssuanceRequest, Issuer};
use crate::storage::ObjectStore;
use crate::working_area::WorkingArea;

const CHAIN_FILE: &str = "chain";
const FULLCHAIN_FILE: &str = "fullchain";

/// Lifecycle state of one record within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Staged,
    Issuing,
    Issued,
    Current,
    Failed,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Staged => "staged",
            Self::Issuing => "issuing",
            Self::Issued => "issued",
            Self::Current => "current",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Local files of one certificate inside the working area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub identifier: CertificateId,
    pub key_path: PathBuf,
    pub csr_path: PathBuf,
    pub cert_path: PathBuf,
    pub chain_path: PathBuf,
    pub fullchain_path: PathBuf,
}

impl CertificateRecord {
    /// Paths for `identifier` under the working area (nothing is created)
    pub fn new(identifier: CertificateId, area: &WorkingArea) -> Self {
        let dir = area.certificate_dir(&identifier);
        Self {
            key_path: dir.join(CertificateObject::Key.name()),
            csr_path: dir.join(CertificateObject::Csr.name()),
            cert_path: dir.join(CertificateObject::Cert.name()),
            chain_path: dir.join(CHAIN_FILE),
            fullchain_path: dir.join(FULLCHAIN_FILE),
            identifier,
        }
    }
}

/// Successful end states of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renewed {
    /// A new certificate was issued
    Issued {
        /// Uploaded back to the catalog
        published: bool,
        /// Expiry of the new leaf, when it could be read
        not_after: Option<DateTime<Utc>>,
    },
    /// The stored certificate is outside the renewal window
    Current { not_after: DateTime<Utc> },
}

/// Renews records of one catalog under one account.
///
/// Holds only shared, read-only state; one driver serves every record of
/// a run concurrently.
#[derive(Debug, Clone)]
pub struct RenewalDriver {
    store: Arc<dyn ObjectStore>,
    issuer: Arc<dyn Issuer>,
    account: Arc<AccountConfig>,
    bucket: String,
    layout: CatalogLayout,
    publish: bool,
    renew_before_days: Option<u32>,
}

impl RenewalDriver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        issuer: Arc<dyn Issuer>,
        account: Arc<AccountConfig>,
        bucket: impl Into<String>,
        layout: CatalogLayout,
    ) -> Self {
        Self {
            store,
            issuer,
            account,
            bucket: bucket.into(),
            layout,
            publish: true,
            renew_before_days: None,
        }
    }

    /// Upload issued certificates to `<prefix>/<identifier>/cert`
    pub fn publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    /// Leave certificates alone that expire more than `days` from now
    pub fn renew_before_days(mut self, days: Option<u32>) -> Self {
        self.renew_before_days = days;
        self
    }

    /// Renew one certificate.
    ///
    /// Failures are confined to this record.
    pub async fn renew(
        &self,
        identifier: &CertificateId,
        area: &WorkingArea,
    ) -> Result<Renewed, RenewalError> {
        trace!(identifier = %identifier, state = %RecordState::Pending, "Record state");

        if let Some(not_after) = self.current_expiry(identifier).await {
            info!(
                identifier = %identifier,
                state = %RecordState::Current,
                not_after = %not_after,
                "Certificate outside renewal window"
            );
            return Ok(Renewed::Current { not_after });
        }

        let record = self.stage(identifier, area).await?;
        debug!(identifier = %identifier, state = %RecordState::Staged, "Record state");

        let request = self.request(&record, area);
        debug!(
            identifier = %identifier,
            state = %RecordState::Issuing,
            issuer = self.issuer.name(),
            "Record state"
        );
        self.issuer.issue(&request).await?;

        let chain = issued_chain(&record).await;
        let not_after = chain
            .as_ref()
            .ok()
            .and_then(|pem| expiry::not_after(pem).ok());

        let published = if self.publish {
            let chain = chain.map_err(|e| RenewalError::Publish(StorageError::Io(e)))?;
            let key = self.layout.certificate_key(identifier, CertificateObject::Cert);
            self.store
                .put_object(&self.bucket, &key, chain)
                .await
                .map_err(RenewalError::Publish)?;
            debug!(identifier = %identifier, key = %key, "Published certificate");
            true
        } else {
            false
        };

        info!(
            identifier = %identifier,
            state = %RecordState::Issued,
            published = published,
            not_after = ?not_after,
            "Certificate issued"
        );

        Ok(Renewed::Issued {
            published,
            not_after,
        })
    }

    /// Expiry of the stored certificate, if it is outside the window
    async fn current_expiry(&self, identifier: &CertificateId) -> Option<DateTime<Utc>> {
        let window = self.renew_before_days?;
        let key = self.layout.certificate_key(identifier, CertificateObject::Cert);

        let pem = match self.store.get_object(&self.bucket, &key).await {
            Ok(pem) => pem,
            Err(e) => {
                debug!(identifier = %identifier, error = %e, "Stored certificate unreadable, renewing");
                return None;
            }
        };

        match expiry::not_after(&pem) {
            Ok(not_after) if expiry::is_current(not_after, Utc::now(), window) => Some(not_after),
            Ok(not_after) => {
                debug!(identifier = %identifier, not_after = %not_after, "Certificate due for renewal");
                None
            }
            Err(reason) => {
                debug!(identifier = %identifier, reason = %reason, "Stored certificate unparseable, renewing");
                None
            }
        }
    }

    async fn stage(
        &self,
        identifier: &CertificateId,
        area: &WorkingArea,
    ) -> Result<CertificateRecord, RenewalError> {
        area.scope(identifier)?;
        let record = CertificateRecord::new(identifier.clone(), area);

        for (object, path) in [
            (CertificateObject::Key, &record.key_path),
            (CertificateObject::Csr, &record.csr_path),
        ] {
            let key = self.layout.certificate_key(identifier, object);
            self.store
                .download_to_file(&self.bucket, &key, path)
                .await?;
        }

        Ok(record)
    }

    fn request(&self, record: &CertificateRecord, area: &WorkingArea) -> IssuanceRequest {
        IssuanceRequest {
            non_interactive: true,
            agree_tos: true,
            config_dir: area.config_dir(),
            work_dir: area.work_dir(),
            logs_dir: area.logs_dir(),
            contact_email: self.account.contact_email().to_string(),
            directory_url: self.account.directory_url().clone(),
            challenge: ChallengeType::Dns01,
            csr_path: record.csr_path.clone(),
            key_path: record.key_path.clone(),
            cert_path: record.cert_path.clone(),
            chain_path: record.chain_path.clone(),
            fullchain_path: record.fullchain_path.clone(),
        }
    }
}

/// Full chain if the issuer wrote one, otherwise the leaf
async fn issued_chain(record: &CertificateRecord) -> std::io::Result<Vec<u8>> {
    match tokio::fs::read(&record.fullchain_path).await {
        Ok(chain) if !chain.is_empty() => Ok(chain),
        _ => tokio::fs::read(&record.cert_path).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IssuanceError;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use certkeeper_common::RunId;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    const ALPHA_KEY: &str = include_str!("../tests/fixtures/alpha-key.pem");
    const ALPHA_CSR: &str = include_str!("../tests/fixtures/alpha-csr.pem");
    const ALPHA_CERT: &str = include_str!("../tests/fixtures/alpha-cert.pem");

    /// Writes the fixture certificate, or fails when told to
    #[derive(Debug, Default)]
    struct StubIssuer {
        fail: bool,
        requests: Mutex<Vec<IssuanceRequest>>,
    }

    #[async_trait]
    impl Issuer for StubIssuer {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn issue(&self, request: &IssuanceRequest) -> Result<(), IssuanceError> {
            self.requests.lock().push(request.clone());
            if self.fail {
                return Err(IssuanceError::Rejected("rateLimited".to_string()));
            }
            assert_eq!(std::fs::read_to_string(&request.csr_path).unwrap(), ALPHA_CSR);
            std::fs::write(&request.cert_path, ALPHA_CERT).unwrap();
            std::fs::write(&request.fullchain_path, format!("{}{}", ALPHA_CERT, ALPHA_CERT)).unwrap();
            Ok(())
        }
    }

    struct Fixture {
        _parent: TempDir,
        area: WorkingArea,
        store: Arc<MemoryObjectStore>,
        issuer: Arc<StubIssuer>,
    }

    impl Fixture {
        fn new(issuer: StubIssuer) -> Self {
            let parent = TempDir::new().unwrap();
            let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();
            let store = Arc::new(MemoryObjectStore::new());
            store.insert("bucket", "certs/alpha/key", ALPHA_KEY);
            store.insert("bucket", "certs/alpha/csr", ALPHA_CSR);
            store.insert("bucket", "certs/alpha/cert", ALPHA_CERT);
            Self {
                _parent: parent,
                area,
                store,
                issuer: Arc::new(issuer),
            }
        }

        fn driver(&self) -> RenewalDriver {
            let account = AccountConfig::new("https://ca.example/dir", "ops@example.com", "acct-123")
                .unwrap();
            RenewalDriver::new(
                self.store.clone(),
                self.issuer.clone(),
                Arc::new(account),
                "bucket",
                CatalogLayout::new("certs"),
            )
        }
    }

    fn alpha() -> CertificateId {
        CertificateId::new("alpha").unwrap()
    }

    #[tokio::test]
    async fn test_issues_and_publishes_full_chain() {
        let fixture = Fixture::new(StubIssuer::default());

        let renewed = fixture.driver().renew(&alpha(), &fixture.area).await.unwrap();

        match renewed {
            Renewed::Issued { published, not_after } => {
                assert!(published);
                assert!(not_after.is_some());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let requests = fixture.issuer.requests.lock();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.challenge, ChallengeType::Dns01);
        assert_eq!(request.contact_email, "ops@example.com");
        assert_eq!(request.directory_url.as_str(), "https://ca.example/dir");
        assert_eq!(request.config_dir, fixture.area.config_dir());
        assert_eq!(request.key_path, fixture.area.certificate_dir(&alpha()).join("key"));
        assert!(request.non_interactive && request.agree_tos);

        let stored = fixture.store.object("bucket", "certs/alpha/cert").unwrap();
        assert_eq!(stored, format!("{}{}", ALPHA_CERT, ALPHA_CERT).into_bytes());
    }

    #[tokio::test]
    async fn test_publish_disabled_leaves_catalog_alone() {
        let fixture = Fixture::new(StubIssuer::default());

        let renewed = fixture
            .driver()
            .publish(false)
            .renew(&alpha(), &fixture.area)
            .await
            .unwrap();

        assert!(matches!(renewed, Renewed::Issued { published: false, .. }));
        assert!(!fixture.store.requests().iter().any(|k| k == "certs/alpha/cert"));
    }

    #[tokio::test]
    async fn test_missing_csr_skips_issuance() {
        let fixture = Fixture::new(StubIssuer::default());
        fixture.store.fail_key("certs/alpha/csr");

        let err = fixture.driver().renew(&alpha(), &fixture.area).await.unwrap_err();

        assert!(matches!(err, RenewalError::Storage(_)));
        assert!(fixture.issuer.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_issuer_failure() {
        let fixture = Fixture::new(StubIssuer {
            fail: true,
            ..StubIssuer::default()
        });

        let err = fixture.driver().renew(&alpha(), &fixture.area).await.unwrap_err();
        assert!(matches!(err, RenewalError::Issuance(IssuanceError::Rejected(_))));
        assert_eq!(err.kind(), "issuance");
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let fixture = Fixture::new(StubIssuer::default());
        fixture.store.fail_key("certs/alpha/cert");

        let err = fixture.driver().renew(&alpha(), &fixture.area).await.unwrap_err();
        assert!(matches!(err, RenewalError::Publish(_)));
    }

    #[tokio::test]
    async fn test_current_certificate_is_left_alone() {
        let fixture = Fixture::new(StubIssuer::default());

        let renewed = fixture
            .driver()
            .renew_before_days(Some(365))
            .renew(&alpha(), &fixture.area)
            .await
            .unwrap();

        assert!(matches!(renewed, Renewed::Current { .. }));
        assert!(fixture.issuer.requests.lock().is_empty());
        assert!(!fixture.area.certificate_dir(&alpha()).exists());
    }

    #[tokio::test]
    async fn test_due_certificate_is_renewed() {
        let fixture = Fixture::new(StubIssuer::default());

        let renewed = fixture
            .driver()
            .renew_before_days(Some(36500))
            .renew(&alpha(), &fixture.area)
            .await
            .unwrap();

        assert!(matches!(renewed, Renewed::Issued { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_stored_certificate_is_renewed() {
        let fixture = Fixture::new(StubIssuer::default());
        fixture.store.insert("bucket", "certs/alpha/cert", "placeholder");

        let renewed = fixture
            .driver()
            .renew_before_days(Some(21))
            .renew(&alpha(), &fixture.area)
            .await
            .unwrap();

        assert!(matches!(renewed, Renewed::Issued { .. }));
    }
}
