//! Renewal orchestrator
//!
//! One run, start to finish:
//!
//! 1. Load `config.json` and `account.key` from the catalog
//! 2. Allocate the working area and materialize the account into it
//! 3. Discover the catalog's certificates
//! 4. Renew each certificate under a per-record deadline
//! 5. Dispose of the working area and return the report
//!
//! The per-run deadline starts before step 1 and covers every step.
//!
//! Steps 1 to 3 are bootstrap: any failure there aborts the run with a
//! [`BootstrapError`] and no record is attempted. From step 4 on, failures
//! belong to individual records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, info_span, warn, Instrument};

use certkeeper_common::{CatalogLayout, CertificateId, RunId};
use certkeeper_config::{AccountConfig, RunnerConfig};

use crate::account::{AccountIdentity, AccountKey, AccountMaterializer};
use crate::catalog;
use crate::driver::RenewalDriver;
use crate::errors::{BootstrapError, RenewalError};
use crate::issuance::Issuer;
use crate::report::{AccountSummary, RecordOutcome, RecordReport, RunReport};
use crate::storage::ObjectStore;
use crate::working_area::WorkingArea;

/// Stand-in deadline when the configured one is not representable
const UNBOUNDED_RUN: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Tunables of a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory the working area is created in
    pub working_root: PathBuf,
    /// Keep the working area after the run
    pub retain: bool,
    /// Records renewed at the same time
    pub concurrency: usize,
    pub record_timeout: Duration,
    pub run_timeout: Duration,
    pub publish: bool,
    pub renew_before_days: Option<u32>,
    pub creation_host: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            working_root: config
                .working_area
                .root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            retain: config.working_area.retain,
            concurrency: config.renewal.concurrency.max(1),
            record_timeout: config.renewal.record_timeout(),
            run_timeout: config.renewal.run_timeout(),
            publish: config.renewal.publish,
            renew_before_days: config.renewal.renew_before_days,
            creation_host: config.renewal.creation_host.clone(),
        }
    }
}

/// Account loaded from the catalog
#[derive(Debug)]
pub struct LoadedAccount {
    pub config: AccountConfig,
    pub key: AccountKey,
}

/// Runs renewals of a catalog against injected storage and issuance
#[derive(Debug, Clone)]
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    issuer: Arc<dyn Issuer>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, issuer: Arc<dyn Issuer>, options: RunOptions) -> Self {
        Self {
            store,
            issuer,
            options,
        }
    }

    /// Renew every certificate of the catalog at `bucket`/`prefix`.
    ///
    /// # Errors
    ///
    /// Only bootstrap failures are errors; per-record failures are in the
    /// returned report.
    pub async fn run(&self, bucket: &str, prefix: &str) -> Result<RunReport, BootstrapError> {
        let run_id = RunId::new();
        let span = info_span!("run", run_id = %run_id, bucket = %bucket, prefix = %prefix);
        self.run_with_id(run_id, bucket, prefix).instrument(span).await
    }

    async fn run_with_id(
        &self,
        run_id: RunId,
        bucket: &str,
        prefix: &str,
    ) -> Result<RunReport, BootstrapError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let layout = CatalogLayout::new(prefix);
        let run_timeout = self.options.run_timeout;
        let deadline = run_deadline(tokio::time::Instant::now(), run_timeout);

        info!(
            backend = self.store.name(),
            issuer = self.issuer.name(),
            concurrency = self.options.concurrency,
            "Starting renewal run"
        );

        let account = tokio::time::timeout_at(deadline, self.load_account(bucket, &layout))
            .await
            .map_err(|_| BootstrapError::Deadline(run_timeout))??;

        let area = WorkingArea::allocate(&self.options.working_root, &run_id, self.options.retain)?;
        let identity = AccountMaterializer::new(self.options.creation_host.clone()).materialize(
            &account.config,
            &account.key,
            &area.config_dir(),
        )?;

        let identifiers =
            tokio::time::timeout_at(deadline, catalog::discover(self.store.as_ref(), bucket, &layout))
                .await
                .map_err(|_| BootstrapError::Deadline(run_timeout))??;

        let driver = RenewalDriver::new(
            self.store.clone(),
            self.issuer.clone(),
            Arc::new(account.config),
            bucket,
            layout.clone(),
        )
        .publish(self.options.publish)
        .renew_before_days(self.options.renew_before_days);

        let records = self.drive(&driver, &area, identifiers, deadline).await;

        if let Err(e) = area.dispose() {
            warn!(error = %e, "Failed to remove working area");
        }

        let summary = RunReport::tally(&records);
        let report = RunReport {
            run_id,
            bucket: bucket.to_string(),
            prefix: layout.prefix().to_string(),
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            account: summarize(&identity),
            summary,
            records,
        };

        report.log();
        Ok(report)
    }

    /// Load and parse the account configuration and key
    pub async fn load_account(
        &self,
        bucket: &str,
        layout: &CatalogLayout,
    ) -> Result<LoadedAccount, BootstrapError> {
        let document = self.store.get_object(bucket, &layout.config_key()).await?;
        let config = AccountConfig::from_json(&document)?;

        let stored_key = self
            .store
            .get_object(bucket, &layout.account_key_key())
            .await?;
        let key = AccountKey::from_stored(&stored_key)?;

        info!(
            ca_host = %config.ca_host(),
            algorithm = %key.algorithm(),
            "Loaded ACME account"
        );

        Ok(LoadedAccount { config, key })
    }

    /// Renew all records with bounded concurrency, keeping discovery order
    async fn drive(
        &self,
        driver: &RenewalDriver,
        area: &WorkingArea,
        identifiers: Vec<CertificateId>,
        deadline: tokio::time::Instant,
    ) -> Vec<RecordReport> {
        let record_timeout = self.options.record_timeout;
        let run_timeout = self.options.run_timeout;

        let mut records: Vec<(usize, RecordReport)> = stream::iter(identifiers.into_iter().enumerate())
            .map(|(index, identifier)| async move {
                let started = Instant::now();
                let renewal = tokio::time::timeout(record_timeout, driver.renew(&identifier, area));

                let result = match tokio::time::timeout_at(deadline, renewal).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(RenewalError::Timeout(record_timeout)),
                    Err(_) => Err(RenewalError::RunDeadline(run_timeout)),
                };

                let outcome = RecordOutcome::from(result);
                debug!(identifier = %identifier, status = outcome.status(), "Record finished");

                (
                    index,
                    RecordReport {
                        identifier,
                        outcome,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    },
                )
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        records.sort_by_key(|(index, _)| *index);
        records.into_iter().map(|(_, record)| record).collect()
    }
}

/// `start + timeout`, or a day past the longest accepted run if that overflows
fn run_deadline(start: tokio::time::Instant, timeout: Duration) -> tokio::time::Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + UNBOUNDED_RUN)
}

fn summarize(identity: &AccountIdentity) -> AccountSummary {
    AccountSummary {
        ca_host: identity.ca_host.clone(),
        fingerprint: identity.fingerprint.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_deadline_adds_timeout() {
        let start = tokio::time::Instant::now();
        assert_eq!(
            run_deadline(start, Duration::from_secs(840)),
            start + Duration::from_secs(840)
        );
    }

    #[tokio::test]
    async fn test_run_deadline_saturates() {
        let start = tokio::time::Instant::now();
        let deadline = run_deadline(start, Duration::MAX);
        assert_eq!(deadline, start + UNBOUNDED_RUN);
    }
}
