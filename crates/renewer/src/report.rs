//! Run report
//!
//! One entry per discovered certificate, in discovery order. Serialised to
//! JSON for the invoking layer:
//!
//! ```json
//! {
//!   "run_id": "6f1c...",
//!   "bucket": "example-ca",
//!   "prefix": "letsencrypt/live",
//!   "account": {"ca_host": "acme-v02.api.letsencrypt.org", "fingerprint": "a5a8..."},
//!   "summary": {"total": 2, "issued": 1, "current": 0, "failed": 1},
//!   "records": [
//!     {"identifier": "alpha", "status": "issued", "published": true, "not_after": "...", "elapsed_ms": 41000},
//!     {"identifier": "beta", "status": "failed", "kind": "storage", "error": "...", "elapsed_ms": 120}
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use tracing::{error, info};

use certkeeper_common::{CertificateId, RunId};

use crate::driver::Renewed;
use crate::errors::RenewalError;

/// Final outcome of one record
#[derive(Debug)]
pub enum RecordOutcome {
    Issued {
        published: bool,
        not_after: Option<DateTime<Utc>>,
    },
    Current {
        not_after: DateTime<Utc>,
    },
    Failed(RenewalError),
}

impl RecordOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&RenewalError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Issued { .. } => "issued",
            Self::Current { .. } => "current",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<Result<Renewed, RenewalError>> for RecordOutcome {
    fn from(result: Result<Renewed, RenewalError>) -> Self {
        match result {
            Ok(Renewed::Issued {
                published,
                not_after,
            }) => Self::Issued {
                published,
                not_after,
            },
            Ok(Renewed::Current { not_after }) => Self::Current { not_after },
            Err(e) => Self::Failed(e),
        }
    }
}

/// One record's line in the report
#[derive(Debug)]
pub struct RecordReport {
    pub identifier: CertificateId,
    pub outcome: RecordOutcome,
    pub elapsed_ms: u64,
}

impl Serialize for RecordReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RecordReport", 5)?;
        state.serialize_field("identifier", &self.identifier)?;
        state.serialize_field("status", self.outcome.status())?;
        match &self.outcome {
            RecordOutcome::Issued {
                published,
                not_after,
            } => {
                state.serialize_field("published", published)?;
                state.serialize_field("not_after", not_after)?;
            }
            RecordOutcome::Current { not_after } => {
                state.serialize_field("not_after", not_after)?;
            }
            RecordOutcome::Failed(e) => {
                state.serialize_field("kind", e.kind())?;
                state.serialize_field("error", &e.to_string())?;
            }
        }
        state.serialize_field("elapsed_ms", &self.elapsed_ms)?;
        state.end()
    }
}

/// The account a run renewed under
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub ca_host: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub issued: usize,
    pub current: usize,
    pub failed: usize,
}

/// Result of a run that got past bootstrap
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub bucket: String,
    pub prefix: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub account: AccountSummary,
    pub summary: Summary,
    pub records: Vec<RecordReport>,
}

impl RunReport {
    pub(crate) fn tally(records: &[RecordReport]) -> Summary {
        records.iter().fold(
            Summary {
                total: records.len(),
                ..Summary::default()
            },
            |mut summary, record| {
                match record.outcome {
                    RecordOutcome::Issued { .. } => summary.issued += 1,
                    RecordOutcome::Current { .. } => summary.current += 1,
                    RecordOutcome::Failed(_) => summary.failed += 1,
                }
                summary
            },
        )
    }

    /// Outcome recorded for `identifier`
    pub fn outcome(&self, identifier: &str) -> Option<&RecordOutcome> {
        self.records
            .iter()
            .find(|r| r.identifier.as_str() == identifier)
            .map(|r| &r.outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Log one line per failed record and a closing summary
    pub fn log(&self) {
        for record in &self.records {
            if let RecordOutcome::Failed(e) = &record.outcome {
                error!(
                    identifier = %record.identifier,
                    kind = e.kind(),
                    error = %e,
                    "Certificate renewal failed"
                );
            }
        }

        info!(
            run_id = %self.run_id,
            total = self.summary.total,
            issued = self.summary.issued,
            current = self.summary.current,
            failed = self.summary.failed,
            elapsed_ms = self.elapsed_ms,
            "Renewal run finished"
        );
    }
}
