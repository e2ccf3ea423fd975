//! ACME issuance capability
//!
//! The ACME protocol itself (orders, challenges, polling) belongs to an
//! external client. The renewer describes one issuance as an
//! [`IssuanceRequest`] and hands it to an [`Issuer`].

mod certbot;

use std::fmt::{self, Debug};
use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::errors::IssuanceError;

pub use certbot::CertbotIssuer;

/// ACME challenge used to prove control of the identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    /// TXT record under `_acme-challenge.<domain>`
    Dns01,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns01 => f.write_str("dns-01"),
        }
    }
}

/// Everything needed to issue one certificate from an existing CSR.
///
/// Output paths must not exist yet; the issuer creates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    /// Never prompt
    pub non_interactive: bool,
    /// Accept the CA's terms of service
    pub agree_tos: bool,

    /// Client configuration directory holding the materialized account
    pub config_dir: PathBuf,
    pub work_dir: PathBuf,
    pub logs_dir: PathBuf,

    pub contact_email: String,
    pub directory_url: Url,
    pub challenge: ChallengeType,

    /// Certificate signing request (input)
    pub csr_path: PathBuf,
    /// Certificate private key
    pub key_path: PathBuf,

    /// Issued leaf certificate (output)
    pub cert_path: PathBuf,
    /// Intermediate chain (output)
    pub chain_path: PathBuf,
    /// Leaf followed by chain (output)
    pub fullchain_path: PathBuf,
}

/// Issues certificates through an ACME client
///
/// Implementations must be thread-safe: `issue` may be called for several
/// records at once. An implementation that cannot run in parallel queues the
/// calls itself, and time spent queued counts against the record's
/// deadline. Dropping the returned future abandons the issuance.
#[async_trait]
pub trait Issuer: Send + Sync + Debug {
    /// Issuer name for logs
    fn name(&self) -> &'static str;

    /// Issue a certificate, leaving it at [`IssuanceRequest::cert_path`]
    async fn issue(&self, request: &IssuanceRequest) -> Result<(), IssuanceError>;
}
