//! Stored ACME account configuration.
//!
//! The catalog's `config.json` is written by the provisioning side and is a
//! hard external contract:
//!
//! ```json
//! {
//!     "url": "https://acme-v02.api.letsencrypt.org/directory",
//!     "email_address": "ops@example.com",
//!     "id": "https://acme-v02.api.letsencrypt.org/acme/acct/123456"
//! }
//! ```
//!
//! Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::ConfigError;

/// ACME account configuration shared by every certificate in a run.
///
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountConfig {
    /// CA directory URL
    #[serde(rename = "url")]
    directory_url: Url,
    /// Contact email registered with the account
    #[serde(rename = "email_address")]
    contact_email: String,
    /// Registration URI (or ID) of the existing account
    #[serde(rename = "id")]
    registration_id: String,
}

#[derive(Deserialize)]
struct RawAccountConfig {
    url: Option<String>,
    email_address: Option<String>,
    id: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        None => Err(ConfigError::MissingField(field)),
        Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyField(field)),
        Some(v) => Ok(v),
    }
}

impl AccountConfig {
    /// Build a configuration from its parts, applying the same checks as
    /// [`AccountConfig::from_json`].
    pub fn new(
        directory_url: &str,
        contact_email: impl Into<String>,
        registration_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let directory_url = parse_directory_url(directory_url)?;

        let contact_email = contact_email.into();
        if contact_email.trim().is_empty() {
            return Err(ConfigError::EmptyField("email_address"));
        }
        if !looks_like_email(&contact_email) {
            return Err(ConfigError::InvalidEmail(contact_email));
        }

        let registration_id = registration_id.into();
        if registration_id.trim().is_empty() {
            return Err(ConfigError::EmptyField("id"));
        }

        Ok(Self {
            directory_url,
            contact_email,
            registration_id,
        })
    }

    /// Parse the stored configuration document
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawAccountConfig = serde_json::from_slice(bytes)?;

        let url = required(raw.url, "url")?;
        let email = required(raw.email_address, "email_address")?;
        let id = required(raw.id, "id")?;

        let config = Self::new(&url, email, id)?;

        debug!(
            directory = %config.directory_url,
            host = %config.ca_host(),
            "Parsed ACME account configuration"
        );

        Ok(config)
    }

    pub fn directory_url(&self) -> &Url {
        &self.directory_url
    }

    pub fn contact_email(&self) -> &str {
        &self.contact_email
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Host of the CA directory URL; namespaces on-disk account state
    pub fn ca_host(&self) -> &str {
        // Checked to be present at construction
        self.directory_url.host_str().unwrap_or_default()
    }
}

fn parse_directory_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ConfigError::UrlWithoutHost(raw.to_string())),
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
