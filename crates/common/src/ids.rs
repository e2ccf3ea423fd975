//! Type-safe identifier newtypes for Certkeeper.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of a certificate name with an arbitrary storage key
//! or local path segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Longest identifier accepted; a single path component on common filesystems.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Reasons an identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("certificate identifier is empty")]
    Empty,

    #[error("certificate identifier '{0}' is a relative path component")]
    RelativeComponent(String),

    #[error("certificate identifier is {len} bytes (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("certificate identifier '{identifier}' contains disallowed character {character:?}")]
    DisallowedCharacter { identifier: String, character: char },
}

/// Name of a managed certificate.
///
/// Derived from the storage layout `<prefix>/<identifier>/cert`. The same
/// value names the certificate's local working directory, so it is
/// validated to be safe both as a storage key segment and as a single
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertificateId(String);

impl CertificateId {
    /// Validate and wrap an identifier
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

fn validate_identifier(id: &str) -> Result<(), InvalidIdentifier> {
    if id.is_empty() {
        return Err(InvalidIdentifier::Empty);
    }

    if id == "." || id == ".." {
        return Err(InvalidIdentifier::RelativeComponent(id.to_string()));
    }

    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(InvalidIdentifier::TooLong {
            len: id.len(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if let Some(character) = id.chars().find(|c| !is_allowed_char(*c)) {
        return Err(InvalidIdentifier::DisallowedCharacter {
            identifier: id.to_string(),
            character,
        });
    }

    Ok(())
}

// Wildcard certificates are commonly named after their domain ("*.example.com").
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*' | '+' | '@' | '=' | ',')
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CertificateId {
    type Error = InvalidIdentifier;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for CertificateId {
    type Error = InvalidIdentifier;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CertificateId> for String {
    fn from(id: CertificateId) -> Self {
        id.0
    }
}

impl AsRef<str> for CertificateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique ID for one renewal run.
///
/// Names the run's working area and is attached to the run report so log
/// lines and reports can be correlated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
