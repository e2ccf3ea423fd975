//! Storage-key layout of a certificate catalog.
//!
//! ```text
//! <prefix>/
//! ├── config.json         # ACME account configuration (url, email_address, id)
//! ├── account.key         # ACME account private key (PEM, optionally JSON-wrapped)
//! ├── ca.cert             # Issuer certificate (not read by the renewer)
//! └── <identifier>/
//!     ├── key             # Certificate private key
//!     ├── csr             # Certificate signing request
//!     └── cert            # Issued certificate; also the discovery marker
//! ```

use tracing::trace;

use crate::ids::{CertificateId, InvalidIdentifier};

/// Object holding the ACME account configuration document
pub const CONFIG_OBJECT: &str = "config.json";

/// Object holding the ACME account private key
pub const ACCOUNT_KEY_OBJECT: &str = "account.key";

/// Objects stored under each certificate's directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateObject {
    /// Certificate private key
    Key,
    /// Certificate signing request
    Csr,
    /// Issued certificate (discovery marker)
    Cert,
}

impl CertificateObject {
    /// Object name under `<prefix>/<identifier>/`, also used as the local file name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Csr => "csr",
            Self::Cert => "cert",
        }
    }
}

/// Outcome of matching a listed key against the catalog layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    /// The key is a certificate marker for a valid identifier
    Certificate(CertificateId),
    /// The key is not a certificate marker
    NotMarker,
    /// The key is a marker but the identifier cannot be used
    Invalid {
        key: String,
        reason: InvalidIdentifier,
    },
}

/// Key layout rooted at a catalog prefix.
///
/// The prefix is normalised so that `"certs"`, `"certs/"` and `"/certs"`
/// describe the same catalog; an empty prefix is the bucket root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLayout {
    prefix: String,
}

impl CatalogLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Normalised prefix without leading or trailing separators
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix to list with: everything inside the catalog and nothing beside it
    pub fn listing_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    fn join(&self, rest: &str) -> String {
        format!("{}{}", self.listing_prefix(), rest)
    }

    pub fn config_key(&self) -> String {
        self.join(CONFIG_OBJECT)
    }

    pub fn account_key_key(&self) -> String {
        self.join(ACCOUNT_KEY_OBJECT)
    }

    /// Key of one object belonging to a certificate
    pub fn certificate_key(&self, id: &CertificateId, object: CertificateObject) -> String {
        self.join(&format!("{}/{}", id, object.name()))
    }

    /// Recover the identifier from a listed key.
    ///
    /// Only keys of the exact shape `<prefix>/<identifier>/cert` are
    /// markers; nested paths and sibling objects such as `ca.cert` are not.
    pub fn match_key(&self, key: &str) -> KeyMatch {
        let Some(rest) = key.strip_prefix(&self.listing_prefix()) else {
            return KeyMatch::NotMarker;
        };

        let marker = format!("/{}", CertificateObject::Cert.name());
        let Some(identifier) = rest.strip_suffix(&marker) else {
            trace!(key = %key, "Key is not a certificate marker");
            return KeyMatch::NotMarker;
        };

        match CertificateId::new(identifier) {
            Ok(id) => KeyMatch::Certificate(id),
            Err(reason) => KeyMatch::Invalid {
                key: key.to_string(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> CertificateId {
        CertificateId::new(s).unwrap()
    }

    #[test]
    fn test_prefix_normalisation() {
        assert_eq!(CatalogLayout::new("certs").listing_prefix(), "certs/");
        assert_eq!(CatalogLayout::new("/certs/").listing_prefix(), "certs/");
        assert_eq!(CatalogLayout::new("").listing_prefix(), "");
    }

    #[test]
    fn test_account_keys() {
        let layout = CatalogLayout::new("ca/live");
        assert_eq!(layout.config_key(), "ca/live/config.json");
        assert_eq!(layout.account_key_key(), "ca/live/account.key");

        let root = CatalogLayout::new("");
        assert_eq!(root.config_key(), "config.json");
    }

    #[test]
    fn test_certificate_keys() {
        let layout = CatalogLayout::new("certs");
        assert_eq!(
            layout.certificate_key(&id("alpha"), CertificateObject::Csr),
            "certs/alpha/csr"
        );
        assert_eq!(
            layout.certificate_key(&id("alpha"), CertificateObject::Cert),
            "certs/alpha/cert"
        );
    }

    #[test]
    fn test_match_marker() {
        let layout = CatalogLayout::new("certs");
        assert_eq!(
            layout.match_key("certs/a/cert"),
            KeyMatch::Certificate(id("a"))
        );
        assert_eq!(layout.match_key("certs/a/key"), KeyMatch::NotMarker);
        assert_eq!(layout.match_key("certs/c/other"), KeyMatch::NotMarker);
        assert_eq!(layout.match_key("certs/ca.cert"), KeyMatch::NotMarker);
        assert_eq!(layout.match_key("other/a/cert"), KeyMatch::NotMarker);
    }

    #[test]
    fn test_match_rejects_unusable_identifiers() {
        let layout = CatalogLayout::new("certs");
        assert!(matches!(
            layout.match_key("certs/a/b/cert"),
            KeyMatch::Invalid { .. }
        ));
        assert!(matches!(
            layout.match_key("certs//cert"),
            KeyMatch::Invalid {
                reason: InvalidIdentifier::Empty,
                ..
            }
        ));
    }

    #[test]
    fn test_match_at_bucket_root() {
        let layout = CatalogLayout::new("");
        assert_eq!(layout.match_key("a/cert"), KeyMatch::Certificate(id("a")));
    }

    proptest! {
        #[test]
        fn marker_key_round_trips(name in "[a-z0-9][a-z0-9.-]{0,30}", prefix in "[a-z]{0,8}") {
            let layout = CatalogLayout::new(&prefix);
            let cert = id(&name);
            let key = layout.certificate_key(&cert, CertificateObject::Cert);
            prop_assert_eq!(layout.match_key(&key), KeyMatch::Certificate(cert));
        }
    }
}
