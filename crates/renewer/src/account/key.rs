//! ACME account key
//!
//! Parses the stored account key and exports it in the two shapes the
//! ACME client needs: a content fingerprint naming the account directory
//! and a private JSON Web Key for its key store.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use md5::{Digest, Md5};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigurationError;

const SEC1_TAG: &str = "EC PRIVATE KEY";
const PKCS8_TAG: &str = "PRIVATE KEY";
const PKCS1_TAG: &str = "RSA PRIVATE KEY";

/// Algorithm of an account key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    Rsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EcdsaP256 => "ECDSA P-256",
            Self::EcdsaP384 => "ECDSA P-384",
            Self::Rsa => "RSA",
        };
        f.write_str(name)
    }
}

enum ParsedKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    Rsa(Box<RsaPrivateKey>),
}

/// The run's shared ACME account key.
///
/// Loaded once and read-only afterwards.
pub struct AccountKey {
    pem: Vec<u8>,
    key: ParsedKey,
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Parse the stored `account.key` object.
    ///
    /// The provisioning side may store the PEM text as a JSON string; such
    /// a wrapper is removed before parsing. The unwrapped PEM text is what
    /// the fingerprint is computed over.
    pub fn from_stored(bytes: &[u8]) -> Result<Self, ConfigurationError> {
        Self::from_pem(unwrap_json_string(bytes)?)
    }

    /// Parse PEM text holding a SEC1, PKCS#8 or PKCS#1 private key.
    ///
    /// Other PEM blocks (such as `EC PARAMETERS`) are skipped.
    pub fn from_pem(pem_bytes: Vec<u8>) -> Result<Self, ConfigurationError> {
        let blocks = pem::parse_many(&pem_bytes)
            .map_err(|e| ConfigurationError::InvalidKey(format!("not PEM: {}", e)))?;

        let block = blocks
            .iter()
            .find(|b| b.tag().ends_with("PRIVATE KEY"))
            .ok_or_else(|| {
                ConfigurationError::InvalidKey("no PRIVATE KEY block found".to_string())
            })?;

        let key = match block.tag() {
            SEC1_TAG => parse_sec1(block.contents())?,
            PKCS8_TAG => parse_pkcs8(block.contents())?,
            PKCS1_TAG => parse_pkcs1(block.contents())?,
            other => return Err(ConfigurationError::UnsupportedKey(other.to_string())),
        };

        let account_key = Self {
            pem: pem_bytes,
            key,
        };

        debug!(
            algorithm = %account_key.algorithm(),
            fingerprint = %account_key.fingerprint(),
            "Parsed ACME account key"
        );

        Ok(account_key)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.key {
            ParsedKey::P256(_) => KeyAlgorithm::EcdsaP256,
            ParsedKey::P384(_) => KeyAlgorithm::EcdsaP384,
            ParsedKey::Rsa(_) => KeyAlgorithm::Rsa,
        }
    }

    /// PEM text the key was parsed from
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// Name of the account directory under `accounts/<host>/directory/`
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.pem)
    }

    /// Private JWK in the shape of the ACME client's key store
    pub fn to_jwk(&self) -> Jwk {
        match &self.key {
            ParsedKey::P256(secret) => {
                let point = secret.public_key().to_encoded_point(false);
                ec_jwk(
                    "P-256",
                    point.x().map(|x| x.as_slice()),
                    point.y().map(|y| y.as_slice()),
                    &secret.to_bytes(),
                )
            }
            ParsedKey::P384(secret) => {
                let point = secret.public_key().to_encoded_point(false);
                ec_jwk(
                    "P-384",
                    point.x().map(|x| x.as_slice()),
                    point.y().map(|y| y.as_slice()),
                    &secret.to_bytes(),
                )
            }
            ParsedKey::Rsa(key) => rsa_jwk(key),
        }
    }
}

/// Hex MD5 of the private key text, used as the account directory name.
///
/// certbot derives its own account id from the public key instead and
/// compares the two when it loads the account.
pub fn fingerprint(pem: &[u8]) -> String {
    hex::encode(Md5::digest(pem))
}

fn unwrap_json_string(bytes: &[u8]) -> Result<Vec<u8>, ConfigurationError> {
    let trimmed = bytes.trim_ascii_start();
    if !trimmed.starts_with(b"\"") {
        return Ok(bytes.to_vec());
    }

    let inner: String = serde_json::from_slice(bytes).map_err(|e| {
        ConfigurationError::InvalidKey(format!("malformed JSON-wrapped key: {}", e))
    })?;
    Ok(inner.into_bytes())
}

fn parse_sec1(der: &[u8]) -> Result<ParsedKey, ConfigurationError> {
    if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
        return Ok(ParsedKey::P256(key));
    }
    if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
        return Ok(ParsedKey::P384(key));
    }
    Err(ConfigurationError::InvalidKey(
        "EC key is not a valid P-256 or P-384 key".to_string(),
    ))
}

fn parse_pkcs8(der: &[u8]) -> Result<ParsedKey, ConfigurationError> {
    if let Ok(key) = p256::SecretKey::from_pkcs8_der(der) {
        return Ok(ParsedKey::P256(key));
    }
    if let Ok(key) = p384::SecretKey::from_pkcs8_der(der) {
        return Ok(ParsedKey::P384(key));
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
        return rsa_key(key);
    }

    // Distinguish an unsupported algorithm from a corrupt document
    match pkcs8_algorithm_oid(der) {
        Some(oid) => Err(ConfigurationError::UnsupportedKey(format!(
            "PKCS#8 key with algorithm {}",
            oid
        ))),
        None => Err(ConfigurationError::InvalidKey(
            "malformed PKCS#8 private key".to_string(),
        )),
    }
}

fn pkcs8_algorithm_oid(der: &[u8]) -> Option<String> {
    use rsa::pkcs8::PrivateKeyInfo;

    PrivateKeyInfo::try_from(der)
        .ok()
        .map(|info| info.algorithm.oid.to_string())
}

fn parse_pkcs1(der: &[u8]) -> Result<ParsedKey, ConfigurationError> {
    let key = RsaPrivateKey::from_pkcs1_der(der)
        .map_err(|e| ConfigurationError::InvalidKey(format!("malformed RSA key: {}", e)))?;
    rsa_key(key)
}

/// The JWK export needs the CRT values, so they must exist after parsing
fn rsa_key(mut key: RsaPrivateKey) -> Result<ParsedKey, ConfigurationError> {
    if key.dp().is_none() || key.dq().is_none() {
        key.precompute().map_err(|e| {
            ConfigurationError::InvalidKey(format!("RSA key CRT values unavailable: {}", e))
        })?;
    }
    Ok(ParsedKey::Rsa(Box::new(key)))
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn ec_jwk(crv: &str, x: Option<&[u8]>, y: Option<&[u8]>, d: &[u8]) -> Jwk {
    // An uncompressed point always carries both coordinates
    Jwk::Ec {
        crv: crv.to_string(),
        x: b64(x.unwrap_or_default()),
        y: b64(y.unwrap_or_default()),
        d: b64(d),
    }
}

fn rsa_jwk(key: &RsaPrivateKey) -> Jwk {
    let big = |n: &BigUint| b64(&n.to_bytes_be());
    let primes = key.primes();
    let zero = BigUint::default();

    Jwk::Rsa {
        n: big(key.n()),
        e: big(key.e()),
        d: big(key.d()),
        p: big(primes.first().unwrap_or(&zero)),
        q: big(primes.get(1).unwrap_or(&zero)),
        dp: big(key.dp().unwrap_or(&zero)),
        dq: big(key.dq().unwrap_or(&zero)),
        qi: big(&key.crt_coefficient().unwrap_or_default()),
    }
}

/// Private JSON Web Key (RFC 7517) as stored in `private_key.json`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec {
        crv: String,
        x: String,
        y: String,
        d: String,
    },
    #[serde(rename = "RSA")]
    Rsa {
        n: String,
        e: String,
        d: String,
        p: String,
        q: String,
        dp: String,
        dq: String,
        qi: String,
    },
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ec { crv, x, y, .. } => f
                .debug_struct("Jwk::Ec")
                .field("crv", crv)
                .field("x", x)
                .field("y", y)
                .finish_non_exhaustive(),
            Self::Rsa { n, e, .. } => f
                .debug_struct("Jwk::Rsa")
                .field("n", n)
                .field("e", e)
                .finish_non_exhaustive(),
        }
    }
}
