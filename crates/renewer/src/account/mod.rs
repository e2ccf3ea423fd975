//! ACME account bootstrap
//!
//! - [`key`]: parsing the stored account key, fingerprint and JWK export
//! - [`materializer`]: writing the account into certbot's config directory

pub mod key;
pub mod materializer;

pub use key::{fingerprint, AccountKey, Jwk, KeyAlgorithm};
pub use materializer::{AccountIdentity, AccountMaterializer};
