//! Shared types for Certkeeper.
//!
//! - [`ids`]: validated certificate identifiers and run IDs
//! - [`layout`]: where a catalog's objects live in the bucket

pub mod ids;
pub mod layout;

pub use ids::{CertificateId, InvalidIdentifier, RunId};
pub use layout::{CatalogLayout, CertificateObject, KeyMatch};
