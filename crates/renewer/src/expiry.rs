//! Renewal window
//!
//! With `renewal.renew_before_days` set, a certificate whose stored leaf is
//! valid for longer than the window is left alone for this run.

use chrono::{DateTime, Duration, Utc};

/// Expiry of the first certificate in a PEM document (the leaf of a chain)
pub fn not_after(pem: &[u8]) -> Result<DateTime<Utc>, String> {
    let blocks = pem::parse_many(pem).map_err(|e| format!("not PEM: {}", e))?;
    let leaf = blocks
        .iter()
        .find(|b| b.tag() == "CERTIFICATE")
        .ok_or_else(|| "no CERTIFICATE block found".to_string())?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| format!("invalid X509 certificate: {}", e))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("expiry {} out of range", timestamp))
}

/// Whether a certificate expiring at `not_after` is still outside the window
pub fn is_current(not_after: DateTime<Utc>, now: DateTime<Utc>, window_days: u32) -> bool {
    not_after - now > Duration::days(i64::from(window_days))
}
