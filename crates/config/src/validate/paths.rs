//! Local path validation
//!
//! Validates that directories and binaries named in the configuration exist.

use std::path::Path;

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::{RunnerConfig, StorageBackend};

/// Validate paths referenced by the configuration
pub fn validate_paths(config: &RunnerConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.storage.backend == StorageBackend::Filesystem {
        match config.storage.root {
            Some(ref root) if !root.is_dir() => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Storage,
                    format!("Storage root is not a directory: {:?}", root),
                ));
            }
            Some(_) => {}
            None => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Storage,
                    "Filesystem backend configured without storage.root",
                ));
            }
        }
    }

    if let Some(ref root) = config.working_area.root {
        if !root.is_dir() {
            result.add_error(ValidationError::new(
                ErrorCategory::WorkingArea,
                format!("Working area root is not a directory: {:?}", root),
            ));
        } else if is_read_only(root) {
            result.add_error(ValidationError::new(
                ErrorCategory::WorkingArea,
                format!("Working area root is read-only: {:?}", root),
            ));
        }
    }

    // Bare names are resolved through PATH when certbot is started
    let binary = &config.certbot.binary;
    if binary.components().count() > 1 && !binary.is_file() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certbot,
            format!("certbot binary not found: {:?}", binary),
        ));
    }

    if config.catalog.bucket.is_none() {
        result.add_error(ValidationError::new(
            ErrorCategory::Catalog,
            "No bucket configured (set catalog.bucket, --bucket or CA_BUCKET)",
        ));
    }

    result
}

fn is_read_only(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
}
