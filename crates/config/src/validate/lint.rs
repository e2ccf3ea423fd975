//! Configuration linting for best practices
//!
//! Checks configuration for settings that are valid but likely unintended.

use super::{ValidationResult, ValidationWarning};
use crate::RunnerConfig;

/// Renewals closer to expiry than this leave no room for a failed run to be retried
const MIN_SAFE_RENEW_BEFORE_DAYS: u32 = 7;

/// Let's Encrypt certificates are valid for 90 days
const TYPICAL_VALIDITY_DAYS: u32 = 90;

/// Lint configuration for best practices
pub fn lint_config(config: &RunnerConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.working_area.retain {
        result.add_warning(ValidationWarning::new(
            "working_area.retain is enabled: private keys stay on disk after the run",
        ));
    }

    if !config.renewal.publish {
        result.add_warning(ValidationWarning::new(
            "renewal.publish is disabled: issued certificates are discarded with the working area",
        ));
    }

    if let Some(days) = config.renewal.renew_before_days {
        if days < MIN_SAFE_RENEW_BEFORE_DAYS {
            result.add_warning(ValidationWarning::new(format!(
                "renewal.renew_before_days = {} leaves little time to recover from a failed run",
                days
            )));
        }
        if days >= TYPICAL_VALIDITY_DAYS {
            result.add_warning(ValidationWarning::new(format!(
                "renewal.renew_before_days = {} renews 90-day certificates on every run",
                days
            )));
        }
    }

    // certbot runs one record at a time, so all of them share the run deadline
    if config.renewal.record_timeout_secs == config.renewal.run_timeout_secs {
        result.add_warning(ValidationWarning::new(
            "renewal.record_timeout_secs equals run_timeout_secs: one slow certificate starves the rest",
        ));
    }

    if config.catalog.prefix.as_deref().map(str::is_empty).unwrap_or(false) {
        result.add_warning(ValidationWarning::new(
            "catalog.prefix is empty: the whole bucket is scanned for certificates",
        ));
    }

    result
}
