//! Pre-flight validation of a runner configuration.
//!
//! Schema checks happen while parsing ([`RunnerConfig::from_toml`]); this
//! module adds checks against the local environment and best-practice
//! lints, reported as errors and warnings instead of failing fast.
//!
//! [`RunnerConfig::from_toml`]: crate::RunnerConfig::from_toml

mod lint;
mod paths;

pub use lint::lint_config;
pub use paths::validate_paths;

use std::fmt;

use crate::RunnerConfig;

/// Area of the configuration an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Catalog,
    Storage,
    WorkingArea,
    Certbot,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Catalog => "catalog",
            Self::Storage => "storage",
            Self::WorkingArea => "working_area",
            Self::Certbot => "certbot",
        };
        f.write_str(name)
    }
}

/// A problem that prevents a run
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A setting that works but is likely unintended
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collected errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every check
pub fn validate_config(config: &RunnerConfig) -> ValidationResult {
    let mut result = validate_paths(config);
    result.merge(lint_config(config));
    result
}
