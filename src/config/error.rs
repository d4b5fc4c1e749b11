//! Configuration errors.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single invariant violated by a state-machine configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigViolation {
    #[error("Initial state not specified")]
    MissingInitialState,

    #[error("Initial state '{initial}' is not a configured state")]
    UnknownInitialState { initial: String },

    #[error("State '{name}' is defined more than once")]
    DuplicateState { name: String },

    #[error("Key '{key}' appears more than once in {section}")]
    DuplicateKey { section: String, key: String },

    #[error("State configured under key '{key}' declares a different name '{name}'")]
    NameMismatch { key: String, name: String },

    #[error("Transition '{event}' of state '{state}' targets unknown state '{target}'")]
    UnknownTransitionTarget {
        state: String,
        event: String,
        target: String,
    },

    #[error("Global transition '{event}' targets unknown state '{target}'")]
    UnknownGlobalTarget { event: String, target: String },

    #[error("Error recovery for '{source_state}' targets unknown state '{target}'")]
    UnknownRecoveryTarget {
        source_state: String,
        target: String,
    },

    #[error("Error recovery key '{source_state}' is neither a state nor 'default'")]
    UnknownRecoverySource { source_state: String },

    #[error("State '{state}' has invalid retry count {retry_count}")]
    InvalidRetryCount { state: String, retry_count: i64 },

    #[error("State '{state}' has invalid timeout {seconds}s (must be positive and finite)")]
    InvalidTimeout { state: String, seconds: f64 },

    #[error("Timeout configured for unknown state '{state}'")]
    UnknownTimeoutState { state: String },

    #[error("Emergency event '{event}' is not a global transition")]
    UnknownEmergencyEvent { event: String },
}

/// Every violation found while validating a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    violations: Vec<ConfigViolation>,
}

impl ConfigValidationError {
    pub(crate) fn new(violations: Vec<ConfigViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[ConfigViolation] {
        &self.violations
    }

    pub fn contains(&self, predicate: impl Fn(&ConfigViolation) -> bool) -> bool {
        self.violations.iter().any(predicate)
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid state machine configuration ({} violation(s))",
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Errors from loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),
}
