//! Checkpoint error types.

use thiserror::Error;

/// Errors that can occur while capturing or resuming a run
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Encoding to JSON or binary failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Decoding from JSON or binary failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported checkpoint version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The checkpoint does not fit the configuration it is resumed with
    #[error("Checkpoint validation failed: {0}")]
    ValidationFailed(String),

    #[error("Checkpoint state '{state}' is not defined by the configuration")]
    UnknownState { state: String },
}
