//! Declarative configuration: schema, loading, validation and builder.
//!
//! A [`StateMachineConfig`] is parsed from JSON (or built fluently), checked
//! against every structural invariant and is immutable afterwards. Loading
//! never stops at the first problem: a [`ConfigValidationError`] lists every
//! violation in the document.

pub mod builder;
pub mod error;
pub mod runtime;
pub mod schema;
mod validate;

pub use builder::StateMachineConfigBuilder;
pub use error::{ConfigError, ConfigValidationError, ConfigViolation};
pub use runtime::RuntimeConfig;
pub use schema::{
    ConfigDocument, StateConfig, StateDocument, StateMachineConfig, DEFAULT_RECOVERY_KEY,
};
