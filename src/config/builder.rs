//! Fluent builder for state-machine configurations.

use super::error::ConfigValidationError;
use super::schema::{ConfigDocument, StateConfig, StateMachineConfig};

/// Builder for [`StateMachineConfig`].
///
/// Entries are collected in declaration order and validated together in
/// [`build`](StateMachineConfigBuilder::build), so declaring the same state
/// twice is reported rather than silently overwritten.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::config::{StateConfig, StateMachineConfig};
///
/// let config = StateMachineConfig::builder()
///     .initial("Idle")
///     .state(StateConfig::new("Idle").on("Start", "Calibrating"))
///     .state(StateConfig::new("Calibrating").on("CalibrationDone", "Ready"))
///     .state(StateConfig::new("Ready"))
///     .state(StateConfig::new("EmergencyStopped"))
///     .global("EmergencyStop", "EmergencyStopped")
///     .emergency_event("EmergencyStop")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.initial_state(), "Idle");
/// ```
#[derive(Debug, Default)]
pub struct StateMachineConfigBuilder {
    document: ConfigDocument,
}

impl StateMachineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial state (required).
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.document.initial_state = state.into();
        self
    }

    /// Add a state.
    pub fn state(mut self, state: StateConfig) -> Self {
        self.document.states.push((state.name.clone(), state.into()));
        self
    }

    /// Add multiple states at once.
    pub fn states(self, states: impl IntoIterator<Item = StateConfig>) -> Self {
        states.into_iter().fold(self, Self::state)
    }

    /// Add a transition available from every state.
    pub fn global(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.document
            .global_transitions
            .push((event.into(), target.into()));
        self
    }

    /// Route exhausted failures of `source` (a state name or `"default"`) to `target`.
    pub fn recover(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.document
            .error_recovery
            .push((source.into(), target.into()));
        self
    }

    /// Global timeout for `state`; a state's own `timeout_seconds` wins.
    pub fn timeout(mut self, state: impl Into<String>, seconds: f64) -> Self {
        self.document.timeouts.push((state.into(), seconds));
        self
    }

    /// Mark a global event as pre-empting in-flight actions.
    pub fn emergency_event(mut self, event: impl Into<String>) -> Self {
        self.document.emergency_events.push(event.into());
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<StateMachineConfig, ConfigValidationError> {
        self.document.validate()
    }
}
