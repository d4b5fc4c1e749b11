//! The one state type the engine uses: behavior comes from a [`StateConfig`].

use super::event::Event;
use super::state::{ActionFailure, ActionReport, Phase, State};
use crate::config::StateConfig;
use crate::context::{CallbackError, Context};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Callback invoked for every failing entry/exit action.
pub const ON_ERROR_CALLBACK: &str = "on_error";

/// Context metadata key holding the name of the event that caused the
/// current transition.
pub const LAST_EVENT_KEY: &str = "last_event";

/// Context metadata key holding the payload of that event.
pub const LAST_PAYLOAD_KEY: &str = "last_payload";

/// A state populated from declarative configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurableState {
    name: String,
    entry_actions: Vec<String>,
    exit_actions: Vec<String>,
    transitions: BTreeMap<String, String>,
    operation_type: Option<String>,
    timeout: Option<Duration>,
    retry_count: u32,
}

impl ConfigurableState {
    /// Build a state from its configuration. `timeout` is the resolved
    /// timeout (state-local or global).
    pub fn from_config(config: &StateConfig, timeout: Option<Duration>) -> Self {
        Self {
            name: config.name.clone(),
            entry_actions: config.entry_actions.clone(),
            exit_actions: config.exit_actions.clone(),
            transitions: config.transitions.clone(),
            operation_type: config.operation_type.clone(),
            timeout,
            retry_count: config.retry_count,
        }
    }

    /// A state with no actions, transitions or operation.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            transitions: BTreeMap::new(),
            operation_type: None,
            timeout: None,
            retry_count: 0,
        }
    }

    pub fn operation_type(&self) -> Option<&str> {
        self.operation_type.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn transitions(&self) -> &BTreeMap<String, String> {
        &self.transitions
    }

    fn run_actions(&self, phase: Phase, actions: &[String], context: &mut Context) -> ActionReport {
        let mut report = ActionReport::new(phase);

        for action in actions {
            report.attempted += 1;
            let callback = format!("{}{action}", phase.callback_prefix());
            let params = self.action_params(action, context);

            if let Err(error) = context.execute_callback(&callback, params) {
                tracing::warn!(
                    state = %self.name,
                    action = %action,
                    phase = %phase,
                    error = %error,
                    "action failed; continuing with remaining actions"
                );
                self.report_failure(phase, action, &error, context);
                report.failures.push(ActionFailure {
                    action: action.clone(),
                    phase,
                    error,
                });
            }
        }

        report
    }

    fn action_params(&self, action: &str, context: &Context) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("state".into(), Value::from(self.name.as_str()));
        params.insert("action".into(), Value::from(action));
        params.insert("context".into(), Value::Object(context.data().clone()));
        if let Some(event) = context.metadata(LAST_EVENT_KEY) {
            params.insert("event".into(), event.clone());
        }
        if let Some(payload) = context.metadata(LAST_PAYLOAD_KEY) {
            params.insert("payload".into(), payload.clone());
        }
        params
    }

    fn report_failure(&self, phase: Phase, action: &str, error: &CallbackError, context: &mut Context) {
        let mut params = Map::new();
        params.insert("error".into(), Value::from(error.to_string()));
        params.insert("state".into(), Value::from(self.name.as_str()));
        params.insert("phase".into(), Value::from(phase.as_str()));
        params.insert("action".into(), Value::from(action));

        if let Err(handler_error) = context.execute_callback(ON_ERROR_CALLBACK, params) {
            tracing::error!(
                state = %self.name,
                error = %handler_error,
                "on_error callback failed"
            );
        }
    }
}

impl State for ConfigurableState {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&self, context: &mut Context) -> ActionReport {
        self.run_actions(Phase::Entry, &self.entry_actions, context)
    }

    fn exit(&self, context: &mut Context) -> ActionReport {
        self.run_actions(Phase::Exit, &self.exit_actions, context)
    }

    fn handle_event(&self, event: &Event, _context: &Context) -> Option<&str> {
        self.transitions.get(event.name()).map(String::as_str)
    }
}
