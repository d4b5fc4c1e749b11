//! Shared mutable state for one operational run.
//!
//! The [`Context`] holds the data bag, the callback registry collaborators
//! populate before dispatch starts, the last error message and operation
//! result, and free-form metadata. It is owned by exactly one engine and
//! lives across every transition of the run.

mod callback;
mod cancel;

pub use callback::{Callback, CallbackError, CallbackParams, CallbackRegistry};
pub use cancel::CancellationSignal;

use serde_json::{Map, Value};
use std::sync::Arc;

/// Data bag, callbacks and outcome of the current run.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::context::{CallbackError, Context};
/// use serde_json::{json, Map, Value};
///
/// let mut context = Context::new();
/// context.register_callback("on_entry_home", |params, data| {
///     data.insert("homed".into(), json!(true));
///     Ok(json!(params.get_str("state")))
/// });
///
/// let mut params = Map::new();
/// params.insert("state".into(), json!("Calibrating"));
/// let result = context.execute_callback("on_entry_home", params).unwrap();
///
/// assert_eq!(result, json!("Calibrating"));
/// assert_eq!(context.get("homed"), Some(&json!(true)));
///
/// // Unregistered callbacks are inert.
/// assert_eq!(context.execute_callback("on_entry_missing", Map::new()), Ok(Value::Null));
/// # let _ = CallbackError::failed("unused");
/// ```
#[derive(Debug, Default)]
pub struct Context {
    data: Map<String, Value>,
    callbacks: CallbackRegistry,
    error_message: Option<String>,
    operation_result: Value,
    metadata: Map<String, Value>,
    cancel: CancellationSignal,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a data value, falling back to `default` when absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.data.get(key).cloned().unwrap_or(default)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn clear_data(&mut self) {
        self.data.clear();
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }

    pub fn all_metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn clear_error_message(&mut self) {
        self.error_message = None;
    }

    pub fn operation_result(&self) -> &Value {
        &self.operation_result
    }

    pub fn set_operation_result(&mut self, result: Value) {
        self.operation_result = result;
    }

    /// Register a callback under `name`, replacing any earlier one.
    ///
    /// Collaborators register every action and error callback before the
    /// engine starts dispatching.
    pub fn register_callback<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&CallbackParams, &mut Map<String, Value>) -> Result<Value, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.callbacks.register(name.clone(), Arc::new(callback)).is_some() {
            tracing::debug!(callback = %name, "replaced previously registered callback");
        }
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains(name)
    }

    pub fn callback_names(&self) -> Vec<String> {
        self.callbacks.names().map(str::to_string).collect()
    }

    /// Invoke the callback registered under `name` with `params`.
    ///
    /// A missing callback returns `Value::Null`. A failing callback writes
    /// its message into [`Context::error_message`] and the error is
    /// returned to the caller, which decides whether to continue.
    pub fn execute_callback(
        &mut self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CallbackError> {
        let Some(callback) = self.callbacks.get(name) else {
            tracing::trace!(callback = %name, "no callback registered; skipping");
            return Ok(Value::Null);
        };

        let params = CallbackParams::new(params, self.cancel.clone());
        let result = callback(&params, &mut self.data);
        if let Err(error) = &result {
            self.error_message = Some(format!("callback '{name}' failed: {error}"));
        }
        result
    }

    /// The cancellation signal handed to every callback.
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    pub(crate) fn restore(
        &mut self,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
        operation_result: Value,
        error_message: Option<String>,
    ) {
        self.data = data;
        self.metadata = metadata;
        self.operation_result = operation_result;
        self.error_message = error_message;
    }
}
