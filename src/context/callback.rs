//! Named callback registry.

use super::cancel::CancellationSignal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a callback.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallbackError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled by emergency stop")]
    Cancelled,
}

impl CallbackError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Parameters handed to a callback invocation.
///
/// Every invocation gets a fresh map; callbacks cannot leak values into
/// the next call through their parameters.
#[derive(Clone, Debug)]
pub struct CallbackParams {
    values: Map<String, Value>,
    cancel: CancellationSignal,
}

impl CallbackParams {
    pub(crate) fn new(values: Map<String, Value>, cancel: CancellationSignal) -> Self {
        Self { values, cancel }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// True once an emergency event has been submitted. Long-running
    /// callbacks poll this and return [`CallbackError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }
}

/// A registered callback. Receives its parameters and mutable access to
/// the context data bag.
pub type Callback =
    Arc<dyn Fn(&CallbackParams, &mut Map<String, Value>) -> Result<Value, CallbackError> + Send + Sync>;

/// Lookup table from callback name to function.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: BTreeMap<String, Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`. Returns the callback it replaced.
    pub fn register(&mut self, name: impl Into<String>, callback: Callback) -> Option<Callback> {
        self.callbacks.insert(name.into(), callback)
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.callbacks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i64) -> Callback {
        Arc::new(move |_params, _data| Ok(Value::from(value)))
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = CallbackRegistry::new();
        assert!(registry.register("on_entry_home", constant(1)).is_none());
        assert!(registry.register("on_entry_home", constant(2)).is_some());
        assert_eq!(registry.len(), 1);

        let callback = registry.get("on_entry_home").unwrap();
        let params = CallbackParams::new(Map::new(), CancellationSignal::new());
        let result = callback(&params, &mut Map::new()).unwrap();
        assert_eq!(result, Value::from(2));
    }

    #[test]
    fn params_expose_cancellation() {
        let signal = CancellationSignal::new();
        let params = CallbackParams::new(Map::new(), signal.clone());
        assert!(!params.is_cancelled());
        signal.cancel();
        assert!(params.is_cancelled());
    }
}
