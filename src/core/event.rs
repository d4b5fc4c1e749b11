//! Named events consumed by the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An immutable named signal.
///
/// Two events are equal when their names are equal; the optional payload
/// travels with the event but never affects matching.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::core::Event;
/// use serde_json::json;
///
/// let start = Event::new("Start");
/// let with_payload = Event::with_payload("Start", json!({ "workpiece": 7 }));
///
/// assert_eq!(start, with_payload);
/// assert_eq!(with_payload.payload(), Some(&json!({ "workpiece": 7 })));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl Event {
    /// Create an event without a payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    /// Create an event carrying a payload. A JSON `null` payload is dropped.
    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload: (!payload.is_null()).then_some(payload),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Event {}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
