//! State transition history tracking.
//!
//! Records every transition the engine performs over one run, including
//! recovery and fault transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of a single state transition.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::core::StateTransition;
/// use chrono::Utc;
///
/// let transition = StateTransition {
///     from: "Idle".to_string(),
///     to: "Calibrating".to_string(),
///     trigger: "Start".to_string(),
///     timestamp: Utc::now(),
///     attempt: 0,
/// };
/// assert_eq!(transition.trigger, "Start");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state being transitioned from
    pub from: String,
    /// The state being transitioned to
    pub to: String,
    /// Event name, or the failure that forced the transition
    pub trigger: String,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Retries spent in the `from` state before leaving it
    pub attempt: u32,
}

/// Ordered history of state transitions.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::core::{StateHistory, StateTransition};
/// use chrono::Utc;
///
/// let mut history = StateHistory::new();
/// history.push(StateTransition {
///     from: "Idle".into(),
///     to: "Calibrating".into(),
///     trigger: "Start".into(),
///     timestamp: Utc::now(),
///     attempt: 0,
/// });
/// history.push(StateTransition {
///     from: "Calibrating".into(),
///     to: "Ready".into(),
///     trigger: "CalibrationDone".into(),
///     timestamp: Utc::now(),
///     attempt: 0,
/// });
///
/// assert_eq!(history.get_path(), vec!["Idle", "Calibrating", "Ready"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateHistory {
    transitions: Vec<StateTransition>,
}

impl StateHistory {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }

    /// Append a transition in place.
    pub fn push(&mut self, transition: StateTransition) {
        self.transitions.push(transition);
    }

    /// Get the path of states traversed: the first `from`, then every `to`.
    pub fn get_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        if let Some(first) = self.transitions.first() {
            path.push(first.from.as_str());
        }
        for transition in &self.transitions {
            path.push(transition.to.as_str());
        }
        path
    }

    /// Calculate total duration from first to last transition.
    ///
    /// Returns `None` if there are no transitions.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.transitions.first(), self.transitions.last()) {
            let duration = last.timestamp.signed_duration_since(first.timestamp);
            duration.to_std().ok()
        } else {
            None
        }
    }

    /// Get all transitions.
    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn last(&self) -> Option<&StateTransition> {
        self.transitions.last()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
