//! Capability interface implemented by every engine state.
//!
//! States are data: the engine never subclasses per state, it drives
//! whatever implements this trait through enter, exit and event lookup.

use super::event::Event;
use crate::context::{CallbackError, Context};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of a transition an action belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Entry,
    Exit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }

    /// Prefix of the callback names actions of this phase resolve to.
    pub fn callback_prefix(&self) -> &'static str {
        match self {
            Self::Entry => "on_entry_",
            Self::Exit => "on_exit_",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry or exit action whose callback failed.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionFailure {
    pub action: String,
    pub phase: Phase,
    pub error: CallbackError,
}

/// What happened while running one phase's action list.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionReport {
    pub phase: Phase,
    /// Number of actions invoked
    pub attempted: usize,
    /// Actions that failed, in execution order
    pub failures: Vec<ActionFailure>,
}

impl ActionReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            attempted: 0,
            failures: Vec::new(),
        }
    }
}

/// Trait for engine states.
///
/// `enter` and `exit` run side-effecting actions and never fail as a
/// whole: individual action failures are collected in the returned
/// [`ActionReport`]. `handle_event` is a pure lookup.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::context::Context;
/// use cobot_fsm::core::{ActionReport, Event, Phase, State};
///
/// struct Parked;
///
/// impl State for Parked {
///     fn name(&self) -> &str {
///         "Parked"
///     }
///
///     fn enter(&self, _context: &mut Context) -> ActionReport {
///         ActionReport::new(Phase::Entry)
///     }
///
///     fn exit(&self, _context: &mut Context) -> ActionReport {
///         ActionReport::new(Phase::Exit)
///     }
///
///     fn handle_event(&self, event: &Event, _context: &Context) -> Option<&str> {
///         (event.name() == "Wake").then_some("Idle")
///     }
/// }
///
/// let context = Context::new();
/// assert_eq!(Parked.handle_event(&Event::new("Wake"), &context), Some("Idle"));
/// assert_eq!(Parked.handle_event(&Event::new("Spray"), &context), None);
/// ```
pub trait State: Send + Sync {
    /// Get the state's name for display, lookup and logging.
    fn name(&self) -> &str;

    /// Run entry actions in order.
    fn enter(&self, context: &mut Context) -> ActionReport;

    /// Run exit actions in order.
    fn exit(&self, context: &mut Context) -> ActionReport;

    /// Resolve the local target for `event`, if any.
    fn handle_event(&self, event: &Event, context: &Context) -> Option<&str>;
}
