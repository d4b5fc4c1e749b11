//! Core state machine types.
//!
//! This module contains the building blocks the engine drives:
//! - Events via the [`Event`] type
//! - The [`State`] capability interface and its data-driven implementation
//!   [`ConfigurableState`]
//! - Transition history tracking

mod configurable;
mod event;
mod history;
mod state;

pub use configurable::{ConfigurableState, LAST_EVENT_KEY, LAST_PAYLOAD_KEY, ON_ERROR_CALLBACK};
pub use event::Event;
pub use history::{StateHistory, StateTransition};
pub use state::{ActionFailure, ActionReport, Phase, State};
