//! The engine: event dispatch, failure handling and timeout supervision.
//!
//! [`StateMachine`] is the synchronous core and can be driven directly.
//! [`EngineRuntime`] moves it into a tokio task that serializes all
//! dispatches and publishes [`EngineSnapshot`]s for concurrent readers.

mod machine;
mod outcome;
mod runtime;
mod snapshot;
mod timer;

pub use machine::{StateMachine, FAULT_STATE, RESET_TRIGGER, START_TRIGGER};
pub use outcome::{DispatchOutcome, FailureCause};
pub use runtime::{EngineHandle, EngineRuntime, RuntimeError, SubmitResponse};
pub use snapshot::EngineSnapshot;
pub use timer::TimerTicket;
