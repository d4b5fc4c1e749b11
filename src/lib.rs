//! cobot-fsm: a configuration-driven state machine for a glue-dispensing
//! cobot cell.
//!
//! The cell's operating modes (idle, calibrating, dispensing, emergency
//! stop, ...) are declared in a JSON document rather than in code. The
//! engine loads that document, validates it, and drives a [`Context`]
//! through it in response to events, running entry/exit actions and each
//! state's operation through injected services.
//!
//! # Core Concepts
//!
//! - **Configuration**: [`StateMachineConfig`] is validated once and is
//!   immutable afterwards; every violation is reported together
//! - **Dispatch**: local transitions first, then global ones; unmatched
//!   events are ignored
//! - **Failure handling**: per-state retries, then the error-recovery
//!   table, then a halt in the [`FAULT_STATE`]
//! - **Timeouts**: a state that outstays its timeout is treated like a
//!   failed operation
//! - **Runtime**: [`EngineRuntime`] serializes dispatch on one tokio task
//!   and publishes [`EngineSnapshot`]s to concurrent readers
//!
//! # Example
//!
//! ```rust
//! use cobot_fsm::{Context, Event, ServiceContainer, StateMachine, StateMachineConfig};
//! use serde_json::json;
//!
//! let config = StateMachineConfig::from_json_str(r#"{
//!     "initial_state": "Idle",
//!     "states": {
//!         "Idle": { "name": "Idle", "transitions": { "Start": "Calibrating" } },
//!         "Calibrating": {
//!             "name": "Calibrating",
//!             "entry_actions": ["home_axes"],
//!             "transitions": { "CalibrationDone": "Ready" },
//!             "operation_type": "calibrate",
//!             "retry_count": 2
//!         },
//!         "Ready": { "name": "Ready" },
//!         "EmergencyStopped": { "name": "EmergencyStopped", "transitions": { "Reset": "Idle" } }
//!     },
//!     "global_transitions": { "EmergencyStop": "EmergencyStopped" },
//!     "error_recovery": { "Calibrating": "EmergencyStopped" }
//! }"#).unwrap();
//!
//! let mut context = Context::new();
//! context.register_callback("on_entry_home_axes", |_, data| {
//!     data.insert("homed".into(), json!(true));
//!     Ok(json!(null))
//! });
//! context.register_callback("calibrate", |_, _| Ok(json!({"offset_mm": 0.05})));
//!
//! let mut machine = StateMachine::new(config, context, ServiceContainer::new());
//! machine.dispatch(&Event::new("Start"));
//! machine.dispatch(&Event::new("CalibrationDone"));
//!
//! assert_eq!(machine.current_state(), "Ready");
//! assert_eq!(machine.context().get("homed"), Some(&json!(true)));
//! assert_eq!(
//!     machine.history().get_path(),
//!     vec!["Idle", "Calibrating", "Ready"]
//! );
//! ```

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod publisher;
pub mod services;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointError};
pub use config::{ConfigError, RuntimeConfig, StateConfig, StateMachineConfig};
pub use context::{CallbackError, Context};
pub use self::core::{ConfigurableState, Event, State, StateHistory, StateTransition};
pub use engine::{
    DispatchOutcome, EngineHandle, EngineRuntime, EngineSnapshot, StateMachine, FAULT_STATE,
};
pub use services::ServiceContainer;
