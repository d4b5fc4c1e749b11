//! The synchronous engine: dispatch, retry, escalation and timeouts.
//!
//! [`StateMachine`] owns the current state, the [`Context`] and the
//! resolved [`ConfigurableState`]s. Every mutation goes through `&mut self`,
//! so a single owner (the runtime task, or a test) is the single writer.

use super::outcome::{DispatchOutcome, FailureCause};
use super::snapshot::EngineSnapshot;
use super::timer::{TimeoutSupervisor, TimerTicket};
use crate::checkpoint::{Checkpoint, CheckpointError, CHECKPOINT_VERSION};
use crate::config::StateMachineConfig;
use crate::context::Context;
use crate::core::{
    ActionReport, ConfigurableState, Event, State, StateHistory, StateTransition, LAST_EVENT_KEY,
    LAST_PAYLOAD_KEY,
};
use crate::services::{EngineNotification, LogLevel, OperationError, OperationRequest, ServiceContainer};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Name of the terminal state the engine halts in when no recovery route
/// exists. A configured state with this name supplies its entry actions.
pub const FAULT_STATE: &str = "Fault";

/// Trigger recorded when the initial state is entered.
pub const START_TRIGGER: &str = "initialize";

/// Trigger recorded when the machine is reset to its initial state.
pub const RESET_TRIGGER: &str = "reset";

enum OperationStatus {
    Completed,
    Cancelled,
    Exhausted(FailureCause),
}

fn lookup<'a>(
    states: &'a BTreeMap<String, ConfigurableState>,
    fault: &'a ConfigurableState,
    name: &str,
) -> &'a ConfigurableState {
    states.get(name).unwrap_or(fault)
}

/// Data-driven state machine for one operational run.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::config::{StateConfig, StateMachineConfig};
/// use cobot_fsm::context::Context;
/// use cobot_fsm::core::Event;
/// use cobot_fsm::engine::StateMachine;
/// use cobot_fsm::services::ServiceContainer;
/// use serde_json::json;
///
/// let config = StateMachineConfig::builder()
///     .initial("Idle")
///     .state(StateConfig::new("Idle").on("Start", "Calibrating"))
///     .state(
///         StateConfig::new("Calibrating")
///             .on("CalibrationDone", "Ready")
///             .operation("calibrate"),
///     )
///     .state(StateConfig::new("Ready"))
///     .build()
///     .unwrap();
///
/// let mut context = Context::new();
/// context.register_callback("calibrate", |_, _| Ok(json!({"offset_mm": 0.2})));
///
/// let mut machine = StateMachine::new(config, context, ServiceContainer::new());
/// machine.start();
///
/// assert!(machine.dispatch(&Event::new("Start")).is_success());
/// assert_eq!(machine.current_state(), "Calibrating");
/// assert_eq!(machine.context().operation_result(), &json!({"offset_mm": 0.2}));
///
/// machine.dispatch(&Event::new("CalibrationDone"));
/// assert_eq!(machine.current_state(), "Ready");
/// ```
pub struct StateMachine {
    config: StateMachineConfig,
    states: BTreeMap<String, ConfigurableState>,
    fault: ConfigurableState,
    current: String,
    context: Context,
    services: ServiceContainer,
    history: StateHistory,
    retries: u32,
    timer: TimeoutSupervisor,
    started: bool,
    halted: bool,
    sequence: u64,
}

impl StateMachine {
    /// Resolve every configured state. No actions run until [`start`].
    ///
    /// [`start`]: StateMachine::start
    pub fn new(config: StateMachineConfig, context: Context, services: ServiceContainer) -> Self {
        let states: BTreeMap<_, _> = config
            .states()
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    ConfigurableState::from_config(state, config.timeout_for(name)),
                )
            })
            .collect();
        let fault = states
            .get(FAULT_STATE)
            .cloned()
            .unwrap_or_else(|| ConfigurableState::bare(FAULT_STATE));
        let current = config.initial_state().to_string();

        Self {
            config,
            states,
            fault,
            current,
            context,
            services,
            history: StateHistory::new(),
            retries: 0,
            timer: TimeoutSupervisor::default(),
            started: false,
            halted: false,
            sequence: 0,
        }
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    /// The resolved state the machine is in.
    pub fn state(&self) -> &ConfigurableState {
        lookup(&self.states, &self.fault, &self.current)
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Retries spent in the current state.
    pub fn retries_used(&self) -> u32 {
        self.retries
    }

    /// Commands processed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The live timeout, if the current state has one.
    pub fn active_timer(&self) -> Option<TimerTicket> {
        self.timer.ticket()
    }

    pub fn is_emergency_event(&self, event: &str) -> bool {
        self.config.is_emergency_event(event)
    }

    /// Enter the initial state: entry actions, timer, then its operation.
    ///
    /// Calling it twice is harmless; the second call is ignored.
    pub fn start(&mut self) -> DispatchOutcome {
        if self.started {
            return DispatchOutcome::Ignored {
                state: self.current.clone(),
                event: START_TRIGGER.to_string(),
            };
        }

        self.started = true;
        self.sequence += 1;
        self.retries = 0;
        self.context
            .set_metadata(LAST_EVENT_KEY, Value::from(START_TRIGGER));
        self.context.remove_metadata(LAST_PAYLOAD_KEY);

        let initial = lookup(&self.states, &self.fault, &self.current);
        let report = initial.enter(&mut self.context);
        let timeout = initial.timeout();
        self.log_action_failures(&report);
        self.timer.arm(timeout);

        tracing::info!(
            state = %self.current,
            action_failures = report.failures.len(),
            "state machine started"
        );
        self.services
            .log()
            .log(LogLevel::Info, &format!("started in {}", self.current));

        let origin = self.current.clone();
        self.settle(origin, None, 0)
    }

    /// Process one event.
    ///
    /// The current state's local transitions are consulted first, then the
    /// global table. An event neither knows is ignored without touching the
    /// context. A machine that was never started is started first.
    pub fn dispatch(&mut self, event: &Event) -> DispatchOutcome {
        if !self.started {
            self.start();
        }
        self.sequence += 1;

        if self.halted {
            tracing::warn!(state = %self.current, event = %event, "machine halted; event rejected");
            return DispatchOutcome::Rejected {
                state: self.current.clone(),
                event: event.name().to_string(),
            };
        }

        let target = lookup(&self.states, &self.fault, &self.current)
            .handle_event(event, &self.context)
            .or_else(|| {
                self.config
                    .global_transitions()
                    .get(event.name())
                    .map(String::as_str)
            })
            .map(str::to_string);

        let Some(target) = target else {
            tracing::debug!(state = %self.current, event = %event, "no transition for event");
            self.notify(EngineNotification::Ignored {
                state: self.current.clone(),
                event: event.name().to_string(),
            });
            return DispatchOutcome::Ignored {
                state: self.current.clone(),
                event: event.name().to_string(),
            };
        };

        let origin = self.current.clone();
        self.switch_to(&target, event.name(), event.payload().cloned());
        self.settle(origin, None, 0)
    }

    /// Handle expiry of the timer identified by `generation`.
    ///
    /// Returns `None` for a stale timer: one armed for a state the machine
    /// has since left (or re-entered). Otherwise the timeout consumes one
    /// retry if any remain (re-arming the timer and re-running the state's
    /// operation), or escalates like an exhausted operation failure.
    pub fn expire_timeout(&mut self, generation: u64) -> Option<DispatchOutcome> {
        if self.halted || !self.timer.is_live(generation) {
            tracing::trace!(generation, state = %self.current, "stale timer ignored");
            return None;
        }
        let ticket = self.timer.ticket()?;
        self.sequence += 1;

        let state = lookup(&self.states, &self.fault, &self.current);
        let budget = state.retry_count();
        let timeout = state.timeout();
        let cause = FailureCause::Timeout {
            state: self.current.clone(),
            after: ticket.duration,
        };

        tracing::warn!(state = %self.current, after = ?ticket.duration, "state timed out");
        self.context.set_error_message(cause.to_string());
        self.services.log().log(LogLevel::Warn, &cause.to_string());
        self.notify(EngineNotification::TimedOut {
            state: self.current.clone(),
        });

        if self.retries < budget {
            self.retries += 1;
            let attempt = self.retries;
            self.notify(EngineNotification::Retrying {
                state: self.current.clone(),
                attempt,
            });
            self.timer.arm(timeout);

            let origin = self.current.clone();
            let outcome = match self.settle(origin, None, 0) {
                DispatchOutcome::Transitioned { to, .. } => DispatchOutcome::Retrying {
                    state: to,
                    attempt,
                    cause,
                },
                other => other,
            };
            return Some(outcome);
        }

        self.timer.disarm();
        Some(match self.escalate(cause, 1) {
            Ok((failed_state, cause)) => {
                self.settle(failed_state.clone(), Some((failed_state, cause)), 1)
            }
            Err(outcome) => outcome,
        })
    }

    /// Poll the live timer against the wall clock.
    pub fn check_timeout(&mut self) -> Option<DispatchOutcome> {
        let ticket = self.timer.expired(Instant::now())?;
        self.expire_timeout(ticket.generation)
    }

    /// Leave wherever the machine is (including the fault state) and enter
    /// the initial state again. Context data is kept.
    pub fn reset(&mut self) -> DispatchOutcome {
        if !self.started {
            return self.start();
        }
        self.sequence += 1;
        self.halted = false;
        self.context.cancellation().reset();
        self.context.clear_error_message();

        let origin = self.current.clone();
        let initial = self.config.initial_state().to_string();
        tracing::info!(from = %origin, to = %initial, "resetting state machine");
        self.switch_to(&initial, RESET_TRIGGER, None);
        self.settle(origin, None, 0)
    }

    /// Immutable status for publication.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.current.clone(),
            operation_result: self.context.operation_result().clone(),
            error_message: self.context.error_message().map(str::to_string),
            timestamp: Utc::now(),
            halted: self.halted,
            sequence: self.sequence,
        }
    }

    /// Capture everything needed to resume this run later.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            initial_state: self.config.initial_state().to_string(),
            current_state: self.current.clone(),
            halted: self.halted,
            retries: self.retries,
            history: self.history.clone(),
            data: self.context.data().clone(),
            metadata: self.context.all_metadata().clone(),
            operation_result: self.context.operation_result().clone(),
            error_message: self.context.error_message().map(str::to_string),
        }
    }

    /// Rebuild a machine from a checkpoint.
    ///
    /// Callbacks are not serializable, so `context` supplies them; its data
    /// and metadata are replaced by the checkpoint's. Entry actions are not
    /// re-run, but the resumed state's timeout starts afresh.
    pub fn resume(
        config: StateMachineConfig,
        context: Context,
        services: ServiceContainer,
        checkpoint: Checkpoint,
    ) -> Result<Self, CheckpointError> {
        checkpoint.validate()?;

        if checkpoint.initial_state != config.initial_state() {
            return Err(CheckpointError::ValidationFailed(format!(
                "checkpoint starts in '{}' but configuration starts in '{}'",
                checkpoint.initial_state,
                config.initial_state()
            )));
        }
        if checkpoint.current_state != FAULT_STATE && !config.contains_state(&checkpoint.current_state)
        {
            return Err(CheckpointError::UnknownState {
                state: checkpoint.current_state,
            });
        }

        let mut machine = Self::new(config, context, services);
        let Checkpoint {
            id,
            current_state,
            halted,
            retries,
            history,
            data,
            metadata,
            operation_result,
            error_message,
            ..
        } = checkpoint;

        machine
            .context
            .restore(data, metadata, operation_result, error_message);
        machine.current = current_state;
        machine.halted = halted;
        machine.retries = retries;
        machine.history = history;
        machine.started = true;

        if !halted {
            let timeout = machine.state().timeout();
            machine.timer.arm(timeout);
        }

        tracing::info!(checkpoint = %id, state = %machine.current, halted, "resumed from checkpoint");
        Ok(machine)
    }

    fn notify(&self, notification: EngineNotification) {
        self.services.publisher().publish(&notification);
    }

    fn log_action_failures(&self, report: &ActionReport) {
        for failure in &report.failures {
            self.services.log().log(
                LogLevel::Warn,
                &format!(
                    "{} action '{}' failed in {}: {}",
                    failure.phase, failure.action, self.current, failure.error
                ),
            );
        }
    }

    /// Exit the current state, record the transition and enter `target`.
    fn switch_to(&mut self, target: &str, trigger: &str, payload: Option<Value>) {
        let exit = lookup(&self.states, &self.fault, &self.current).exit(&mut self.context);
        self.log_action_failures(&exit);
        self.timer.disarm();

        self.history.push(StateTransition {
            from: self.current.clone(),
            to: target.to_string(),
            trigger: trigger.to_string(),
            timestamp: Utc::now(),
            attempt: self.retries,
        });

        self.context.set_metadata(LAST_EVENT_KEY, Value::from(trigger));
        match payload {
            Some(payload) => self.context.set_metadata(LAST_PAYLOAD_KEY, payload),
            None => {
                self.context.remove_metadata(LAST_PAYLOAD_KEY);
            }
        }

        let from = std::mem::replace(&mut self.current, target.to_string());
        self.retries = 0;

        let entered = lookup(&self.states, &self.fault, &self.current);
        let enter = entered.enter(&mut self.context);
        let timeout = entered.timeout();
        self.log_action_failures(&enter);
        self.timer.arm(timeout);

        tracing::info!(from = %from, to = %self.current, trigger, "transitioned");
        self.services
            .log()
            .log(LogLevel::Info, &format!("{from} -> {} on '{trigger}'", self.current));
        self.notify(EngineNotification::Transitioned {
            from,
            to: self.current.clone(),
            trigger: trigger.to_string(),
        });
    }

    /// Run the current state's operation, escalating until it completes,
    /// is cancelled or the machine halts.
    ///
    /// `hops` is the number of escalations already taken by the caller.
    fn settle(
        &mut self,
        origin: String,
        mut recovering: Option<(String, FailureCause)>,
        mut hops: usize,
    ) -> DispatchOutcome {
        loop {
            match self.run_operation() {
                OperationStatus::Completed => {
                    return match recovering {
                        None => DispatchOutcome::Transitioned {
                            from: origin,
                            to: self.current.clone(),
                            retries: self.retries,
                        },
                        Some((failed_state, cause)) => DispatchOutcome::Recovered {
                            failed_state,
                            to: self.current.clone(),
                            cause,
                        },
                    };
                }
                OperationStatus::Cancelled => {
                    return DispatchOutcome::Cancelled {
                        state: self.current.clone(),
                    };
                }
                OperationStatus::Exhausted(cause) => {
                    hops += 1;
                    match self.escalate(cause, hops) {
                        Ok(next) => recovering = Some(next),
                        Err(outcome) => return outcome,
                    }
                }
            }
        }
    }

    fn run_operation(&mut self) -> OperationStatus {
        let state = lookup(&self.states, &self.fault, &self.current);
        let Some(operation) = state.operation_type().map(str::to_string) else {
            return OperationStatus::Completed;
        };
        let budget = state.retry_count();
        let payload = self.context.metadata(LAST_PAYLOAD_KEY).cloned();
        let executor = Arc::clone(self.services.executor());

        loop {
            let request = OperationRequest {
                state: &self.current,
                operation: &operation,
                attempt: self.retries,
                payload: payload.as_ref(),
            };

            let error = match executor.execute(&request, &mut self.context) {
                Ok(result) => {
                    tracing::debug!(state = %self.current, operation = %operation, "operation completed");
                    self.context.set_operation_result(result);
                    return OperationStatus::Completed;
                }
                Err(error) => error,
            };

            self.context.set_error_message(format!(
                "operation '{operation}' failed in state '{}': {error}",
                self.current
            ));
            self.notify(EngineNotification::OperationFailed {
                state: self.current.clone(),
                attempt: self.retries,
                error: error.to_string(),
            });

            if error == OperationError::Cancelled || self.context.cancellation().is_cancelled() {
                tracing::warn!(state = %self.current, operation = %operation, "operation cancelled");
                self.services.log().log(
                    LogLevel::Warn,
                    &format!("operation '{operation}' in {} cancelled", self.current),
                );
                return OperationStatus::Cancelled;
            }

            if self.retries < budget {
                self.retries += 1;
                tracing::warn!(
                    state = %self.current,
                    operation = %operation,
                    attempt = self.retries,
                    budget,
                    error = %error,
                    "operation failed; retrying"
                );
                self.notify(EngineNotification::Retrying {
                    state: self.current.clone(),
                    attempt: self.retries,
                });
                continue;
            }

            tracing::warn!(
                state = %self.current,
                operation = %operation,
                error = %error,
                "operation failed; retries exhausted"
            );
            return OperationStatus::Exhausted(FailureCause::Operation { operation, error });
        }
    }

    /// Take the error-recovery route out of the current state, or halt.
    ///
    /// `hops` counts escalations within one dispatch; a chain longer than
    /// the number of states is a recovery loop and halts the machine.
    fn escalate(
        &mut self,
        cause: FailureCause,
        hops: usize,
    ) -> Result<(String, FailureCause), DispatchOutcome> {
        let failed_state = self.current.clone();
        self.context
            .set_error_message(format!("{failed_state}: {cause}"));

        match self.config.recovery_for(&failed_state).map(str::to_string) {
            Some(target) if hops <= self.states.len() => {
                tracing::warn!(from = %failed_state, to = %target, cause = %cause, "escalating to recovery state");
                self.services.log().log(
                    LogLevel::Warn,
                    &format!("{failed_state} failed ({cause}); recovering to {target}"),
                );
                self.notify(EngineNotification::Escalated {
                    from: failed_state.clone(),
                    to: target.clone(),
                    cause: cause.to_string(),
                });
                self.switch_to(&target, cause.label(), None);
                Ok((failed_state, cause))
            }
            Some(target) => {
                tracing::error!(from = %failed_state, to = %target, hops, "recovery loop detected");
                Err(self.halt(failed_state, cause))
            }
            None => Err(self.halt(failed_state, cause)),
        }
    }

    fn halt(&mut self, failed_state: String, cause: FailureCause) -> DispatchOutcome {
        tracing::error!(state = %failed_state, cause = %cause, "no recovery route; halting");
        self.services.log().log(
            LogLevel::Error,
            &format!("{failed_state} failed ({cause}); halting in {FAULT_STATE}"),
        );
        self.notify(EngineNotification::Halted {
            state: failed_state.clone(),
            cause: cause.to_string(),
        });

        self.switch_to(FAULT_STATE, cause.label(), None);
        self.timer.disarm();
        self.halted = true;

        DispatchOutcome::Aborted {
            failed_state,
            cause,
        }
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("retries", &self.retries)
            .field("halted", &self.halted)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;
    use crate::context::CallbackError;
    use crate::services::{BroadcastPublisher, MemoryLogSink};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn cell_config() -> StateMachineConfig {
        StateMachineConfig::builder()
            .initial("Idle")
            .state(StateConfig::new("Idle").on("Start", "Calibrating"))
            .state(
                StateConfig::new("Calibrating")
                    .entry_action("home")
                    .on("CalibrationDone", "Ready")
                    .operation("calibrate")
                    .retry_count(2),
            )
            .state(StateConfig::new("Ready").on("Dispense", "Dispensing"))
            .state(
                StateConfig::new("Dispensing")
                    .operation("dispense")
                    .on("Done", "Ready")
                    .timeout_seconds(5.0),
            )
            .state(StateConfig::new("EmergencyStopped").on("Reset", "Idle"))
            .global("EmergencyStop", "EmergencyStopped")
            .recover("Calibrating", "EmergencyStopped")
            .emergency_event("EmergencyStop")
            .build()
            .unwrap()
    }

    fn counting(context: &mut Context, name: &str, fail_first: u32) -> Arc<AtomicU32> {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        context.register_callback(name, move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < fail_first {
                Err(CallbackError::failed(format!("attempt {n} failed")))
            } else {
                Ok(json!(n))
            }
        });
        calls
    }

    fn ready_machine(mut context: Context) -> StateMachine {
        counting(&mut context, "calibrate", 0);
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());
        machine.dispatch(&Event::new("Start"));
        machine.dispatch(&Event::new("CalibrationDone"));
        assert_eq!(machine.current_state(), "Ready");
        machine
    }

    #[test]
    fn start_enters_initial_state() {
        let mut machine = StateMachine::new(cell_config(), Context::new(), ServiceContainer::new());
        assert!(!machine.is_started());

        let outcome = machine.start();
        assert!(outcome.is_success());
        assert_eq!(machine.current_state(), "Idle");
        assert!(machine.history().is_empty());
    }

    #[test]
    fn local_then_global_dispatch() {
        let mut context = Context::new();
        counting(&mut context, "calibrate", 0);
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());

        machine.dispatch(&Event::new("Start"));
        assert_eq!(machine.current_state(), "Calibrating");

        machine.dispatch(&Event::new("EmergencyStop"));
        assert_eq!(machine.current_state(), "EmergencyStopped");
        assert_eq!(
            machine.history().get_path(),
            vec!["Idle", "Calibrating", "EmergencyStopped"]
        );
    }

    #[test]
    fn unknown_event_is_ignored_without_side_effects() {
        let mut machine = StateMachine::new(cell_config(), Context::new(), ServiceContainer::new());
        machine.start();
        machine.context_mut().set("bead", json!(1));
        let before = machine.context().data().clone();

        let outcome = machine.dispatch(&Event::new("Dispense"));

        assert_eq!(
            outcome,
            DispatchOutcome::Ignored {
                state: "Idle".into(),
                event: "Dispense".into()
            }
        );
        assert_eq!(machine.current_state(), "Idle");
        assert_eq!(machine.context().data(), &before);
    }

    #[test]
    fn retries_absorb_failures_within_budget() {
        let mut context = Context::new();
        let calls = counting(&mut context, "calibrate", 2);
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());

        let outcome = machine.dispatch(&Event::new("Start"));

        assert_eq!(
            outcome,
            DispatchOutcome::Transitioned {
                from: "Idle".into(),
                to: "Calibrating".into(),
                retries: 2
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(machine.context().operation_result(), &json!(2));
    }

    #[test]
    fn exhausted_retries_escalate_to_recovery_state() {
        let mut context = Context::new();
        let calls = counting(&mut context, "calibrate", u32::MAX);
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());

        let outcome = machine.dispatch(&Event::new("Start"));

        assert!(matches!(
            outcome,
            DispatchOutcome::Recovered { ref failed_state, ref to, .. }
                if failed_state == "Calibrating" && to == "EmergencyStopped"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(machine.current_state(), "EmergencyStopped");
        assert!(machine
            .context()
            .error_message()
            .unwrap()
            .contains("Calibrating"));
    }

    #[test]
    fn missing_recovery_route_halts_in_fault() {
        let mut context = Context::new();
        counting(&mut context, "dispense", u32::MAX);
        let mut machine = ready_machine(context);

        let outcome = machine.dispatch(&Event::new("Dispense"));

        assert!(matches!(outcome, DispatchOutcome::Aborted { ref failed_state, .. } if failed_state == "Dispensing"));
        assert_eq!(machine.current_state(), FAULT_STATE);
        assert!(machine.is_halted());
        assert!(machine.active_timer().is_none());

        let rejected = machine.dispatch(&Event::new("EmergencyStop"));
        assert!(matches!(rejected, DispatchOutcome::Rejected { .. }));
        assert_eq!(machine.current_state(), FAULT_STATE);
    }

    #[test]
    fn reset_leaves_fault() {
        let mut context = Context::new();
        counting(&mut context, "dispense", u32::MAX);
        let mut machine = ready_machine(context);
        machine.dispatch(&Event::new("Dispense"));
        assert!(machine.is_halted());

        let outcome = machine.reset();

        assert!(outcome.is_success());
        assert!(!machine.is_halted());
        assert_eq!(machine.current_state(), "Idle");
        assert!(machine.context().error_message().is_none());
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut context = Context::new();
        counting(&mut context, "dispense", 0);
        let mut machine = ready_machine(context);

        machine.dispatch(&Event::new("Dispense"));
        let stale = machine.active_timer().unwrap();
        assert_eq!(stale.duration, Duration::from_secs(5));

        machine.dispatch(&Event::new("Done"));
        assert_eq!(machine.current_state(), "Ready");
        assert_eq!(machine.expire_timeout(stale.generation), None);
        assert_eq!(machine.current_state(), "Ready");
    }

    #[test]
    fn timeout_without_retries_escalates() {
        let mut context = Context::new();
        counting(&mut context, "dispense", 0);
        let config = StateMachineConfig::builder()
            .initial("Ready")
            .state(StateConfig::new("Ready").on("Dispense", "Dispensing"))
            .state(StateConfig::new("Dispensing").operation("dispense"))
            .state(StateConfig::new("Safe"))
            .timeout("Dispensing", 1.5)
            .recover("default", "Safe")
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());

        machine.dispatch(&Event::new("Dispense"));
        let ticket = machine.active_timer().unwrap();
        assert_eq!(ticket.duration, Duration::from_millis(1500));

        let outcome = machine.expire_timeout(ticket.generation).unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Recovered { cause: FailureCause::Timeout { .. }, ref to, .. } if to == "Safe"
        ));
        assert_eq!(machine.current_state(), "Safe");
        assert_eq!(machine.history().last().unwrap().trigger, "TimeoutExceeded");
    }

    #[test]
    fn timeout_consumes_retry_and_rearms() {
        let mut context = Context::new();
        let calls = counting(&mut context, "dispense", 0);
        let config = StateMachineConfig::builder()
            .initial("Dispensing")
            .state(
                StateConfig::new("Dispensing")
                    .operation("dispense")
                    .timeout_seconds(2.0)
                    .retry_count(1),
            )
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());
        machine.start();

        let first = machine.active_timer().unwrap();
        let outcome = machine.expire_timeout(first.generation).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Retrying { attempt: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let second = machine.active_timer().unwrap();
        assert_ne!(first.generation, second.generation);

        let outcome = machine.expire_timeout(second.generation).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Aborted { .. }));
        assert!(machine.is_halted());
    }

    #[test]
    fn self_transition_reenters_the_state() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut context = Context::new();
        for (callback, label) in [("on_entry_open_valve", "entry"), ("on_exit_close_valve", "exit")] {
            let order = Arc::clone(&order);
            context.register_callback(callback, move |_, _| {
                order.lock().unwrap().push(label);
                Ok(Value::Null)
            });
        }
        let calls = counting(&mut context, "purge", 1);
        let config = StateMachineConfig::builder()
            .initial("Purging")
            .state(
                StateConfig::new("Purging")
                    .entry_action("open_valve")
                    .exit_action("close_valve")
                    .on("Again", "Purging")
                    .operation("purge")
                    .retry_count(2)
                    .timeout_seconds(5.0),
            )
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());
        machine.start();
        assert_eq!(machine.retries_used(), 1);
        let stale = machine.active_timer().unwrap();
        order.lock().unwrap().clear();

        let outcome = machine.dispatch(&Event::new("Again"));

        assert_eq!(
            outcome,
            DispatchOutcome::Transitioned {
                from: "Purging".into(),
                to: "Purging".into(),
                retries: 0
            }
        );
        assert_eq!(*order.lock().unwrap(), vec!["exit", "entry"]);
        assert_eq!(machine.retries_used(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let fresh = machine.active_timer().unwrap();
        assert_ne!(fresh.generation, stale.generation);
        assert_eq!(machine.expire_timeout(stale.generation), None);
        assert_eq!(machine.history().get_path(), vec!["Purging", "Purging"]);
    }

    #[test]
    fn timeout_escalation_counts_toward_the_recovery_bound() {
        let mut context = Context::new();
        let spins = counting(&mut context, "spin", u32::MAX);
        let config = StateMachineConfig::builder()
            .initial("Idle")
            .state(StateConfig::new("Idle").on("Go", "Waiting"))
            .state(StateConfig::new("Waiting").timeout_seconds(1.0))
            .state(StateConfig::new("Spinning").operation("spin"))
            .recover("Waiting", "Spinning")
            .recover("Spinning", "Spinning")
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());
        machine.dispatch(&Event::new("Go"));
        let ticket = machine.active_timer().unwrap();

        let outcome = machine.expire_timeout(ticket.generation).unwrap();

        assert!(matches!(outcome, DispatchOutcome::Aborted { .. }));
        assert_eq!(machine.current_state(), FAULT_STATE);
        // Three states allow three escalations, the timeout's included.
        assert_eq!(spins.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn recovery_loop_halts() {
        let mut context = Context::new();
        counting(&mut context, "spin", u32::MAX);
        let config = StateMachineConfig::builder()
            .initial("Idle")
            .state(StateConfig::new("Idle").on("Go", "Spinning"))
            .state(StateConfig::new("Spinning").operation("spin"))
            .recover("Spinning", "Spinning")
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());

        let outcome = machine.dispatch(&Event::new("Go"));

        assert!(matches!(outcome, DispatchOutcome::Aborted { .. }));
        assert_eq!(machine.current_state(), FAULT_STATE);
    }

    #[test]
    fn missing_operation_handler_is_a_failure() {
        let mut machine = StateMachine::new(cell_config(), Context::new(), ServiceContainer::new());

        let outcome = machine.dispatch(&Event::new("Start"));

        assert!(matches!(
            outcome,
            DispatchOutcome::Recovered {
                cause: FailureCause::Operation {
                    error: OperationError::Unavailable(_),
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn cancelled_operation_is_not_retried() {
        let mut context = Context::new();
        let calls = counting(&mut context, "calibrate", u32::MAX);
        context.cancellation().cancel();
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());

        let outcome = machine.dispatch(&Event::new("Start"));

        assert_eq!(
            outcome,
            DispatchOutcome::Cancelled {
                state: "Calibrating".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(machine.current_state(), "Calibrating");
    }

    #[test]
    fn payload_reaches_actions_and_operation() {
        let mut context = Context::new();
        context.register_callback("dispense", |params, _| {
            Ok(params.get("payload").cloned().unwrap_or(Value::Null))
        });
        let mut machine = ready_machine(context);

        machine.dispatch(&Event::with_payload("Dispense", json!({"volume_ml": 1.2})));

        assert_eq!(machine.context().operation_result(), &json!({"volume_ml": 1.2}));
        assert_eq!(
            machine.context().metadata(LAST_EVENT_KEY),
            Some(&json!("Dispense"))
        );
    }

    #[test]
    fn services_observe_the_run() {
        let log = Arc::new(MemoryLogSink::new());
        let publisher = BroadcastPublisher::new(32);
        let mut notifications = publisher.subscribe();
        let services = ServiceContainer::new()
            .with_shared_log_sink(log.clone())
            .with_publisher(publisher);
        let mut context = Context::new();
        counting(&mut context, "calibrate", 1);
        let mut machine = StateMachine::new(cell_config(), context, services);

        machine.dispatch(&Event::new("Start"));

        assert!(log
            .records()
            .iter()
            .any(|(level, message)| *level == LogLevel::Info && message.contains("Idle -> Calibrating")));
        let mut kinds = Vec::new();
        while let Ok(notification) = notifications.try_recv() {
            kinds.push(notification);
        }
        assert!(kinds.contains(&EngineNotification::Retrying {
            state: "Calibrating".into(),
            attempt: 1
        }));
    }

    #[test]
    fn configured_fault_state_runs_its_entry_actions() {
        let mut context = Context::new();
        counting(&mut context, "spin", u32::MAX);
        let parked = counting(&mut context, "on_entry_park", 0);
        let config = StateMachineConfig::builder()
            .initial("Spinning")
            .state(StateConfig::new("Spinning").operation("spin"))
            .state(StateConfig::new(FAULT_STATE).entry_action("park"))
            .build()
            .unwrap();
        let mut machine = StateMachine::new(config, context, ServiceContainer::new());

        machine.start();

        assert!(machine.is_halted());
        assert_eq!(parked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn checkpoint_resume_restores_run() {
        let mut context = Context::new();
        counting(&mut context, "calibrate", 0);
        let mut machine = StateMachine::new(cell_config(), context, ServiceContainer::new());
        machine.dispatch(&Event::new("Start"));
        machine.context_mut().set("bead_count", json!(12));

        let checkpoint = machine.checkpoint();
        let restored = StateMachine::resume(
            cell_config(),
            Context::new(),
            ServiceContainer::new(),
            checkpoint,
        )
        .unwrap();

        assert_eq!(restored.current_state(), "Calibrating");
        assert_eq!(restored.context().get("bead_count"), Some(&json!(12)));
        assert_eq!(restored.history().len(), machine.history().len());
        assert!(restored.is_started());
    }

    #[test]
    fn resume_rejects_unknown_state() {
        let machine = StateMachine::new(cell_config(), Context::new(), ServiceContainer::new());
        let mut checkpoint = machine.checkpoint();
        checkpoint.current_state = "Polishing".into();

        let result = StateMachine::resume(
            cell_config(),
            Context::new(),
            ServiceContainer::new(),
            checkpoint,
        );

        assert!(matches!(result, Err(CheckpointError::UnknownState { .. })));
    }
}
