//! Async shell around [`StateMachine`].
//!
//! One tokio task owns the machine and drains a bounded command queue, so
//! events are processed strictly one at a time in arrival order. Readers
//! never touch the machine; they read the [`EngineSnapshot`] the task
//! swaps into a watch channel after every command.
//!
//! Emergency events are the exception to strict queueing: submitting one
//! trips the context's cancellation signal immediately, so an operation
//! still running for an earlier event can abandon its work. The loop clears
//! the signal when it reaches the emergency event itself.
//!
//! Callbacks are blocking code, so each command runs on tokio's blocking
//! pool. The task itself only waits, which keeps submitters, readers and
//! the publisher moving on any runtime flavor.

use super::machine::StateMachine;
use super::outcome::DispatchOutcome;
use super::snapshot::EngineSnapshot;
use crate::config::RuntimeConfig;
use crate::context::CancellationSignal;
use crate::core::Event;
use crate::publisher::{PublishSink, PublisherHandle, StatePublisher};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Errors surfaced by the async runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Engine task is no longer running")]
    Closed,

    #[error("Engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a submitter gets back once its event has been processed.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitResponse {
    pub success: bool,
    pub result: Value,
    pub error_message: Option<String>,
    /// State the machine settled in
    pub state: String,
    pub outcome: DispatchOutcome,
}

impl SubmitResponse {
    fn from_outcome(machine: &StateMachine, outcome: DispatchOutcome) -> Self {
        let success = outcome.is_success();
        let error_message = if success {
            None
        } else {
            match &outcome {
                DispatchOutcome::Ignored { state, event } => {
                    Some(format!("event '{event}' not handled in state '{state}'"))
                }
                DispatchOutcome::Rejected { state, event } => {
                    Some(format!("event '{event}' rejected: machine halted in '{state}'"))
                }
                _ => machine.context().error_message().map(str::to_string),
            }
        };

        Self {
            success,
            result: machine.context().operation_result().clone(),
            error_message,
            state: machine.current_state().to_string(),
            outcome,
        }
    }
}

enum Command {
    Submit {
        event: Event,
        reply: oneshot::Sender<SubmitResponse>,
    },
    Reset {
        reply: oneshot::Sender<SubmitResponse>,
    },
}

/// Cancellation tripped for an emergency event that is not queued yet.
///
/// The signal is raised immediately so a blocking operation can give way
/// while the submitter waits for queue space. Dropping the guard before
/// [`commit`](PendingCancel::commit) lowers it again.
struct PendingCancel<'a> {
    signal: &'a CancellationSignal,
    committed: bool,
}

impl<'a> PendingCancel<'a> {
    fn trip(signal: &'a CancellationSignal, event: &Event) -> Self {
        tracing::warn!(event = %event, "emergency event submitted; cancelling in-flight work");
        signal.cancel();
        Self {
            signal,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingCancel<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!("emergency event was never queued; clearing cancellation");
            self.signal.reset();
        }
    }
}

/// Cloneable front door to a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    cancel: CancellationSignal,
    emergency_events: Arc<[String]>,
}

impl EngineHandle {
    /// Queue an event and wait for it to be processed.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        payload: Value,
    ) -> Result<SubmitResponse, RuntimeError> {
        self.submit_event(Event::with_payload(name, payload)).await
    }

    pub async fn submit_event(&self, event: Event) -> Result<SubmitResponse, RuntimeError> {
        let pending = self
            .emergency_events
            .iter()
            .any(|e| e == event.name())
            .then(|| PendingCancel::trip(&self.cancel, &event));

        let permit = self
            .commands
            .reserve()
            .await
            .map_err(|_| RuntimeError::Closed)?;
        if let Some(pending) = pending {
            pending.commit();
        }

        let (reply, response) = oneshot::channel();
        permit.send(Command::Submit { event, reply });
        response.await.map_err(|_| RuntimeError::Closed)
    }

    /// Return the machine to its initial state, leaving the fault state if
    /// it halted.
    pub async fn reset(&self) -> Result<SubmitResponse, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Reset { reply })
            .await
            .map_err(|_| RuntimeError::Closed)?;
        response.await.map_err(|_| RuntimeError::Closed)
    }

    /// Latest published status. Never waits on the engine.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn current_state(&self) -> String {
        self.snapshots.borrow().state.clone()
    }

    /// Receiver notified after every processed command.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }
}

/// A running engine task.
///
/// Dropping the runtime (or calling [`shutdown`]) stops the task once the
/// command it is processing completes.
///
/// [`shutdown`]: EngineRuntime::shutdown
#[derive(Debug)]
pub struct EngineRuntime {
    handle: EngineHandle,
    stop: mpsc::Sender<()>,
    task: JoinHandle<Result<StateMachine, RuntimeError>>,
    publish_interval: Duration,
}

impl EngineRuntime {
    /// Start `machine` (if it is not already) and move it into a task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut machine: StateMachine, config: &RuntimeConfig) -> Self {
        if !machine.is_started() {
            machine.start();
        }

        let (commands, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (stop, stop_rx) = mpsc::channel(1);
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());

        let handle = EngineHandle {
            commands,
            snapshots,
            cancel: machine.context().cancellation().clone(),
            emergency_events: machine.config().emergency_events().into(),
        };

        tracing::info!(state = %machine.current_state(), "engine task starting");
        let task = tokio::spawn(run(machine, receiver, stop_rx, snapshot_tx));

        Self {
            handle,
            stop,
            task,
            publish_interval: config.publish_interval(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Sample snapshots into `sink` at the configured publish interval.
    pub fn publish_to(&self, sink: impl PublishSink) -> PublisherHandle {
        StatePublisher::spawn(self.handle.subscribe(), self.publish_interval, sink)
    }

    /// Stop the task and hand the machine back.
    pub async fn shutdown(self) -> Result<StateMachine, RuntimeError> {
        // The task may already be gone; joining reports that.
        let _ = self.stop.send(()).await;
        self.task.await?
    }
}

enum Work {
    Command(Command),
    Expire(u64),
}

fn handle_command(machine: &mut StateMachine, command: Command) {
    match command {
        Command::Submit { event, reply } => {
            if machine.is_emergency_event(event.name()) {
                machine.context().cancellation().reset();
            }
            let outcome = machine.dispatch(&event);
            tracing::debug!(event = %event, outcome = ?outcome, "event processed");
            // The submitter may have stopped waiting.
            let _ = reply.send(SubmitResponse::from_outcome(machine, outcome));
        }
        Command::Reset { reply } => {
            let outcome = machine.reset();
            let _ = reply.send(SubmitResponse::from_outcome(machine, outcome));
        }
    }
}

fn process(machine: &mut StateMachine, work: Work) {
    match work {
        Work::Command(command) => handle_command(machine, command),
        Work::Expire(generation) => {
            if let Some(outcome) = machine.expire_timeout(generation) {
                tracing::debug!(outcome = ?outcome, "timeout processed");
            }
        }
    }
}

async fn run(
    mut machine: StateMachine,
    mut commands: mpsc::Receiver<Command>,
    mut stop: mpsc::Receiver<()>,
    snapshots: watch::Sender<EngineSnapshot>,
) -> Result<StateMachine, RuntimeError> {
    loop {
        // The deadline counts from state entry, not from when the entering
        // command finished.
        let timer = machine.active_timer();
        let deadline = timer.map(|ticket| ticket.deadline());

        let work = tokio::select! {
            biased;

            _ = stop.recv() => {
                tracing::debug!("engine task stopping");
                break;
            }

            command = commands.recv() => match command {
                Some(command) => Work::Command(command),
                None => {
                    tracing::debug!("all engine handles dropped");
                    break;
                }
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                match timer {
                    Some(ticket) => Work::Expire(ticket.generation),
                    None => continue,
                }
            }
        };

        // Callbacks block. The machine visits the blocking pool for each
        // unit of work so submitters and the publisher keep running, even
        // on a current-thread runtime.
        machine = tokio::task::spawn_blocking(move || {
            process(&mut machine, work);
            machine
        })
        .await?;

        snapshots.send_replace(machine.snapshot());
    }

    Ok(machine)
}
