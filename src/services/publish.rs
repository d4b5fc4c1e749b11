//! Engine notification role.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Something observers may want to react to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineNotification {
    Transitioned {
        from: String,
        to: String,
        trigger: String,
    },
    Ignored {
        state: String,
        event: String,
    },
    OperationFailed {
        state: String,
        attempt: u32,
        error: String,
    },
    Retrying {
        state: String,
        attempt: u32,
    },
    TimedOut {
        state: String,
    },
    Escalated {
        from: String,
        to: String,
        cause: String,
    },
    Halted {
        state: String,
        cause: String,
    },
}

/// Publishes engine notifications to collaborators (GUI, telemetry).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, notification: &EngineNotification);
}

/// Drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _notification: &EngineNotification) {}
}

/// Fans notifications out to any number of subscribers.
///
/// Publishing never blocks; slow subscribers lag and lose the oldest
/// notifications.
#[derive(Clone, Debug)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<EngineNotification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, notification: &EngineNotification) {
        // No subscribers is not an error.
        let _ = self.sender.send(notification.clone());
    }
}
