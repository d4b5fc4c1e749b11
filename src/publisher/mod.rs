//! Periodic state publication.
//!
//! The publisher samples the engine's latest [`EngineSnapshot`] on a fixed
//! interval and hands it to a [`PublishSink`] (a GUI bridge, a telemetry
//! feed). It only ever reads the snapshot channel, so a slow sink delays
//! publications but never the dispatch loop.

use crate::engine::{EngineSnapshot, RuntimeError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Destination for published snapshots.
pub trait PublishSink: Send + 'static {
    fn publish(&mut self, snapshot: &EngineSnapshot);
}

impl<F> PublishSink for F
where
    F: FnMut(&EngineSnapshot) + Send + 'static,
{
    fn publish(&mut self, snapshot: &EngineSnapshot) {
        self(snapshot)
    }
}

/// Spawns publisher tasks.
pub struct StatePublisher;

impl StatePublisher {
    /// Publish the current snapshot every `interval` until stopped.
    ///
    /// Each publication carries the time it was sampled, not the time the
    /// engine last changed.
    pub fn spawn(
        mut snapshots: watch::Receiver<EngineSnapshot>,
        interval: Duration,
        mut sink: impl PublishSink,
    ) -> PublisherHandle {
        let (stop, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut published = 0u64;

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::debug!(published, "state publisher stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snapshot = snapshots.borrow_and_update().restamped();
                        tracing::trace!(state = %snapshot.state, sequence = snapshot.sequence, "publishing state");
                        sink.publish(&snapshot);
                        published += 1;
                    }
                }
            }

            published
        });

        PublisherHandle { stop, task }
    }
}

/// Control for a running publisher. Dropping it stops the task.
#[derive(Debug)]
pub struct PublisherHandle {
    stop: mpsc::Sender<()>,
    task: JoinHandle<u64>,
}

impl PublisherHandle {
    /// Stop publishing and wait for the task. Returns how many snapshots
    /// were published.
    pub async fn stop(self) -> Result<u64, RuntimeError> {
        let _ = self.stop.send(()).await;
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn snapshot(state: &str, sequence: u64) -> EngineSnapshot {
        EngineSnapshot {
            state: state.into(),
            operation_result: Value::Null,
            error_message: None,
            timestamp: Utc::now(),
            halted: false,
            sequence,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_latest_snapshot_each_interval() {
        let (tx, rx) = watch::channel(snapshot("Idle", 0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);

        let publisher = StatePublisher::spawn(rx, Duration::from_millis(100), move |s: &EngineSnapshot| {
            sink_seen.lock().unwrap().push(s.state.clone());
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send_replace(snapshot("Ready", 1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let published = publisher.stop().await.unwrap();
        let seen = seen.lock().unwrap().clone();

        assert_eq!(published as usize, seen.len());
        assert_eq!(seen.first().map(String::as_str), Some("Idle"));
        assert_eq!(seen.last().map(String::as_str), Some("Ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn publications_are_restamped() {
        let stale = Utc::now() - chrono::Duration::seconds(30);
        let mut initial = snapshot("Idle", 0);
        initial.timestamp = stale;
        let (_tx, rx) = watch::channel(initial);
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink_stamps = Arc::clone(&stamps);

        let publisher = StatePublisher::spawn(rx, Duration::from_millis(10), move |s: &EngineSnapshot| {
            sink_stamps.lock().unwrap().push(s.timestamp);
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        publisher.stop().await.unwrap();

        assert!(stamps.lock().unwrap().iter().all(|t| *t > stale));
    }
}
