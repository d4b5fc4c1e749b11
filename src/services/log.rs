//! Operator-facing logging role.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives the engine's operator-facing records: transitions, failures,
/// recoveries and halts.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards records to `tracing` under the `cobot_fsm::operator` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "cobot_fsm::operator", "{message}"),
            LogLevel::Info => tracing::info!(target: "cobot_fsm::operator", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "cobot_fsm::operator", "{message}"),
            LogLevel::Error => tracing::error!(target: "cobot_fsm::operator", "{message}"),
        }
    }
}

/// Keeps records in memory, for simulators and tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_string()));
        }
    }
}
