//! Immutable engine status for publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time view of the engine, swapped in atomically after every
/// processed command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: String,
    pub operation_result: Value,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub halted: bool,
    /// Number of commands the engine has processed
    pub sequence: u64,
}

impl EngineSnapshot {
    /// Copy of this snapshot stamped with the current time.
    pub fn restamped(&self) -> Self {
        Self {
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restamp_keeps_content() {
        let snapshot = EngineSnapshot {
            state: "Ready".into(),
            operation_result: Value::from(3),
            error_message: None,
            timestamp: Utc::now() - chrono::Duration::seconds(10),
            halted: false,
            sequence: 4,
        };

        let fresh = snapshot.restamped();
        assert_eq!(fresh.state, "Ready");
        assert_eq!(fresh.sequence, 4);
        assert!(fresh.timestamp > snapshot.timestamp);
    }
}
