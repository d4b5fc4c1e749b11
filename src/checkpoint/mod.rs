//! Checkpoint and resume for long-running cells.
//!
//! A [`Checkpoint`] captures the current state, transition history and the
//! context's data so a run survives a controller restart. Callbacks are
//! code and are not captured; the resuming process registers them again
//! before calling [`StateMachine::resume`](crate::engine::StateMachine::resume).

use crate::core::StateHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable capture of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: Uuid,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Initial state of the configuration the run used
    pub initial_state: String,

    pub current_state: String,

    /// Whether the run had halted in its fault state
    pub halted: bool,

    /// Retries already spent in `current_state`
    pub retries: u32,

    /// Complete transition history
    pub history: StateHistory,

    #[serde(with = "json_text")]
    pub data: Map<String, Value>,

    #[serde(with = "json_text")]
    pub metadata: Map<String, Value>,

    #[serde(with = "json_text")]
    pub operation_result: Value,

    pub error_message: Option<String>,
}

impl Checkpoint {
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if self.current_state.is_empty() {
            return Err(CheckpointError::ValidationFailed(
                "current state is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Compact binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: Self = bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

/// Free-form JSON values are carried as JSON text so that formats which
/// are not self-describing (bincode) can encode them.
mod json_text {
    use serde::de::{DeserializeOwned, Error as _};
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        let text = serde_json::to_string(value).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StateTransition;
    use serde_json::json;

    fn checkpoint() -> Checkpoint {
        let mut history = StateHistory::new();
        history.push(StateTransition {
            from: "Idle".into(),
            to: "Calibrating".into(),
            trigger: "Start".into(),
            timestamp: Utc::now(),
            attempt: 0,
        });

        let mut data = Map::new();
        data.insert("bead_width_mm".into(), json!(2.5));
        data.insert("path".into(), json!([[0, 0], [10, 5]]));

        Checkpoint {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            initial_state: "Idle".into(),
            current_state: "Calibrating".into(),
            halted: false,
            retries: 1,
            history,
            data,
            metadata: Map::new(),
            operation_result: json!({"offset_mm": 0.1}),
            error_message: Some("calibrate failed once".into()),
        }
    }

    #[test]
    fn json_round_trip() {
        let original = checkpoint();
        let restored = Checkpoint::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn binary_round_trip_keeps_json_values() {
        let original = checkpoint();
        let restored = Checkpoint::from_bytes(&original.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.data, original.data);
        assert_eq!(restored.operation_result, json!({"offset_mm": 0.1}));
        assert_eq!(restored.history.get_path(), vec!["Idle", "Calibrating"]);
    }

    #[test]
    fn rejects_future_version() {
        let mut future = checkpoint();
        future.version = CHECKPOINT_VERSION + 1;

        let result = Checkpoint::from_json(&future.to_json().unwrap());

        assert!(matches!(
            result,
            Err(CheckpointError::UnsupportedVersion { found, .. }) if found == CHECKPOINT_VERSION + 1
        ));
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        assert!(matches!(
            Checkpoint::from_json("{ not json"),
            Err(CheckpointError::DeserializationFailed(_))
        ));
        assert!(matches!(
            Checkpoint::from_bytes(&[1, 2, 3]),
            Err(CheckpointError::DeserializationFailed(_))
        ));
    }
}
