//! Settings for the dispatch loop and the state publisher.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings, loadable alongside the state-machine document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capacity of the event queue in front of the dispatch loop
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between state publications, in milliseconds
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
}

impl RuntimeConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            publish_interval_ms: default_publish_interval(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_publish_interval() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "queue_capacity": 8 }"#).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.publish_interval_ms, 250);
        assert_eq!(config.publish_interval(), Duration::from_millis(250));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = RuntimeConfig {
            publish_interval_ms: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.publish_interval(), Duration::from_millis(1));
    }
}
