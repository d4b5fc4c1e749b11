//! Declarative state-machine schema.

use super::error::{ConfigError, ConfigValidationError};
use super::validate;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Error-recovery key consulted when no state-specific route exists.
pub const DEFAULT_RECOVERY_KEY: &str = "default";

/// Declarative description of one state.
///
/// The fluent methods make programmatic configuration read like the JSON
/// document it mirrors.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::config::StateConfig;
///
/// let calibrating = StateConfig::new("Calibrating")
///     .entry_action("home_robot")
///     .entry_action("light_on")
///     .exit_action("light_off")
///     .on("CalibrationDone", "Ready")
///     .operation("calibrate_camera")
///     .timeout_seconds(30.0)
///     .retry_count(2);
///
/// assert_eq!(calibrating.entry_actions, vec!["home_robot", "light_on"]);
/// assert_eq!(calibrating.transitions["CalibrationDone"], "Ready");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateConfig {
    pub name: String,
    pub entry_actions: Vec<String>,
    pub exit_actions: Vec<String>,
    pub transitions: BTreeMap<String, String>,
    pub operation_type: Option<String>,
    pub timeout_seconds: Option<f64>,
    pub retry_count: u32,
}

impl StateConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            transitions: BTreeMap::new(),
            operation_type: None,
            timeout_seconds: None,
            retry_count: 0,
        }
    }

    pub fn entry_action(mut self, action: impl Into<String>) -> Self {
        self.entry_actions.push(action.into());
        self
    }

    pub fn exit_action(mut self, action: impl Into<String>) -> Self {
        self.exit_actions.push(action.into());
        self
    }

    /// Add a local transition taken when `event` arrives in this state.
    pub fn on(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.transitions.insert(event.into(), target.into());
        self
    }

    pub fn operation(mut self, operation_type: impl Into<String>) -> Self {
        self.operation_type = Some(operation_type.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }
}

/// Validated, immutable state-machine configuration.
///
/// Instances only exist once every invariant has been checked; use
/// [`StateMachineConfig::from_json_str`] or
/// [`StateMachineConfig::builder`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateMachineConfig {
    pub(crate) initial_state: String,
    pub(crate) states: BTreeMap<String, StateConfig>,
    pub(crate) global_transitions: BTreeMap<String, String>,
    pub(crate) error_recovery: BTreeMap<String, String>,
    pub(crate) timeouts: BTreeMap<String, f64>,
    pub(crate) emergency_events: Vec<String>,
}

impl StateMachineConfig {
    /// Start a fluent builder.
    pub fn builder() -> super::builder::StateMachineConfigBuilder {
        super::builder::StateMachineConfigBuilder::new()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument = serde_json::from_str(json)?;
        Ok(document.validate()?)
    }

    /// Validate an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let document: ConfigDocument = serde_json::from_value(value)?;
        Ok(document.validate()?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn states(&self) -> &BTreeMap<String, StateConfig> {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&StateConfig> {
        self.states.get(name)
    }

    pub fn contains_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn global_transitions(&self) -> &BTreeMap<String, String> {
        &self.global_transitions
    }

    pub fn error_recovery(&self) -> &BTreeMap<String, String> {
        &self.error_recovery
    }

    pub fn timeouts(&self) -> &BTreeMap<String, f64> {
        &self.timeouts
    }

    pub fn emergency_events(&self) -> &[String] {
        &self.emergency_events
    }

    pub fn is_emergency_event(&self, event: &str) -> bool {
        self.emergency_events.iter().any(|e| e == event)
    }

    /// Timeout for `state`: the state's own setting wins over the global map.
    pub fn timeout_for(&self, state: &str) -> Option<Duration> {
        self.states
            .get(state)
            .and_then(|s| s.timeout_seconds)
            .or_else(|| self.timeouts.get(state).copied())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Recovery target for a failure in `state`, falling back to `"default"`.
    pub fn recovery_for(&self, state: &str) -> Option<&str> {
        self.error_recovery
            .get(state)
            .or_else(|| self.error_recovery.get(DEFAULT_RECOVERY_KEY))
            .map(String::as_str)
    }
}

impl TryFrom<ConfigDocument> for StateMachineConfig {
    type Error = ConfigValidationError;

    fn try_from(document: ConfigDocument) -> Result<Self, Self::Error> {
        document.validate()
    }
}

impl<'de> Deserialize<'de> for StateMachineConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = ConfigDocument::deserialize(deserializer)?;
        document.validate().map_err(serde::de::Error::custom)
    }
}

/// Unvalidated configuration exactly as written.
///
/// Maps are kept as ordered entry lists so duplicate keys in the source
/// document survive parsing and can be reported. Unknown keys are parse
/// errors so a misspelled section is never silently dropped.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub initial_state: String,
    #[serde(default, deserialize_with = "entries")]
    pub states: Vec<(String, StateDocument)>,
    #[serde(default, deserialize_with = "entries")]
    pub global_transitions: Vec<(String, String)>,
    #[serde(default, deserialize_with = "entries")]
    pub error_recovery: Vec<(String, String)>,
    #[serde(default, deserialize_with = "entries")]
    pub timeouts: Vec<(String, f64)>,
    #[serde(default)]
    pub emergency_events: Vec<String>,
}

impl ConfigDocument {
    /// Check every invariant, reporting all violations at once.
    pub fn validate(self) -> Result<StateMachineConfig, ConfigValidationError> {
        validate::validate(self)
    }
}

/// Unvalidated state entry.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entry_actions: Vec<String>,
    #[serde(default)]
    pub exit_actions: Vec<String>,
    #[serde(default, deserialize_with = "entries")]
    pub transitions: Vec<(String, String)>,
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub retry_count: i64,
}

impl From<StateConfig> for StateDocument {
    fn from(state: StateConfig) -> Self {
        Self {
            name: Some(state.name),
            entry_actions: state.entry_actions,
            exit_actions: state.exit_actions,
            transitions: state.transitions.into_iter().collect(),
            operation_type: state.operation_type,
            timeout_seconds: state.timeout_seconds,
            retry_count: i64::from(state.retry_count),
        }
    }
}

/// Deserialize a JSON object into its entries, keeping duplicates.
fn entries<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct EntriesVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}
