//! Configuration validation.
//!
//! Every invariant is checked independently and the results are combined
//! with Stillwater's `Validation`, so a broken document reports all of its
//! problems in one pass instead of the first one found.

use super::error::{ConfigValidationError, ConfigViolation};
use super::schema::{ConfigDocument, StateConfig, StateMachineConfig, DEFAULT_RECOVERY_KEY};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<ConfigViolation>>;

fn check(ok: bool, violation: impl FnOnce() -> ConfigViolation) -> Check {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(violation())
    }
}

fn valid_timeout(seconds: f64) -> bool {
    seconds > 0.0 && Duration::try_from_secs_f64(seconds).is_ok()
}

/// Record a violation for every key seen more than once.
fn duplicate_keys<'a, T: 'a>(
    entries: impl IntoIterator<Item = &'a (String, T)>,
    violation: impl Fn(&str) -> ConfigViolation,
) -> Vec<Check> {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    let mut checks = Vec::new();
    for (key, _) in entries {
        if !seen.insert(key.as_str()) && reported.insert(key.as_str()) {
            checks.push(Validation::fail(violation(key)));
        }
    }
    checks
}

pub(crate) fn validate(
    document: ConfigDocument,
) -> Result<StateMachineConfig, ConfigValidationError> {
    let names: BTreeSet<&str> = document.states.iter().map(|(k, _)| k.as_str()).collect();
    let mut checks: Vec<Check> = Vec::new();

    // Initial state
    if document.initial_state.is_empty() {
        checks.push(Validation::fail(ConfigViolation::MissingInitialState));
    } else {
        checks.push(check(names.contains(document.initial_state.as_str()), || {
            ConfigViolation::UnknownInitialState {
                initial: document.initial_state.clone(),
            }
        }));
    }

    checks.extend(duplicate_keys(&document.states, |name| {
        ConfigViolation::DuplicateState {
            name: name.to_string(),
        }
    }));

    // Per-state checks
    for (key, state) in &document.states {
        if let Some(name) = &state.name {
            checks.push(check(name == key, || ConfigViolation::NameMismatch {
                key: key.clone(),
                name: name.clone(),
            }));
        }

        checks.extend(duplicate_keys(&state.transitions, |event| {
            ConfigViolation::DuplicateKey {
                section: format!("transitions of state '{key}'"),
                key: event.to_string(),
            }
        }));

        for (event, target) in &state.transitions {
            checks.push(check(names.contains(target.as_str()), || {
                ConfigViolation::UnknownTransitionTarget {
                    state: key.clone(),
                    event: event.clone(),
                    target: target.clone(),
                }
            }));
        }

        checks.push(check(u32::try_from(state.retry_count).is_ok(), || {
            ConfigViolation::InvalidRetryCount {
                state: key.clone(),
                retry_count: state.retry_count,
            }
        }));

        if let Some(seconds) = state.timeout_seconds {
            checks.push(check(valid_timeout(seconds), || {
                ConfigViolation::InvalidTimeout {
                    state: key.clone(),
                    seconds,
                }
            }));
        }
    }

    // Global transitions
    checks.extend(duplicate_keys(&document.global_transitions, |event| {
        ConfigViolation::DuplicateKey {
            section: "global_transitions".to_string(),
            key: event.to_string(),
        }
    }));
    for (event, target) in &document.global_transitions {
        checks.push(check(names.contains(target.as_str()), || {
            ConfigViolation::UnknownGlobalTarget {
                event: event.clone(),
                target: target.clone(),
            }
        }));
    }

    // Error recovery
    checks.extend(duplicate_keys(&document.error_recovery, |source| {
        ConfigViolation::DuplicateKey {
            section: "error_recovery".to_string(),
            key: source.to_string(),
        }
    }));
    for (source, target) in &document.error_recovery {
        checks.push(check(
            source == DEFAULT_RECOVERY_KEY || names.contains(source.as_str()),
            || ConfigViolation::UnknownRecoverySource {
                source_state: source.clone(),
            },
        ));
        checks.push(check(names.contains(target.as_str()), || {
            ConfigViolation::UnknownRecoveryTarget {
                source_state: source.clone(),
                target: target.clone(),
            }
        }));
    }

    // Global timeouts
    checks.extend(duplicate_keys(&document.timeouts, |state| {
        ConfigViolation::DuplicateKey {
            section: "timeouts".to_string(),
            key: state.to_string(),
        }
    }));
    for (state, seconds) in &document.timeouts {
        checks.push(check(names.contains(state.as_str()), || {
            ConfigViolation::UnknownTimeoutState {
                state: state.clone(),
            }
        }));
        checks.push(check(valid_timeout(*seconds), || {
            ConfigViolation::InvalidTimeout {
                state: state.clone(),
                seconds: *seconds,
            }
        }));
    }

    // Emergency events
    for event in &document.emergency_events {
        checks.push(check(
            document.global_transitions.iter().any(|(e, _)| e == event),
            || ConfigViolation::UnknownEmergencyEvent {
                event: event.clone(),
            },
        ));
    }

    match Validation::all_vec(checks).map(|_| ()) {
        Validation::Success(()) => Ok(assemble(document)),
        Validation::Failure(errors) => Err(ConfigValidationError::new(
            errors.iter().cloned().collect(),
        )),
    }
}

/// Build the validated configuration. Only called once every check passed.
fn assemble(document: ConfigDocument) -> StateMachineConfig {
    let states = document
        .states
        .into_iter()
        .map(|(key, state)| {
            let config = StateConfig {
                name: key.clone(),
                entry_actions: state.entry_actions,
                exit_actions: state.exit_actions,
                transitions: state.transitions.into_iter().collect(),
                operation_type: state.operation_type,
                timeout_seconds: state.timeout_seconds,
                retry_count: u32::try_from(state.retry_count).unwrap_or_default(),
            };
            (key, config)
        })
        .collect::<BTreeMap<_, _>>();

    StateMachineConfig {
        initial_state: document.initial_state,
        states,
        global_transitions: document.global_transitions.into_iter().collect(),
        error_recovery: document.error_recovery.into_iter().collect(),
        timeouts: document.timeouts.into_iter().collect(),
        emergency_events: document.emergency_events,
    }
}
