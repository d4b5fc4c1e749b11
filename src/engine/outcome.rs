//! Results of dispatching events and supervising timeouts.

use crate::services::OperationError;
use std::fmt;
use std::time::Duration;

/// Why a state's work was considered failed.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureCause {
    /// The state's designated operation reported a failure
    Operation {
        operation: String,
        error: OperationError,
    },

    /// The state stayed resident past its timeout
    Timeout { state: String, after: Duration },
}

impl FailureCause {
    /// Short label used as the trigger of recovery transitions.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Operation { .. } => "OperationFailure",
            Self::Timeout { .. } => "TimeoutExceeded",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { operation, error } => {
                write!(f, "operation '{operation}' failed: {error}")
            }
            Self::Timeout { state, after } => {
                write!(f, "state '{state}' timed out after {after:?}")
            }
        }
    }
}

/// Result of one dispatch (or one timeout expiry).
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Moved to a new state (or re-entered the same one) and its
    /// operation, if any, completed
    Transitioned {
        from: String,
        to: String,
        retries: u32,
    },

    /// No local or global transition matched; nothing changed
    Ignored { state: String, event: String },

    /// A timeout was absorbed by the retry budget
    Retrying {
        state: String,
        attempt: u32,
        cause: FailureCause,
    },

    /// Retries ran out and the error-recovery route was taken
    Recovered {
        failed_state: String,
        to: String,
        cause: FailureCause,
    },

    /// No recovery route existed; the machine halted in its fault state
    Aborted {
        failed_state: String,
        cause: FailureCause,
    },

    /// Work was abandoned because an emergency event is pending
    Cancelled { state: String },

    /// The machine is halted and refuses further events
    Rejected { state: String, event: String },
}

impl DispatchOutcome {
    /// True when the triggering event did what it asked without failure.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Transitioned { .. } | Self::Retrying { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_clean_outcomes_are_successes() {
        let cause = FailureCause::Timeout {
            state: "Spraying".into(),
            after: Duration::from_secs(3),
        };

        assert!(DispatchOutcome::Transitioned {
            from: "Idle".into(),
            to: "Spraying".into(),
            retries: 0
        }
        .is_success());
        assert!(!DispatchOutcome::Ignored {
            state: "Idle".into(),
            event: "Nope".into()
        }
        .is_success());
        assert!(!DispatchOutcome::Aborted {
            failed_state: "Spraying".into(),
            cause
        }
        .is_success());
    }

    #[test]
    fn failure_cause_display() {
        let cause = FailureCause::Operation {
            operation: "calibrate_camera".into(),
            error: OperationError::Failed("no markers found".into()),
        };
        assert_eq!(
            cause.to_string(),
            "operation 'calibrate_camera' failed: Operation failed: no markers found"
        );
        assert_eq!(cause.label(), "OperationFailure");
    }
}
