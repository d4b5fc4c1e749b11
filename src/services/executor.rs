//! Operation execution role.

use crate::context::{CallbackError, Context};
use serde_json::{Map, Value};
use thiserror::Error;

/// A request to perform a state's designated operation.
#[derive(Clone, Copy, Debug)]
pub struct OperationRequest<'a> {
    pub state: &'a str,
    pub operation: &'a str,
    /// Zero for the first try, incremented on every retry
    pub attempt: u32,
    pub payload: Option<&'a Value>,
}

/// Why an operation did not complete.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OperationError {
    #[error("No handler available for operation '{0}'")]
    Unavailable(String),

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<CallbackError> for OperationError {
    fn from(error: CallbackError) -> Self {
        match error {
            CallbackError::Failed(reason) => Self::Failed(reason),
            CallbackError::Cancelled => Self::Cancelled,
        }
    }
}

/// Performs named operations on behalf of the engine.
///
/// Implementations decide what an operation means: a robot driver, a
/// simulator or a test double.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        request: &OperationRequest<'_>,
        context: &mut Context,
    ) -> Result<Value, OperationError>;
}

/// Runs the context callback registered under the operation's name.
///
/// An operation nobody registered a handler for is a failure, unlike
/// entry/exit actions which are inert when unregistered.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallbackActionExecutor;

impl ActionExecutor for CallbackActionExecutor {
    fn execute(
        &self,
        request: &OperationRequest<'_>,
        context: &mut Context,
    ) -> Result<Value, OperationError> {
        if !context.has_callback(request.operation) {
            return Err(OperationError::Unavailable(request.operation.to_string()));
        }

        let mut params = Map::new();
        params.insert("state".into(), Value::from(request.state));
        params.insert("operation".into(), Value::from(request.operation));
        params.insert("attempt".into(), Value::from(request.attempt));
        params.insert("context".into(), Value::Object(context.data().clone()));
        if let Some(payload) = request.payload {
            params.insert("payload".into(), payload.clone());
        }

        Ok(context.execute_callback(request.operation, params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(operation: &str) -> OperationRequest<'_> {
        OperationRequest {
            state: "Spraying",
            operation,
            attempt: 1,
            payload: None,
        }
    }

    #[test]
    fn missing_handler_is_unavailable() {
        let mut context = Context::new();
        let result = CallbackActionExecutor.execute(&request("spray_path"), &mut context);
        assert_eq!(
            result,
            Err(OperationError::Unavailable("spray_path".into()))
        );
    }

    #[test]
    fn runs_registered_callback() {
        let mut context = Context::new();
        context.register_callback("spray_path", |params, _data| {
            Ok(json!({ "attempt": params.get("attempt"), "state": params.get("state") }))
        });

        let result = CallbackActionExecutor
            .execute(&request("spray_path"), &mut context)
            .unwrap();

        assert_eq!(result, json!({ "attempt": 1, "state": "Spraying" }));
    }

    #[test]
    fn callback_errors_map_to_operation_errors() {
        let mut context = Context::new();
        context.register_callback("spray_path", |_p, _d| {
            Err(CallbackError::failed("nozzle clogged"))
        });

        let result = CallbackActionExecutor.execute(&request("spray_path"), &mut context);

        assert_eq!(result, Err(OperationError::Failed("nozzle clogged".into())));
        assert!(context.error_message().unwrap().contains("nozzle clogged"));
    }
}
