//! Service Container: collaborator roles injected into the engine.
//!
//! The engine depends only on these roles, never on concrete
//! collaborators, so the same engine runs against a real robot driver or
//! a simulator.

mod executor;
mod log;
mod publish;

pub use executor::{ActionExecutor, CallbackActionExecutor, OperationError, OperationRequest};
pub use log::{LogLevel, LogSink, MemoryLogSink, TracingLogSink};
pub use publish::{BroadcastPublisher, EngineNotification, EventPublisher, NoopPublisher};

use std::sync::Arc;

/// Registry of collaborator roles, resolved once at engine construction.
///
/// # Example
///
/// ```rust
/// use cobot_fsm::services::{BroadcastPublisher, ServiceContainer};
///
/// let publisher = BroadcastPublisher::new(16);
/// let mut notifications = publisher.subscribe();
/// let services = ServiceContainer::new().with_publisher(publisher);
/// # let _ = (&services, &mut notifications);
/// ```
#[derive(Clone)]
pub struct ServiceContainer {
    executor: Arc<dyn ActionExecutor>,
    log: Arc<dyn LogSink>,
    publisher: Arc<dyn EventPublisher>,
}

impl ServiceContainer {
    /// Container with the default roles: callback-backed execution,
    /// `tracing` logging and no notification publishing.
    pub fn new() -> Self {
        Self {
            executor: Arc::new(CallbackActionExecutor),
            log: Arc::new(TracingLogSink),
            publisher: Arc::new(NoopPublisher),
        }
    }

    pub fn with_executor(mut self, executor: impl ActionExecutor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn with_shared_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_log_sink(mut self, log: impl LogSink + 'static) -> Self {
        self.log = Arc::new(log);
        self
    }

    pub fn with_shared_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_publisher(mut self, publisher: impl EventPublisher + 'static) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    pub fn executor(&self) -> &Arc<dyn ActionExecutor> {
        &self.executor
    }

    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.log
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer").finish_non_exhaustive()
    }
}
