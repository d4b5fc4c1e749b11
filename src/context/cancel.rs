//! Cooperative cancellation shared between the dispatch loop and actions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag that blocking actions poll to abort early.
///
/// The flag is tripped from outside the dispatch loop when an emergency
/// event is submitted and cleared by the loop once that event has been
/// processed. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
