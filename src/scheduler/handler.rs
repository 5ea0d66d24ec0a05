//! Subsystem handler registry: the scheduler's outbound dispatch surface.
//!
//! One handler is bound per (worker role, subsystem) queue at open time.
//! `process` is invoked synchronously from the drain loop; a slow handler
//! starves the worker's other queues, which is the accepted trade-off of the
//! fixed-priority design. Its result is logged and never alters drain flow.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::message::Message;
use crate::scheduler::{Subsystem, WorkerRole};

/// Failure reported by a subsystem's `process` callback.
///
/// Dispatch errors are local: one failing handler does not stop draining of
/// subsequent messages.
#[derive(Debug, Error)]
#[error("subsystem handler failed: {reason}")]
pub struct DispatchError {
    reason: String,
}

impl DispatchError {
    /// Creates a dispatch error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Per-subsystem message callbacks, supplied by the driver at open.
pub trait SubsystemHandler: Send + Sync {
    /// Handles one dequeued message, synchronously on the worker thread.
    ///
    /// # Errors
    ///
    /// Failures are logged by the worker and otherwise ignored; the wrapper
    /// is returned to the pool either way.
    fn process(&self, message: &Message) -> Result<(), DispatchError>;

    /// Releases subsystem resources for a message that was still queued when
    /// the scheduler closed. Called once per flushed message, before the
    /// wrapper returns to the pool.
    fn free(&self, message: &Message) {
        let _ = message;
    }
}

/// Registry mapping each (role, subsystem) queue to its handler.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<(WorkerRole, Subsystem), Arc<dyn SubsystemHandler>>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to the (role, subsystem) queue, replacing any
    /// previous binding.
    pub fn register(
        &mut self,
        role: WorkerRole,
        subsystem: Subsystem,
        handler: Arc<dyn SubsystemHandler>,
    ) -> &mut Self {
        self.handlers.insert((role, subsystem), handler);
        self
    }

    /// Looks up the handler bound to a queue.
    #[must_use]
    pub fn get(&self, role: WorkerRole, subsystem: Subsystem) -> Option<&Arc<dyn SubsystemHandler>> {
        self.handlers.get(&(role, subsystem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageTag;

    struct Nop;

    impl SubsystemHandler for Nop {
        fn process(&self, _message: &Message) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut table = HandlerTable::new();
        table.register(WorkerRole::Mc, Subsystem::System, Arc::new(Nop));

        assert!(table.get(WorkerRole::Mc, Subsystem::System).is_some());
        assert!(table.get(WorkerRole::Tx, Subsystem::System).is_none());
        assert!(table.get(WorkerRole::Mc, Subsystem::Mac).is_none());
    }

    #[test]
    fn default_free_is_a_no_op() {
        let handler = Nop;
        handler.free(&Message::new(MessageTag(1)));
    }
}
