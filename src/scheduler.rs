//! Message-dispatch scheduler: worker roles, queue topology, orchestration.
//!
//! # Architecture
//!
//! The scheduler spawns up to three dispatch threads:
//! - **MC (main controller)**: drains the control-plane queues (offload
//!   indications, system, offload control, MAC, roaming, transport).
//! - **TX**: drains transmit-path queues (system, transport, offload).
//! - **RX**: drains receive-path queues (system, offload).
//!
//! Each worker owns a fixed-priority set of [`MessageQueue`]s, an atomic
//! event register and a suspend/resume gate. Producers enqueue a wrapper and
//! post the worker; the worker drains queues highest-priority-first,
//! dispatching each message synchronously to the bound subsystem handler and
//! returning the wrapper to the pool regardless of handler outcome.
//!
//! The [`SchedulerContext`] is a process-wide singleton with an explicit
//! open/close lifecycle; worker threads resolve it at startup to find their
//! queues, so it is published before any thread is spawned.

pub mod context;
pub mod handler;
pub mod worker;

pub use context::SchedulerContext;
pub use handler::{DispatchError, HandlerTable, SubsystemHandler};

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::message::MessagePool;

/// Identity of a dispatch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Main controller: control-plane dispatch.
    Mc,
    /// Transmit-path dispatch.
    Tx,
    /// Receive-path dispatch.
    Rx,
}

impl WorkerRole {
    /// OS thread name for this worker.
    #[must_use]
    pub const fn thread_name(self) -> &'static str {
        match self {
            Self::Mc => "stratus-mc",
            Self::Tx => "stratus-tx",
            Self::Rx => "stratus-rx",
        }
    }

    /// Queue drain order for this role, highest priority first.
    ///
    /// Offload/control traffic and core system messages are drained ahead of
    /// per-layer traffic to bound offload-plane latency.
    #[must_use]
    pub const fn queue_order(self) -> &'static [Subsystem] {
        match self {
            Self::Mc => &[
                Subsystem::OffloadIndication,
                Subsystem::System,
                Subsystem::OffloadControl,
                Subsystem::Mac,
                Subsystem::Roaming,
                Subsystem::Transport,
            ],
            Self::Tx => &[Subsystem::System, Subsystem::Transport, Subsystem::Offload],
            Self::Rx => &[Subsystem::System, Subsystem::Offload],
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mc => f.write_str("MC"),
            Self::Tx => f.write_str("TX"),
            Self::Rx => f.write_str("RX"),
        }
    }
}

/// Driver subsystem owning a queue on one or more workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Core driver/system messages.
    System,
    /// MAC-layer messages (MC only).
    Mac,
    /// Roaming engine messages (MC only).
    Roaming,
    /// Transport-layer messages.
    Transport,
    /// Offload-engine control requests (MC only).
    OffloadControl,
    /// Offload-engine indications (MC only, highest priority).
    OffloadIndication,
    /// Offload-engine data-path messages (TX/RX only).
    Offload,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::Mac => "mac",
            Self::Roaming => "roaming",
            Self::Transport => "transport",
            Self::OffloadControl => "offload-control",
            Self::OffloadIndication => "offload-indication",
            Self::Offload => "offload",
        };
        f.write_str(name)
    }
}

/// Driver-wide context the scheduler dispatches on behalf of.
///
/// Holds the message pool and the subsystem handler table; workers resolve
/// it through the [`SchedulerContext`] singleton at startup.
pub struct DriverContext {
    pool: Arc<MessagePool>,
    handlers: HandlerTable,
}

impl DriverContext {
    /// Bundles a pool and handler table into a driver context.
    #[must_use]
    pub fn new(pool: Arc<MessagePool>, handlers: HandlerTable) -> Self {
        Self { pool, handlers }
    }

    /// The message pool wrappers are acquired from and returned to.
    #[must_use]
    pub fn pool(&self) -> &Arc<MessagePool> {
        &self.pool
    }

    /// The subsystem handler table.
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }
}

/// Scheduler open-time configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on each worker's start-ack wait during open.
    ///
    /// A worker that fails its startup back-reference resolution exits
    /// without acking; this bound turns that silent death into an open-time
    /// error instead of an indefinite hang.
    pub start_timeout: Duration,
    /// Manufacturing-test mode: spawn the MC worker only.
    pub mft_mode: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            mft_mode: false,
        }
    }
}

/// Errors from the scheduler lifecycle and inbound surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `open` was called while a context is already published.
    #[error("scheduler context already open")]
    AlreadyOpen,
    /// No context is published (before open, or after close).
    #[error("scheduler context not open")]
    NotOpen,
    /// The handler table does not cover every active queue.
    #[error("no handler registered for the {role}/{subsystem} queue")]
    MissingHandler {
        /// Worker role of the uncovered queue.
        role: WorkerRole,
        /// Subsystem of the uncovered queue.
        subsystem: Subsystem,
    },
    /// OS-level thread spawn failure.
    #[error("failed to spawn {role} worker thread")]
    Spawn {
        /// Worker that could not be spawned.
        role: WorkerRole,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// A spawned worker never acknowledged startup.
    #[error("{role} worker did not acknowledge start within {timeout:?}")]
    StartTimeout {
        /// Worker that failed to start.
        role: WorkerRole,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The addressed worker is not part of this context (e.g. TX in
    /// manufacturing-test mode).
    #[error("{role} worker is not part of this context")]
    UnknownWorker {
        /// Addressed worker.
        role: WorkerRole,
    },
    /// The addressed worker owns no queue for that subsystem.
    #[error("{role} worker owns no {subsystem} queue")]
    UnknownQueue {
        /// Addressed worker.
        role: WorkerRole,
        /// Addressed subsystem.
        subsystem: Subsystem,
    },
    /// The worker did not acknowledge a suspend request in time.
    #[error("{role} worker did not acknowledge suspend within {timeout:?}")]
    SuspendTimeout {
        /// Addressed worker.
        role: WorkerRole,
        /// Bound that elapsed.
        timeout: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_orders_match_the_role_topology() {
        assert_eq!(WorkerRole::Mc.queue_order().len(), 6);
        assert_eq!(WorkerRole::Tx.queue_order().len(), 3);
        assert_eq!(WorkerRole::Rx.queue_order().len(), 2);

        // Highest priority first.
        assert_eq!(WorkerRole::Mc.queue_order()[0], Subsystem::OffloadIndication);
        assert_eq!(WorkerRole::Tx.queue_order()[0], Subsystem::System);
        assert_eq!(WorkerRole::Rx.queue_order()[0], Subsystem::System);
    }
}
