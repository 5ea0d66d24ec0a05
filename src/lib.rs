//! Message-dispatch scheduler for a WLAN host driver.
//!
//! # Architecture
//!
//! The crate is a pure in-process concurrency core: it routes control and
//! data messages produced by driver subsystems into a small set of
//! dedicated worker threads, each draining several priority-ordered queues.
//!
//! - **MC thread**: control-plane dispatch (system, MAC, roaming,
//!   transport, offload control/indication queues).
//! - **TX / RX threads**: transmit- and receive-path dispatch.
//! - **Watchdog thread**: supervised crash recovery, sequencing the
//!   subsystem restart (shutdown then reinit) and chip resets.
//!
//! Workers support a coordinated suspend/resume handshake for system power
//! transitions and a cooperative shutdown handshake with start/stop
//! acknowledgements, so the orchestrator can unwind partially started
//! workers on open failure.
//!
//! Messages live in a bounded [`message::MessagePool`]; subsystem handlers
//! and the recovery callbacks are external collaborators bound at open time
//! ([`scheduler::SubsystemHandler`], [`watchdog::RecoveryOps`]).

pub mod message;
pub mod scheduler;
pub mod sync;
pub mod trace;
pub mod watchdog;

pub use message::{Message, MessagePool, MessageQueue, MessageTag, MessageWrapper, PoolError};
pub use scheduler::{
    DispatchError, DriverContext, HandlerTable, SchedulerConfig, SchedulerContext, SchedulerError,
    SubsystemHandler, Subsystem, WorkerRole,
};
pub use sync::Timeout;
pub use watchdog::{
    ChipResetReason, RecoveryOps, RecoveryResult, Watchdog, WatchdogConfig, WatchdogError,
};
