//! Per-role dispatch worker: the drain state machine.
//!
//! Lifecycle: `Created → Running → Draining → (Suspended →) Running → … →
//! ShuttingDown → Terminated`. The thread signals its start-ack exactly once
//! on entry and its shutdown-ack exactly once on exit; in between it parks
//! on the event register and drains its queues in fixed priority order.

use crate::message::MessageWrapper;
use crate::scheduler::context::SchedulerContext;
use crate::scheduler::{Subsystem, WorkerRole};
use crate::sync::{AckSignal, EventFlags, EventSet, SuspendGate};
use crate::trace::{debug, error, info, warn};

use crate::message::MessageQueue;

/// State shared between a worker thread and the scheduler context.
pub(crate) struct WorkerShared {
    role: WorkerRole,
    /// Owned queues in drain order, highest priority first.
    queues: Vec<(Subsystem, MessageQueue)>,
    pub(crate) events: EventFlags,
    pub(crate) start_ack: AckSignal,
    pub(crate) shutdown_ack: AckSignal,
    pub(crate) suspend: SuspendGate,
}

impl WorkerShared {
    pub(crate) fn new(role: WorkerRole) -> Self {
        let queues = role
            .queue_order()
            .iter()
            .map(|&subsystem| (subsystem, MessageQueue::new()))
            .collect();
        Self {
            role,
            queues,
            events: EventFlags::new(),
            start_ack: AckSignal::new(),
            shutdown_ack: AckSignal::new(),
            suspend: SuspendGate::new(),
        }
    }

    pub(crate) fn role(&self) -> WorkerRole {
        self.role
    }

    pub(crate) fn queues(&self) -> &[(Subsystem, MessageQueue)] {
        &self.queues
    }

    pub(crate) fn queue(&self, subsystem: Subsystem) -> Option<&MessageQueue> {
        self.queues
            .iter()
            .find(|(s, _)| *s == subsystem)
            .map(|(_, q)| q)
    }

    /// Wakes the worker for a new-message scan.
    pub(crate) fn post(&self) {
        self.events.set(EventSet::POST);
    }

    /// Requests cooperative termination and releases a parked worker.
    ///
    /// The suspend gate is interrupted as well so that shutdown always
    /// releases a worker blocked on the resume signal.
    pub(crate) fn request_shutdown(&self) {
        self.events.set(EventSet::SHUTDOWN | EventSet::POST);
        self.suspend.interrupt();
    }
}

/// Outcome of one drain pass.
#[derive(PartialEq, Eq)]
enum Drain {
    /// Return to the outer wait.
    Park,
    /// Shutdown observed; terminate the worker.
    Exit,
}

/// Worker thread entry point.
///
/// Resolves the process-wide context to find its queues; the context is
/// published before any worker is spawned, so failure here means open is
/// already unwinding. In that case the thread exits without signaling its
/// start-ack, and open's bounded ack wait reports the failure.
pub(crate) fn run(role: WorkerRole) {
    #[cfg(test)]
    if crate::scheduler::context::test_hooks::take_start_failure(role) {
        return;
    }

    let Ok(ctx) = SchedulerContext::current() else {
        error!(%role, "no scheduler context at worker startup; exiting without start ack");
        return;
    };
    let Some(worker) = ctx.shared(role) else {
        error!(%role, "scheduler context does not own this worker; exiting without start ack");
        return;
    };

    worker.start_ack.signal();
    info!(%role, "worker started");

    loop {
        let _ = worker
            .events
            .wait_any(EventSet::POST | EventSet::SUSPEND | EventSet::SHUTDOWN);
        // Both bits are wake hints; the suspend request itself lives in the
        // gate and is consumed there.
        worker.events.clear(EventSet::POST | EventSet::SUSPEND);
        if drain(&ctx, worker) == Drain::Exit {
            break;
        }
    }

    info!(%role, "worker terminating");
    worker.shutdown_ack.signal();
}

/// One drain pass: dispatch until the queues are empty, a suspend parks the
/// worker, or shutdown is observed.
fn drain(ctx: &SchedulerContext, worker: &WorkerShared) -> Drain {
    let role = worker.role();
    loop {
        if worker.events.is_set(EventSet::SHUTDOWN) {
            // Exiting regardless: release any suspend waiter instead of
            // parking.
            if worker.suspend.ack_only() {
                debug!(%role, "released suspend waiter during shutdown");
            }
            return Drain::Exit;
        }

        // Fixed-priority scan: one message from the first non-empty queue,
        // then restart the pass so higher-priority queues are re-checked.
        let mut dispatched = false;
        for (subsystem, queue) in worker.queues() {
            if queue.is_empty() {
                continue;
            }
            match queue.try_dequeue() {
                Some(wrapper) => {
                    dispatch(ctx, role, *subsystem, wrapper);
                    dispatched = true;
                }
                None => {
                    // Single consumer: a queue observed non-empty must yield
                    // a message here. Abandon the pass, keep the worker.
                    error!(%role, %subsystem, "non-empty queue yielded no message; abandoning drain pass");
                    return Drain::Park;
                }
            }
            break;
        }
        if dispatched {
            continue;
        }

        // All queues empty.
        if worker.suspend.park_if_requested() {
            debug!(%role, "resumed");
            continue;
        }
        return Drain::Park;
    }
}

/// Dispatches one message and unconditionally returns its wrapper to the
/// pool.
fn dispatch(ctx: &SchedulerContext, role: WorkerRole, subsystem: Subsystem, wrapper: MessageWrapper) {
    let driver = ctx.driver();
    match driver.handlers().get(role, subsystem) {
        Some(handler) => {
            if let Err(err) = handler.process(wrapper.message()) {
                warn!(%role, %subsystem, error = %err, "subsystem handler reported failure");
                let _ = err;
            }
        }
        // Open validates table coverage, so this indicates a torn context.
        None => error!(%role, %subsystem, "no handler bound; dropping message"),
    }
    driver.pool().release(wrapper);
}
