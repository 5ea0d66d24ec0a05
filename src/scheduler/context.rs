//! Process-wide scheduler context: worker ownership and open/close
//! lifecycle.
//!
//! The context is a singleton with an explicit lifecycle, never implicitly
//! constructed. [`SchedulerContext::open`] publishes the context *before*
//! spawning any worker (worker entry points resolve the singleton to find
//! their queues), spawns MC, then TX and RX, and unwinds partially started
//! workers through the full shutdown handshake if anything fails.
//! [`SchedulerContext::close`] runs the reverse: shutdown handshake per
//! worker, then a queue flush that hands every still-queued message to its
//! subsystem's `free` callback before returning the wrapper to the pool.

use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crate::message::MessageWrapper;
use crate::scheduler::worker::{self, WorkerShared};
use crate::scheduler::{
    DriverContext, SchedulerConfig, SchedulerError, Subsystem, WorkerRole,
};
use crate::sync::{EventSet, Timeout, lock};
use crate::trace::{debug, info, warn};

static CONTEXT: RwLock<Option<Arc<SchedulerContext>>> = RwLock::new(None);

/// One owned worker: shared state plus the join handle of its thread.
struct Worker {
    shared: WorkerShared,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn new(role: WorkerRole) -> Self {
        Self {
            shared: WorkerShared::new(role),
            handle: Mutex::new(None),
        }
    }
}

/// The scheduler's process-wide context.
///
/// Owns the MC worker and, outside manufacturing-test mode, the TX and RX
/// workers. Obtained via [`SchedulerContext::current`] between open and
/// close; the accessor fails closed outside that window.
pub struct SchedulerContext {
    driver: Arc<DriverContext>,
    /// Workers in spawn/start-ack order: MC, then TX, then RX.
    workers: Vec<Worker>,
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext").finish_non_exhaustive()
    }
}

impl SchedulerContext {
    /// Opens the scheduler: builds queues, publishes the singleton, spawns
    /// and awaits every configured worker.
    ///
    /// On any failure, already-started workers receive the full shutdown
    /// handshake (in reverse start order) before the error is returned, and
    /// the singleton is withdrawn.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::AlreadyOpen`] if a context is already published.
    /// - [`SchedulerError::MissingHandler`] if the handler table does not
    ///   cover every active queue.
    /// - [`SchedulerError::Spawn`] on thread creation failure.
    /// - [`SchedulerError::StartTimeout`] if a worker never acks startup.
    pub fn open(
        driver: Arc<DriverContext>,
        config: &SchedulerConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        let roles: &[WorkerRole] = if config.mft_mode {
            &[WorkerRole::Mc]
        } else {
            &[WorkerRole::Mc, WorkerRole::Tx, WorkerRole::Rx]
        };

        // Validate handler coverage before any resource exists.
        for &role in roles {
            for &subsystem in role.queue_order() {
                if driver.handlers().get(role, subsystem).is_none() {
                    return Err(SchedulerError::MissingHandler { role, subsystem });
                }
            }
        }

        let ctx = Arc::new(Self {
            driver,
            workers: roles.iter().map(|&role| Worker::new(role)).collect(),
        });

        // Publish before spawning: worker entry points resolve the
        // singleton to find their queues.
        {
            let mut slot = CONTEXT.write().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(SchedulerError::AlreadyOpen);
            }
            *slot = Some(Arc::clone(&ctx));
        }

        info!(mft_mode = config.mft_mode, "scheduler opening");

        for (idx, worker) in ctx.workers.iter().enumerate() {
            let role = worker.shared.role();
            debug!(%role, "spawning worker");
            match spawn_worker(role) {
                Ok(handle) => *lock(&worker.handle) = Some(handle),
                Err(source) => {
                    warn!(%role, "worker spawn failed; unwinding");
                    ctx.unwind(idx);
                    withdraw();
                    return Err(SchedulerError::Spawn { role, source });
                }
            }
        }

        // Await start-acks in start order, bounded so a silently dead
        // worker surfaces as an error instead of hanging open forever.
        for (idx, worker) in ctx.workers.iter().enumerate() {
            let role = worker.shared.role();
            if !worker
                .shared
                .start_ack
                .wait(Timeout::Duration(config.start_timeout))
            {
                warn!(%role, "worker missed start ack; unwinding");
                ctx.unwind(idx + 1);
                withdraw();
                return Err(SchedulerError::StartTimeout {
                    role,
                    timeout: config.start_timeout,
                });
            }
        }

        info!("scheduler open");
        Ok(ctx)
    }

    /// Closes the scheduler: shutdown handshake for MC, TX, RX in that
    /// order, then flushes every queue through the subsystem `free`
    /// callbacks and returns the wrappers to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotOpen`] if no context is published (for
    /// example on a second close).
    pub fn close() -> Result<(), SchedulerError> {
        let ctx = CONTEXT
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchedulerError::NotOpen)?;

        info!("scheduler closing");
        for worker in &ctx.workers {
            debug!(role = %worker.shared.role(), "shutting down worker");
            worker.shared.request_shutdown();
            // Cooperative: unbounded wait until the worker reaches a
            // shutdown checkpoint.
            worker.shared.shutdown_ack.wait(Timeout::Infinite);
            if let Some(handle) = lock(&worker.handle).take() {
                let _ = handle.join();
            }
        }

        ctx.flush_queues();
        info!("scheduler closed");
        Ok(())
    }

    /// Resolves the published context.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotOpen`] before open or after close.
    pub fn current() -> Result<Arc<Self>, SchedulerError> {
        CONTEXT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SchedulerError::NotOpen)
    }

    /// The driver context this scheduler dispatches for.
    #[must_use]
    pub fn driver(&self) -> &Arc<DriverContext> {
        &self.driver
    }

    /// Appends a wrapper to the (role, subsystem) queue.
    ///
    /// Enqueueing never fails once the queue is resolved; callers
    /// conventionally follow up with [`Self::post`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotOpen`] when `self` is no longer the
    /// published context (a handle retained across close), and
    /// [`SchedulerError::UnknownWorker`] / [`SchedulerError::UnknownQueue`]
    /// when the selector does not name an active queue. The wrapper goes
    /// back to the pool on every error, so the budget stays balanced.
    pub fn enqueue_message(
        &self,
        role: WorkerRole,
        subsystem: Subsystem,
        wrapper: MessageWrapper,
    ) -> Result<(), SchedulerError> {
        // Hold the singleton read lock across the enqueue: a message landed
        // after close has taken the slot would sit in a queue that is never
        // flushed again.
        let slot = CONTEXT.read().unwrap_or_else(PoisonError::into_inner);
        let published = slot.as_deref().is_some_and(|ctx| std::ptr::eq(ctx, self));
        let queue = if published {
            self.worker(role).and_then(|w| {
                w.shared
                    .queue(subsystem)
                    .ok_or(SchedulerError::UnknownQueue { role, subsystem })
            })
        } else {
            Err(SchedulerError::NotOpen)
        };
        match queue {
            Ok(queue) => {
                queue.enqueue(wrapper);
                Ok(())
            }
            Err(err) => {
                self.driver.pool().release(wrapper);
                Err(err)
            }
        }
    }

    /// Wakes a worker to re-scan its queues.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownWorker`] for an inactive role.
    pub fn post(&self, role: WorkerRole) -> Result<(), SchedulerError> {
        self.worker(role)?.shared.post();
        Ok(())
    }

    /// Requests a suspend and blocks until the worker has drained its
    /// queues and parked (or is exiting under shutdown).
    ///
    /// A request issued while the worker is still parked from an earlier
    /// suspend stays pending and is acknowledged at the worker's next
    /// empty-queue scan after it resumes. One suspend controller at a time:
    /// concurrent callers would race for the same acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::UnknownWorker`] for an inactive role.
    /// - [`SchedulerError::SuspendTimeout`] if the worker does not park
    ///   within a bounded `timeout`.
    pub fn request_suspend(&self, role: WorkerRole, timeout: Timeout) -> Result<(), SchedulerError> {
        let worker = self.worker(role)?;
        worker.shared.suspend.request();
        worker.shared.events.set(EventSet::SUSPEND);
        if !worker.shared.suspend.wait_acked(timeout) {
            let bound = match timeout {
                Timeout::Infinite => unreachable!("infinite wait cannot time out"),
                Timeout::Duration(d) => d,
            };
            return Err(SchedulerError::SuspendTimeout {
                role,
                timeout: bound,
            });
        }
        Ok(())
    }

    /// Releases a suspended worker back into its drain loop.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownWorker`] for an inactive role.
    pub fn signal_resume(&self, role: WorkerRole) -> Result<(), SchedulerError> {
        self.worker(role)?.shared.suspend.resume();
        Ok(())
    }

    pub(crate) fn shared(&self, role: WorkerRole) -> Option<&WorkerShared> {
        self.workers
            .iter()
            .find(|w| w.shared.role() == role)
            .map(|w| &w.shared)
    }

    fn worker(&self, role: WorkerRole) -> Result<&Worker, SchedulerError> {
        self.workers
            .iter()
            .find(|w| w.shared.role() == role)
            .ok_or(SchedulerError::UnknownWorker { role })
    }

    /// Shuts down workers `[0, upto)` in reverse start order.
    ///
    /// Joins rather than waiting on the shutdown-ack: a worker that died
    /// before acking startup will never ack shutdown either, but its thread
    /// is joinable regardless.
    fn unwind(&self, upto: usize) {
        for worker in self.workers[..upto].iter().rev() {
            debug!(role = %worker.shared.role(), "unwinding worker");
            worker.shared.request_shutdown();
            if let Some(handle) = lock(&worker.handle).take() {
                let _ = handle.join();
            }
        }
    }

    /// Drains every queue, invoking the subsystem `free` callback for each
    /// still-queued message and returning its wrapper to the pool.
    fn flush_queues(&self) {
        for worker in &self.workers {
            let role = worker.shared.role();
            for (subsystem, queue) in worker.shared.queues() {
                let mut flushed = 0usize;
                while let Some(wrapper) = queue.try_dequeue() {
                    if let Some(handler) = self.driver.handlers().get(role, *subsystem) {
                        handler.free(wrapper.message());
                    }
                    self.driver.pool().release(wrapper);
                    flushed += 1;
                }
                if flushed > 0 {
                    debug!(%role, %subsystem, flushed, "flushed undispatched messages");
                }
            }
        }
    }
}

fn withdraw() {
    CONTEXT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

fn spawn_worker(role: WorkerRole) -> io::Result<JoinHandle<()>> {
    #[cfg(test)]
    if let Some(err) = test_hooks::take_spawn_failure(role) {
        return Err(err);
    }
    thread::Builder::new()
        .name(role.thread_name().into())
        .spawn(move || worker::run(role))
}

/// Failure-injection points driving the open-failure unwind paths, which
/// are unreachable through the public surface alone.
#[cfg(test)]
pub(crate) mod test_hooks {
    use std::io;
    use std::sync::Mutex;

    use crate::scheduler::WorkerRole;
    use crate::sync::lock;

    static FAIL_SPAWN: Mutex<Option<WorkerRole>> = Mutex::new(None);
    static FAIL_START: Mutex<Option<WorkerRole>> = Mutex::new(None);

    /// Makes the next spawn of `role` fail with an I/O error.
    pub(crate) fn fail_next_spawn(role: WorkerRole) {
        *lock(&FAIL_SPAWN) = Some(role);
    }

    pub(crate) fn take_spawn_failure(role: WorkerRole) -> Option<io::Error> {
        let mut slot = lock(&FAIL_SPAWN);
        if *slot == Some(role) {
            slot.take();
            Some(io::Error::other("injected spawn failure"))
        } else {
            None
        }
    }

    /// Makes the next started `role` worker exit before its start-ack.
    pub(crate) fn fail_next_start(role: WorkerRole) {
        *lock(&FAIL_START) = Some(role);
    }

    pub(crate) fn take_start_failure(role: WorkerRole) -> bool {
        let mut slot = lock(&FAIL_START);
        if *slot == Some(role) {
            slot.take();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessagePool};
    use crate::scheduler::handler::{DispatchError, HandlerTable, SubsystemHandler};
    use serial_test::serial;
    use std::time::Duration;

    struct Nop;

    impl SubsystemHandler for Nop {
        fn process(&self, _message: &Message) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn full_driver() -> Arc<DriverContext> {
        let mut handlers = HandlerTable::new();
        for role in [WorkerRole::Mc, WorkerRole::Tx, WorkerRole::Rx] {
            for &subsystem in role.queue_order() {
                handlers.register(role, subsystem, Arc::new(Nop));
            }
        }
        Arc::new(DriverContext::new(Arc::new(MessagePool::new(16)), handlers))
    }

    #[test]
    #[serial]
    fn tx_spawn_failure_unwinds_started_workers() {
        test_hooks::fail_next_spawn(WorkerRole::Tx);

        let err = SchedulerContext::open(full_driver(), &SchedulerConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Spawn {
                role: WorkerRole::Tx,
                ..
            }
        ));

        // The already-started MC worker was shut down and joined before open
        // returned, and the singleton was withdrawn, so a fresh lifecycle
        // starts clean.
        assert!(SchedulerContext::current().is_err());
        SchedulerContext::open(full_driver(), &SchedulerConfig::default()).expect("reopen");
        SchedulerContext::close().expect("close");
    }

    #[test]
    #[serial]
    fn missed_start_ack_times_out_and_unwinds() {
        test_hooks::fail_next_start(WorkerRole::Rx);
        let config = SchedulerConfig {
            start_timeout: Duration::from_millis(200),
            ..SchedulerConfig::default()
        };

        let err = SchedulerContext::open(full_driver(), &config).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::StartTimeout {
                role: WorkerRole::Rx,
                ..
            }
        ));

        // MC and TX acked and were unwound; the dead RX thread joined.
        assert!(SchedulerContext::current().is_err());
        SchedulerContext::open(full_driver(), &SchedulerConfig::default()).expect("reopen");
        SchedulerContext::close().expect("close");
    }
}
