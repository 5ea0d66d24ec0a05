//! Single-fire acknowledgement signals and the suspend/resume gate.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use minstant::Instant;

use crate::sync::lock;

/// Timeout specification for blocking waits.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// A latching, single-fire acknowledgement.
///
/// Used for a worker's start-ack and shutdown-ack: the worker signals once,
/// the orchestrator waits. Signaling again is a no-op; the latch never
/// re-arms.
#[derive(Default)]
pub struct AckSignal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl AckSignal {
    /// Creates an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal, releasing all current and future waiters.
    pub fn signal(&self) {
        let mut fired = lock(&self.fired);
        *fired = true;
        self.cond.notify_all();
    }

    /// Returns true if the signal has fired.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *lock(&self.fired)
    }

    /// Waits for the signal; returns false on timeout.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        let mut fired = lock(&self.fired);
        while !*fired {
            match deadline {
                None => {
                    fired = self
                        .cond
                        .wait(fired)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(fired, dl - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    fired = guard;
                }
            }
        }
        true
    }
}

#[derive(Default)]
struct GateState {
    /// A suspend has been requested and not yet consumed by the worker.
    requested: bool,
    /// Worker has parked (or is exiting) in response to a suspend request.
    acked: bool,
    /// Resume signal; re-armed (cleared) each time the worker parks.
    resumed: bool,
    /// Shutdown observed: permanently releases any parked worker.
    interrupted: bool,
}

/// Per-worker suspend handshake: suspend lock, request flag, suspend-ack,
/// re-armable resume signal.
///
/// The single mutex serializes the worker's "consume request, ack the
/// waiter, re-arm resume, park" quadruple against a racing request, resume
/// or shutdown, which is what makes the handshake lossless: a request that
/// arrives while the worker is parking is either consumed by that park or
/// left pending for the next scan, never dropped.
///
/// A resume signaled while no worker is parked is intentionally consumed by
/// the next park's re-arm: the power-management contract is ack-then-resume,
/// never resume-first.
#[derive(Default)]
pub struct SuspendGate {
    state: Mutex<GateState>,
    ack_cond: Condvar,
    resume_cond: Condvar,
}

impl SuspendGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requester side: flags a suspend for the worker to consume at its
    /// next empty-queue scan.
    pub fn request(&self) {
        lock(&self.state).requested = true;
    }

    /// Worker side: if a suspend is pending, consume it, acknowledge the
    /// waiter, re-arm the resume signal and block until resumed or
    /// interrupted by shutdown. Returns false when no suspend was pending.
    pub fn park_if_requested(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.requested {
            return false;
        }
        state.requested = false;
        state.acked = true;
        state.resumed = false;
        self.ack_cond.notify_all();
        while !state.resumed && !state.interrupted {
            state = self
                .resume_cond
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        true
    }

    /// Worker side: consume a pending suspend and release its waiter
    /// without parking. Returns true if a waiter was released.
    ///
    /// Used when shutdown and suspend are observed together; the waiter is
    /// released because the worker is exiting regardless.
    pub fn ack_only(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.requested {
            return false;
        }
        state.requested = false;
        state.acked = true;
        self.ack_cond.notify_all();
        true
    }

    /// Waiter side: block until the worker acknowledges the suspend.
    ///
    /// Consumes the ack so the next suspend cycle waits afresh. Returns
    /// false on timeout.
    pub fn wait_acked(&self, timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        let mut state = lock(&self.state);
        while !state.acked {
            match deadline {
                None => {
                    state = self
                        .ack_cond
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return false;
                    }
                    let (guard, _) = self
                        .ack_cond
                        .wait_timeout(state, dl - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                }
            }
        }
        state.acked = false;
        true
    }

    /// Releases a parked worker to resume draining.
    pub fn resume(&self) {
        let mut state = lock(&self.state);
        state.resumed = true;
        self.resume_cond.notify_all();
    }

    /// Permanently releases any parked (or future) worker.
    ///
    /// Called on shutdown so a worker parked on the resume signal still
    /// reaches its termination checkpoint.
    pub fn interrupt(&self) {
        let mut state = lock(&self.state);
        state.interrupted = true;
        self.resume_cond.notify_all();
    }
}
