//! Crash-recovery watchdog: sequences subsystem restarts and chip resets.
//!
//! One independent event-driven worker with no queues. External callers
//! raise recovery triggers ([`Watchdog::request_wlan_shutdown`],
//! [`Watchdog::request_wlan_reinit`], [`Watchdog::request_chip_reset`]);
//! the worker invokes the driver-supplied [`RecoveryOps`] callbacks in
//! response, serialized by the `reset_in_progress` flag so two restart
//! windows can never overlap.
//!
//! A failed recovery callback marks the watchdog *faulted*: the worker
//! stays alive but parked (no automatic retry), and subsequent triggers
//! fail fast with [`WatchdogError::Faulted`] so a supervisory layer can
//! decide what to do.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::sync::{AckSignal, EventFlags, EventSet, Timeout, lock};
use crate::trace::{error, info, warn};

/// Result type for the driver-supplied recovery callbacks.
pub type RecoveryResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Externally supplied driver teardown/bring-up callbacks.
pub trait RecoveryOps: Send + Sync {
    /// Tears the WLAN subsystem down after a firmware/hardware crash.
    ///
    /// # Errors
    ///
    /// A failure faults the watchdog; there is no automatic retry.
    fn perform_shutdown(&self) -> RecoveryResult;

    /// Brings the WLAN subsystem back up after a shutdown.
    ///
    /// # Errors
    ///
    /// A failure faults the watchdog; there is no automatic retry.
    fn perform_reinit(&self) -> RecoveryResult;
}

/// Why a chip reset was requested. Recorded per reason for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipResetReason {
    /// Firmware reported an assertion.
    FirmwareAssert,
    /// A firmware command timed out.
    CommandTimeout,
    /// The transmit data path stalled.
    TxDataStall,
    /// The receive data path stalled.
    RxDataStall,
    /// Too many consecutive beacons missed.
    BeaconMiss,
    /// Reset requested explicitly by the user/driver.
    UserRequest,
}

impl ChipResetReason {
    const COUNT: usize = 6;

    const fn index(self) -> usize {
        match self {
            Self::FirmwareAssert => 0,
            Self::CommandTimeout => 1,
            Self::TxDataStall => 2,
            Self::RxDataStall => 3,
            Self::BeaconMiss => 4,
            Self::UserRequest => 5,
        }
    }
}

impl fmt::Display for ChipResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirmwareAssert => "firmware-assert",
            Self::CommandTimeout => "command-timeout",
            Self::TxDataStall => "tx-data-stall",
            Self::RxDataStall => "rx-data-stall",
            Self::BeaconMiss => "beacon-miss",
            Self::UserRequest => "user-request",
        };
        f.write_str(name)
    }
}

/// Errors from the watchdog lifecycle and trigger surface.
#[derive(Debug, ThisError)]
pub enum WatchdogError {
    /// `open` was called while a watchdog is already published.
    #[error("watchdog already open")]
    AlreadyOpen,
    /// No watchdog is published (before open, or after close).
    #[error("watchdog not open")]
    NotOpen,
    /// A restart window is already open.
    #[error("subsystem restart already in progress")]
    Busy,
    /// A recovery callback failed earlier; the watchdog refuses new work.
    #[error("watchdog faulted: {reason}")]
    Faulted {
        /// Description of the recorded callback failure.
        reason: String,
    },
    /// OS-level thread spawn failure.
    #[error("failed to spawn watchdog thread")]
    Spawn(#[source] io::Error),
    /// The watchdog thread never acknowledged startup.
    #[error("watchdog did not acknowledge start within {0:?}")]
    StartTimeout(Duration),
}

/// Watchdog open-time configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Bound on the start-ack wait during open.
    pub start_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct RecoveryState {
    /// A restart window is open: set at trigger admission, cleared by a
    /// successful reinit.
    reset_in_progress: bool,
    /// Recorded callback failure, if any. Set once, never cleared.
    fault: Option<String>,
    reset_counts: [u64; ChipResetReason::COUNT],
}

static WATCHDOG: RwLock<Option<Arc<Watchdog>>> = RwLock::new(None);

/// The crash-recovery worker and its trigger surface.
pub struct Watchdog {
    ops: Arc<dyn RecoveryOps>,
    events: EventFlags,
    start_ack: AckSignal,
    shutdown_ack: AckSignal,
    /// The watchdog lock: serializes trigger admission against handler
    /// progress.
    state: Mutex<RecoveryState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Opens the watchdog: publishes the singleton and spawns its worker.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::AlreadyOpen`] if a watchdog is already published.
    /// - [`WatchdogError::Spawn`] on thread creation failure.
    /// - [`WatchdogError::StartTimeout`] if the worker never acks startup.
    pub fn open(
        ops: Arc<dyn RecoveryOps>,
        config: &WatchdogConfig,
    ) -> Result<Arc<Self>, WatchdogError> {
        let dog = Arc::new(Self {
            ops,
            events: EventFlags::new(),
            start_ack: AckSignal::new(),
            shutdown_ack: AckSignal::new(),
            state: Mutex::new(RecoveryState::default()),
            handle: Mutex::new(None),
        });

        {
            let mut slot = WATCHDOG.write().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(WatchdogError::AlreadyOpen);
            }
            *slot = Some(Arc::clone(&dog));
        }

        let worker = Arc::clone(&dog);
        let spawned = thread::Builder::new()
            .name("stratus-watchdog".into())
            .spawn(move || run(&worker));
        match spawned {
            Ok(handle) => *lock(&dog.handle) = Some(handle),
            Err(source) => {
                withdraw();
                return Err(WatchdogError::Spawn(source));
            }
        }

        if !dog
            .start_ack
            .wait(Timeout::Duration(config.start_timeout))
        {
            dog.events.set(EventSet::SHUTDOWN | EventSet::POST);
            if let Some(handle) = lock(&dog.handle).take() {
                let _ = handle.join();
            }
            withdraw();
            return Err(WatchdogError::StartTimeout(config.start_timeout));
        }

        info!("watchdog open");
        Ok(dog)
    }

    /// Closes the watchdog: shutdown handshake, join, withdraw singleton.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::NotOpen`] if no watchdog is published.
    pub fn close() -> Result<(), WatchdogError> {
        let dog = WATCHDOG
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WatchdogError::NotOpen)?;

        info!("watchdog closing");
        dog.events.set(EventSet::SHUTDOWN | EventSet::POST);
        dog.shutdown_ack.wait(Timeout::Infinite);
        if let Some(handle) = lock(&dog.handle).take() {
            let _ = handle.join();
        }
        info!("watchdog closed");
        Ok(())
    }

    /// Resolves the published watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::NotOpen`] before open or after close.
    pub fn current() -> Result<Arc<Self>, WatchdogError> {
        WATCHDOG
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WatchdogError::NotOpen)
    }

    /// Requests the shutdown phase of a subsystem restart.
    ///
    /// Admission opens the restart window, so of two racing requests
    /// exactly one is accepted.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::Busy`] if a restart window is already open.
    /// - [`WatchdogError::Faulted`] after a recovery callback failure.
    pub fn request_wlan_shutdown(&self) -> Result<(), WatchdogError> {
        let mut state = lock(&self.state);
        Self::admit_shutdown(&state)?;
        state.reset_in_progress = true;
        self.events.set(EventSet::WLAN_SHUTDOWN | EventSet::POST);
        Ok(())
    }

    /// Requests the reinit phase of a subsystem restart.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::Busy`] if a reinit request is still pending.
    /// - [`WatchdogError::Faulted`] after a recovery callback failure.
    pub fn request_wlan_reinit(&self) -> Result<(), WatchdogError> {
        let state = lock(&self.state);
        if let Some(reason) = &state.fault {
            return Err(WatchdogError::Faulted {
                reason: reason.clone(),
            });
        }
        if self.events.is_set(EventSet::WLAN_REINIT) {
            return Err(WatchdogError::Busy);
        }
        self.events.set(EventSet::WLAN_REINIT | EventSet::POST);
        Ok(())
    }

    /// Requests a chip reset, recording the reason.
    ///
    /// There is no distinct reset handler: the request is accounted and
    /// routed through the WLAN-shutdown path.
    ///
    /// # Errors
    ///
    /// Same admission rules as [`Self::request_wlan_shutdown`].
    pub fn request_chip_reset(&self, reason: ChipResetReason) -> Result<(), WatchdogError> {
        let mut state = lock(&self.state);
        Self::admit_shutdown(&state)?;
        state.reset_in_progress = true;
        state.reset_counts[reason.index()] += 1;
        info!(%reason, "chip reset requested");
        self.events
            .set(EventSet::CHIP_RESET | EventSet::WLAN_SHUTDOWN | EventSet::POST);
        Ok(())
    }

    /// True while a restart window is open, from trigger admission until a
    /// successful reinit.
    #[must_use]
    pub fn reset_in_progress(&self) -> bool {
        lock(&self.state).reset_in_progress
    }

    /// Times a chip reset was requested for `reason`.
    #[must_use]
    pub fn chip_reset_count(&self, reason: ChipResetReason) -> u64 {
        lock(&self.state).reset_counts[reason.index()]
    }

    /// The recorded callback failure, if the watchdog has faulted.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        lock(&self.state).fault.clone()
    }

    /// Admission check shared by shutdown-path triggers. The caller holds
    /// the watchdog lock and opens the restart window before releasing it,
    /// so at most one trigger per window ever returns `Ok`; every loser
    /// deterministically gets `Busy`.
    fn admit_shutdown(state: &RecoveryState) -> Result<(), WatchdogError> {
        if let Some(reason) = &state.fault {
            return Err(WatchdogError::Faulted {
                reason: reason.clone(),
            });
        }
        if state.reset_in_progress {
            return Err(WatchdogError::Busy);
        }
        Ok(())
    }

    fn handle_wlan_shutdown(&self) {
        // The restart window was opened at trigger admission; the request
        // bit is set at most once per window.
        info!("performing subsystem shutdown");
        if let Err(err) = self.ops.perform_shutdown() {
            error!(error = %err, "subsystem shutdown failed; watchdog faulted");
            lock(&self.state).fault = Some(err.to_string());
        }
    }

    fn handle_wlan_reinit(&self) {
        if !lock(&self.state).reset_in_progress {
            warn!("reinit requested without a preceding shutdown; proceeding");
        }
        info!("performing subsystem reinit");
        match self.ops.perform_reinit() {
            Ok(()) => lock(&self.state).reset_in_progress = false,
            Err(err) => {
                error!(error = %err, "subsystem reinit failed; watchdog faulted");
                lock(&self.state).fault = Some(err.to_string());
            }
        }
    }
}

fn withdraw() {
    WATCHDOG
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// Watchdog worker loop: wake on post, test bits in priority order
/// (shutdown > wlan-shutdown > wlan-reinit), act, park again.
fn run(dog: &Watchdog) {
    dog.start_ack.signal();
    info!("watchdog started");

    'outer: loop {
        dog.events.wait_any(EventSet::POST | EventSet::SHUTDOWN);
        dog.events.clear(EventSet::POST);

        let mut handled = false;
        loop {
            if dog.events.is_set(EventSet::SHUTDOWN) {
                break 'outer;
            }
            if dog.events.take(EventSet::WLAN_SHUTDOWN) {
                // Chip-reset requests ride the shutdown path; consume the
                // marker bit along with it.
                dog.events.clear(EventSet::CHIP_RESET);
                dog.handle_wlan_shutdown();
                handled = true;
            } else if dog.events.take(EventSet::WLAN_REINIT) {
                dog.handle_wlan_reinit();
                handled = true;
            } else {
                break;
            }
        }
        if !handled {
            warn!("spurious watchdog wake");
        }
    }

    info!("watchdog terminating");
    dog.shutdown_ack.signal();
}
