//! Worker event flags: an atomic bitset that doubles as the wake condition.
//!
//! Each worker owns one [`EventFlags`] register. Producers set bits with
//! [`EventFlags::set`]; the worker parks in [`EventFlags::wait_any`], which
//! re-reads the register on every wake so bits set between wakeups are never
//! lost. Bits are independently meaningful, so set/clear use plain atomic
//! ops with no extra lock; the internal mutex exists only to pair the
//! condvar with the register.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// A small tagged set of worker events.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u32);

impl EventSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);
    /// New work was posted; re-scan the queues.
    pub const POST: Self = Self(1 << 0);
    /// Suspend requested; wake the worker so it drains and parks.
    pub const SUSPEND: Self = Self(1 << 1);
    /// Terminate the worker cooperatively.
    pub const SHUTDOWN: Self = Self(1 << 2);
    /// Chip reset requested (watchdog only; routed through WLAN shutdown).
    pub const CHIP_RESET: Self = Self(1 << 3);
    /// Subsystem-restart shutdown phase requested (watchdog only).
    pub const WLAN_SHUTDOWN: Self = Self(1 << 4);
    /// Subsystem-restart reinit phase requested (watchdog only).
    pub const WLAN_REINIT: Self = Self(1 << 5);

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if any bit of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set intersection.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for EventSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventSet, &str); 6] = [
            (EventSet::POST, "POST"),
            (EventSet::SUSPEND, "SUSPEND"),
            (EventSet::SHUTDOWN, "SHUTDOWN"),
            (EventSet::CHIP_RESET, "CHIP_RESET"),
            (EventSet::WLAN_SHUTDOWN, "WLAN_SHUTDOWN"),
            (EventSet::WLAN_REINIT, "WLAN_REINIT"),
        ];
        let mut set = f.debug_set();
        for (bit, name) in NAMES {
            if self.intersects(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// Atomic event register plus its wait primitive.
#[derive(Default)]
pub struct EventFlags {
    bits: AtomicU32,
    gate: Mutex<()>,
    wake: Condvar,
}

impl EventFlags {
    /// Creates a register with no bits set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `events` and wakes any thread parked in [`Self::wait_any`].
    pub fn set(&self, events: EventSet) {
        self.bits.fetch_or(events.0, Ordering::AcqRel);
        // Taking the gate orders the store before the waiter's re-check.
        drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        self.wake.notify_all();
    }

    /// Clears `events` without waking anyone.
    pub fn clear(&self, events: EventSet) {
        self.bits.fetch_and(!events.0, Ordering::AcqRel);
    }

    /// Atomically clears `events`; returns true if any of them was set.
    pub fn take(&self, events: EventSet) -> bool {
        EventSet(self.bits.fetch_and(!events.0, Ordering::AcqRel)).intersects(events)
    }

    /// Returns true if any bit of `events` is currently set.
    #[must_use]
    pub fn is_set(&self, events: EventSet) -> bool {
        self.snapshot().intersects(events)
    }

    /// Current register contents.
    #[must_use]
    pub fn snapshot(&self) -> EventSet {
        EventSet(self.bits.load(Ordering::Acquire))
    }

    /// Blocks until any bit of `interest` is set; returns the observed bits.
    ///
    /// Does not clear anything: callers decide which bits to consume.
    pub fn wait_any(&self, interest: EventSet) -> EventSet {
        let hit = self.snapshot().intersection(interest);
        if !hit.is_empty() {
            return hit;
        }
        let mut guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let hit = self.snapshot().intersection(interest);
            if !hit.is_empty() {
                return hit;
            }
            guard = self
                .wake
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventFlags").field(&self.snapshot()).finish()
    }
}
