//! Watchdog recovery tests: restart sequencing, busy rejection, faulting.
//!
//! The watchdog is a process-wide singleton, so the tests are serialized.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use minstant::Instant;
use serial_test::serial;

use stratus::{
    ChipResetReason, RecoveryOps, RecoveryResult, Watchdog, WatchdogConfig, WatchdogError,
};

/// Recovery callbacks that count invocations and optionally fail.
#[derive(Default)]
struct TestOps {
    shutdowns: AtomicUsize,
    reinits: AtomicUsize,
    fail_shutdown: AtomicBool,
    fail_reinit: AtomicBool,
}

impl TestOps {
    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    fn reinits(&self) -> usize {
        self.reinits.load(Ordering::Acquire)
    }
}

impl RecoveryOps for TestOps {
    fn perform_shutdown(&self) -> RecoveryResult {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        if self.fail_shutdown.load(Ordering::Acquire) {
            return Err("simulated shutdown failure".into());
        }
        Ok(())
    }

    fn perform_reinit(&self) -> RecoveryResult {
        self.reinits.fetch_add(1, Ordering::AcqRel);
        if self.fail_reinit.load(Ordering::Acquire) {
            return Err("simulated reinit failure".into());
        }
        Ok(())
    }
}

fn open_with(ops: &Arc<TestOps>) -> Arc<Watchdog> {
    let recovery: Arc<dyn RecoveryOps> = ops.clone();
    Watchdog::open(recovery, &WatchdogConfig::default()).expect("watchdog open")
}

/// Polls `cond` until it holds or five seconds elapse.
fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
#[serial]
fn open_close_reopen() {
    let ops = Arc::new(TestOps::default());
    let _dog = open_with(&ops);
    Watchdog::close().expect("close");

    let dog = open_with(&ops);
    assert!(!dog.reset_in_progress());
    drop(dog);
    Watchdog::close().expect("second close");
}

#[test]
#[serial]
fn close_without_open_fails() {
    assert!(matches!(Watchdog::close(), Err(WatchdogError::NotOpen)));
}

#[test]
#[serial]
fn double_open_is_rejected() {
    let ops = Arc::new(TestOps::default());
    let _dog = open_with(&ops);

    let recovery: Arc<dyn RecoveryOps> = ops.clone();
    assert!(matches!(
        Watchdog::open(recovery, &WatchdogConfig::default()),
        Err(WatchdogError::AlreadyOpen)
    ));

    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn shutdown_then_reinit_completes_a_restart_window() {
    let ops = Arc::new(TestOps::default());
    let dog = open_with(&ops);

    dog.request_wlan_shutdown().expect("shutdown trigger");
    assert!(wait_until(|| ops.shutdowns() == 1));
    assert!(wait_until(|| dog.reset_in_progress()));

    dog.request_wlan_reinit().expect("reinit trigger");
    assert!(wait_until(|| ops.reinits() == 1));
    assert!(wait_until(|| !dog.reset_in_progress()));

    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn restart_windows_never_overlap() {
    let ops = Arc::new(TestOps::default());
    let dog = open_with(&ops);

    dog.request_wlan_shutdown().expect("first trigger");
    assert!(wait_until(|| dog.reset_in_progress()));

    // The window is open: further shutdown requests are rejected without a
    // second callback invocation.
    assert!(matches!(
        dog.request_wlan_shutdown(),
        Err(WatchdogError::Busy)
    ));
    assert!(matches!(
        dog.request_chip_reset(ChipResetReason::UserRequest),
        Err(WatchdogError::Busy)
    ));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ops.shutdowns(), 1);

    dog.request_wlan_reinit().expect("reinit");
    assert!(wait_until(|| !dog.reset_in_progress()));

    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn rapid_double_shutdown_invokes_the_callback_once() {
    let ops = Arc::new(TestOps::default());
    let dog = open_with(&ops);

    dog.request_wlan_shutdown().expect("first trigger");
    // The window opens at admission, so the immediate duplicate is rejected
    // before the worker has run at all.
    assert!(matches!(
        dog.request_wlan_shutdown(),
        Err(WatchdogError::Busy)
    ));
    assert!(dog.reset_in_progress());

    assert!(wait_until(|| ops.shutdowns() == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ops.shutdowns(), 1);

    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn reinit_without_shutdown_proceeds() {
    let ops = Arc::new(TestOps::default());
    let dog = open_with(&ops);

    dog.request_wlan_reinit().expect("reinit trigger");
    assert!(wait_until(|| ops.reinits() == 1));
    assert!(!dog.reset_in_progress());
    assert_eq!(ops.shutdowns(), 0);

    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn chip_reset_routes_through_the_shutdown_path() {
    let ops = Arc::new(TestOps::default());
    let dog = open_with(&ops);

    dog.request_chip_reset(ChipResetReason::FirmwareAssert)
        .expect("chip reset trigger");
    assert!(wait_until(|| ops.shutdowns() == 1));
    assert!(dog.reset_in_progress());
    assert_eq!(dog.chip_reset_count(ChipResetReason::FirmwareAssert), 1);
    assert_eq!(dog.chip_reset_count(ChipResetReason::BeaconMiss), 0);

    dog.request_wlan_reinit().expect("reinit");
    assert!(wait_until(|| !dog.reset_in_progress()));

    // A second reset for a different reason is accounted separately.
    dog.request_chip_reset(ChipResetReason::BeaconMiss)
        .expect("second chip reset");
    assert!(wait_until(|| ops.shutdowns() == 2));
    assert_eq!(dog.chip_reset_count(ChipResetReason::BeaconMiss), 1);

    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn failed_shutdown_faults_the_watchdog() {
    let ops = Arc::new(TestOps::default());
    ops.fail_shutdown.store(true, Ordering::Release);
    let dog = open_with(&ops);

    dog.request_wlan_shutdown().expect("trigger accepted");
    assert!(wait_until(|| ops.shutdowns() == 1));
    assert!(wait_until(|| dog.fault().is_some()));

    // No retry, and every further trigger fails fast.
    assert!(matches!(
        dog.request_wlan_shutdown(),
        Err(WatchdogError::Faulted { .. })
    ));
    assert!(matches!(
        dog.request_wlan_reinit(),
        Err(WatchdogError::Faulted { .. })
    ));
    assert!(matches!(
        dog.request_chip_reset(ChipResetReason::CommandTimeout),
        Err(WatchdogError::Faulted { .. })
    ));
    assert_eq!(ops.shutdowns(), 1);

    // The worker itself stays alive for a clean close.
    drop(dog);
    Watchdog::close().expect("close");
}

#[test]
#[serial]
fn failed_reinit_faults_the_watchdog() {
    let ops = Arc::new(TestOps::default());
    ops.fail_reinit.store(true, Ordering::Release);
    let dog = open_with(&ops);

    dog.request_wlan_shutdown().expect("shutdown");
    assert!(wait_until(|| dog.reset_in_progress()));

    dog.request_wlan_reinit().expect("reinit trigger accepted");
    assert!(wait_until(|| ops.reinits() == 1));
    assert!(wait_until(|| dog.fault().is_some()));
    // The restart window never completed.
    assert!(dog.reset_in_progress());

    drop(dog);
    Watchdog::close().expect("close");
}
