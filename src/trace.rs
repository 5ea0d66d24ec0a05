//! Tracing infrastructure for debugging the scheduler.
//!
//! Enable with `--features tracing`. All trace macros become no-ops when
//! the feature is disabled, ensuring zero overhead in production.

/// Initialize the tracing subscriber.
///
/// Call this at the start of tests or a host binary to enable trace output.
/// Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stratus=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

// When tracing is enabled, re-export macros from the tracing crate.
#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, warn};

// When tracing is disabled, provide no-op macro implementations.
#[cfg(not(feature = "tracing"))]
mod noop {
    macro_rules! debug_noop {
        ($($arg:tt)*) => {{}};
    }

    macro_rules! error_noop {
        ($($arg:tt)*) => {{}};
    }

    macro_rules! info_noop {
        ($($arg:tt)*) => {{}};
    }

    macro_rules! warn_noop {
        ($($arg:tt)*) => {{}};
    }

    pub(crate) use debug_noop as debug;
    pub(crate) use error_noop as error;
    pub(crate) use info_noop as info;
    pub(crate) use warn_noop as warn;
}

#[cfg(not(feature = "tracing"))]
pub(crate) use noop::{debug, error, info, warn};
