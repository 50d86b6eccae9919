//! Reboot-on-exit.
//!
//! The firmware never stops on purpose. Every way out of it (an error from
//! boot, a dead worker, a panic) ends in [`ExitHandler`], which decides
//! between two outcomes:
//!
//! - **halt**: the failure will repeat on every boot (missing LED, bad
//!   configuration), so the device stops and waits for service
//! - **reboot**: a runtime fault; after a backoff the device warm-resets
//!
//! Logs are flushed before either.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::error::BeaconError;
use tracing::{error, warn};

use crate::logging;

/// Exit status reported for panics.
pub const PANIC_EXIT_STATUS: i32 = 101;

/// Delay before a warm reset, so a fault that recurs right after boot
/// cannot spin the device.
pub const REBOOT_BACKOFF: Duration = Duration::from_secs(5);

/// Restart the device without a power cycle.
pub trait WarmReset: Send + Sync {
    /// Perform the reset. Does not return.
    fn warm_reset(&self) -> !;

    /// Stop for good, without rebooting.
    fn halt(&self) -> ! {
        loop {
            std::thread::park();
        }
    }
}

/// Warm reset for hosted targets: replace the running image with a fresh
/// copy of itself, keeping the original arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReExecReset;

impl WarmReset for ReExecReset {
    fn warm_reset(&self) -> ! {
        match std::env::current_exe() {
            Ok(exe) => {
                let mut command = Command::new(&exe);
                command.args(std::env::args_os().skip(1));
                let err = exec(&mut command);
                error!(exe = %exe.display(), error = %err, "Re-exec failed; aborting");
            }
            Err(e) => error!(error = %e, "Cannot locate firmware image; aborting"),
        }
        std::process::abort()
    }
}

#[cfg(unix)]
fn exec(command: &mut Command) -> std::io::Error {
    use std::os::unix::process::CommandExt;
    command.exec()
}

#[cfg(not(unix))]
fn exec(_command: &mut Command) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Unsupported, "in-place re-exec needs unix")
}

/// What to do about a failure that ended the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop without rebooting.
    Halt,
    /// Warm-reset after the backoff.
    Reboot,
}

impl Disposition {
    /// Halt for boot-fatal [`BeaconError`]s anywhere in the chain, reboot
    /// for everything else.
    #[must_use]
    pub fn of(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<BeaconError>() {
            Some(e) if e.is_fatal_to_boot() => Self::Halt,
            _ => Self::Reboot,
        }
    }
}

/// Converts process exit into a halt or a warm reset, at most once.
#[derive(Debug)]
pub struct ExitHandler<R> {
    reset: R,
    backoff: Duration,
    fired: AtomicBool,
}

impl<R: WarmReset> ExitHandler<R> {
    /// Handler that resets through `reset` without delay.
    #[must_use]
    pub const fn new(reset: R) -> Self {
        Self {
            reset,
            backoff: Duration::ZERO,
            fired: AtomicBool::new(false),
        }
    }

    /// Wait `backoff` before every warm reset.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether a halt or reset has been requested.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Halt or reboot for the error that ended the firmware.
    pub fn handle_error(&self, err: &anyhow::Error) -> ! {
        let code = err
            .downcast_ref::<BeaconError>()
            .map_or("UNCLASSIFIED", BeaconError::error_code);

        match Disposition::of(err) {
            Disposition::Halt => {
                self.claim();
                error!(code, error = %format!("{err:#}"), "Boot aborted; halting without reboot");
                logging::flush();
                self.reset.halt()
            }
            Disposition::Reboot => {
                error!(code, error = %format!("{err:#}"), "Firmware failed");
                self.handle_exit(1)
            }
        }
    }

    /// Log `status`, wait out the backoff, and warm-reset.
    ///
    /// Every status reboots, zero included.
    pub fn handle_exit(&self, status: i32) -> ! {
        self.claim();
        if status == 0 {
            warn!(status, backoff_ms = self.backoff_ms(), "Firmware exited; rebooting");
        } else {
            error!(status, backoff_ms = self.backoff_ms(), "Firmware exited abnormally; rebooting");
        }
        std::thread::sleep(self.backoff);
        logging::flush();
        self.reset.warm_reset()
    }

    /// First caller proceeds; later callers park until the first one takes
    /// the process down.
    fn claim(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            loop {
                std::thread::park();
            }
        }
    }

    fn backoff_ms(&self) -> u64 {
        u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Route panics on any thread into `handler`.
///
/// The previously installed hook still runs first, so the panic message is
/// printed before the reset.
pub fn install_panic_hook<R: WarmReset + 'static>(handler: Arc<ExitHandler<R>>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let thread = std::thread::current();
        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = info.location().map(ToString::to_string).as_deref().unwrap_or("<unknown>"),
            "Panic"
        );
        handler.handle_exit(PANIC_EXIT_STATUS);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use beacon_core::config::ConfigError;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Counts resets and halts, and unwinds instead of doing either.
    #[derive(Default)]
    struct CountingReset {
        resets: AtomicUsize,
        halts: AtomicUsize,
    }

    impl WarmReset for CountingReset {
        fn warm_reset(&self) -> ! {
            self.resets.fetch_add(1, Ordering::SeqCst);
            panic!("warm reset");
        }

        fn halt(&self) -> ! {
            self.halts.fetch_add(1, Ordering::SeqCst);
            panic!("halt");
        }
    }

    impl WarmReset for Arc<CountingReset> {
        fn warm_reset(&self) -> ! {
            (**self).warm_reset()
        }

        fn halt(&self) -> ! {
            (**self).halt()
        }
    }

    fn counting() -> (Arc<CountingReset>, ExitHandler<Arc<CountingReset>>) {
        let reset = Arc::new(CountingReset::default());
        let handler = ExitHandler::new(Arc::clone(&reset));
        (reset, handler)
    }

    fn outcome(reset: &CountingReset) -> (usize, usize) {
        (
            reset.resets.load(Ordering::SeqCst),
            reset.halts.load(Ordering::SeqCst),
        )
    }

    #[test]
    fn test_nonzero_exit_resets_exactly_once() {
        let (reset, handler) = counting();

        let result = catch_unwind(AssertUnwindSafe(|| handler.handle_exit(1)));

        assert!(result.is_err());
        assert!(handler.has_fired());
        assert_eq!(outcome(&reset), (1, 0));
    }

    #[test]
    fn test_zero_exit_also_resets() {
        let (reset, handler) = counting();

        let result = catch_unwind(AssertUnwindSafe(|| handler.handle_exit(0)));
        assert!(result.is_err());
        assert_eq!(outcome(&reset), (1, 0));
    }

    #[test]
    fn test_missing_led_halts_instead_of_rebooting() {
        let (reset, handler) = counting();
        let err = anyhow::Error::new(BeaconError::HardwareBind {
            device: "nosuchled".into(),
            reason: "device not found".into(),
        });

        assert_eq!(Disposition::of(&err), Disposition::Halt);
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle_error(&err)));
        assert!(result.is_err());
        assert_eq!(outcome(&reset), (0, 1));
    }

    #[test]
    fn test_bad_config_behind_context_halts() {
        let err = Err::<(), _>(BeaconError::from(ConfigError::ValidationError {
            field: "supervisor.led".into(),
            message: "must start with a letter".into(),
        }))
        .context("Failed to load configuration")
        .unwrap_err();

        assert_eq!(Disposition::of(&err), Disposition::Halt);
    }

    #[test]
    fn test_runtime_faults_reboot() {
        assert_eq!(
            Disposition::of(&anyhow::Error::new(BeaconError::WorkerExited)),
            Disposition::Reboot
        );
        assert_eq!(
            Disposition::of(&anyhow::anyhow!("subscriber already installed")),
            Disposition::Reboot
        );

        let (reset, handler) = counting();
        let err = anyhow::Error::new(BeaconError::WorkerExited);
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle_error(&err)));
        assert!(result.is_err());
        assert_eq!(outcome(&reset), (1, 0));
    }

    #[test]
    fn test_reboot_waits_for_backoff() {
        let reset = Arc::new(CountingReset::default());
        let handler =
            ExitHandler::new(Arc::clone(&reset)).with_backoff(Duration::from_millis(50));

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle_exit(1)));

        assert!(result.is_err());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(outcome(&reset), (1, 0));
    }

    #[test]
    fn test_handler_starts_unfired() {
        let handler = ExitHandler::new(ReExecReset).with_backoff(REBOOT_BACKOFF);
        assert!(!handler.has_fired());
    }
}
