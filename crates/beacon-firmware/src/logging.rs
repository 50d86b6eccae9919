//! Logging setup for the boot/reboot lifecycle.
//!
//! - **Production**: JSON to a daily rolling file through a background writer,
//!   plus compact lines written straight to the console
//! - **Development**: pretty console output with span events
//!
//! The console is written synchronously in both modes: the lines that explain
//! a halt or a reboot are the last ones the process produces. The file writer
//! is buffered, so [`flush`] must run before the process image is replaced.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use beacon_core::config::SupervisorConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Background writers still holding buffered lines.
static PENDING: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());

/// Environment variable holding the default filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "BEACON_LOG_LEVEL";

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Pretty console only.
    Development,
    /// Rolling JSON files under the device log directory, plus the console.
    Production,
}

impl LogMode {
    /// Mode selected by the supervisor configuration.
    #[must_use]
    pub const fn for_supervisor(config: &SupervisorConfig) -> Self {
        if config.production_logging {
            Self::Production
        } else {
            Self::Development
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed or a subscriber is
/// already installed.
pub fn init(mode: LogMode) -> anyhow::Result<()> {
    let env_filter = env_filter()?;
    match mode {
        LogMode::Production => init_production(env_filter),
        LogMode::Development => init_development(env_filter),
    }
}

/// Drain buffered log writers.
///
/// Blocks until every background writer has written out what it holds. Lines
/// logged afterwards still reach the console but not the log file.
pub fn flush() {
    drain(&PENDING);
}

fn drain(pending: &Mutex<Vec<WorkerGuard>>) {
    let guards: Vec<WorkerGuard> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();
    drop(guards);
}

fn hold(pending: &Mutex<Vec<WorkerGuard>>, guard: WorkerGuard) {
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(guard);
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?)
}

fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir).ok();

    let (file_writer, file_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        &log_dir,
        "beacon",
    ));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stdout)
        .with_thread_names(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    hold(&PENDING, file_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) -> anyhow::Result<()> {
    let console_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;
    Ok(())
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
