//! # beacon-firmware
//!
//! Boots the beacon: loads configuration, starts logging, then hands the
//! process to the main-thread supervisor. Nothing here ever exits normally:
//! a missing LED or a bad configuration halts the device, and every other
//! way out becomes a warm reset after a short backoff.
//!
//! ## Running
//!
//! ```bash
//! # Development (log-only LED, pretty logs)
//! BEACON_CONFIG=./beacon.toml cargo run --package beacon-firmware
//!
//! # On the device
//! ./beacon-firmware
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beacon_core::config::BeaconConfig;
use beacon_core::error::BeaconError;
use beacon_firmware::logging::{self, LogMode};
use beacon_firmware::reset::{self, ExitHandler, ReExecReset, REBOOT_BACKOFF};
use beacon_firmware::supervisor::MainThreadSupervisor;
use tracing::info;

/// Environment variable naming an explicit configuration file.
const CONFIG_ENV: &str = "BEACON_CONFIG";

fn main() {
    let exit = Arc::new(ExitHandler::new(ReExecReset).with_backoff(REBOOT_BACKOFF));
    reset::install_panic_hook(Arc::clone(&exit));

    let Err(e) = run();
    eprintln!("beacon-firmware: {e:#}");
    exit.handle_error(&e)
}

fn run() -> anyhow::Result<Infallible> {
    let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let loaded = BeaconConfig::load(path.as_deref()).map_err(BeaconError::from);

    // Without a usable config, log to the console so the halt is visible.
    let mode = loaded
        .as_ref()
        .map_or(LogMode::Development, |c| LogMode::for_supervisor(&c.supervisor));
    logging::init(mode)?;
    let config = loaded.context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.identity.mode,
        "Starting beacon-firmware"
    );

    Ok(MainThreadSupervisor::new(config).run()?)
}
