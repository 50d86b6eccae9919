//! # beacon-firmware
//!
//! Device-side entry point for the beacon proximity-sensing firmware.
//!
//! This library provides the pieces the binary wires together:
//! - [`led`] - liveness indicator binding (sysfs LED class or log-only)
//! - [`supervisor`] - hardware bring-up, worker spawn and the main heartbeat
//! - [`reset`] - reboot-on-exit and the panic hook
//! - [`logging`] - tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod led;
pub mod logging;
pub mod reset;
pub mod supervisor;
