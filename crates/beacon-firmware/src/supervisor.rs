//! Main-thread supervisor.
//!
//! Brings up the liveness LED, starts the `sensing` worker, then blinks the
//! LED forever. A worker that finishes for any reason ends supervision with
//! [`BeaconError::WorkerExited`], which the binary turns into a reboot.
//! A failed bring-up is fatal to boot and halts the device instead.

use std::convert::Infallible;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beacon_core::config::BeaconConfig;
use beacon_core::entropy::{OsEntropy, SecureRandomSource};
use beacon_core::error::{BeaconError, Result};
use beacon_core::payload::MachineIdSource;
use beacon_core::scheduler::SystemClock;
use beacon_core::sensing::SimulatedSensorArray;
use beacon_core::worker::{self, WorkerPlatform};
use tracing::{debug, error, info, warn};

use crate::led::{bind_led, OutputPin};

/// Name given to the worker thread.
pub const WORKER_THREAD_NAME: &str = "sensing";

/// What a heartbeat observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// The worker is still running.
    Alive,
    /// The worker has finished.
    WorkerDead,
}

/// Toggles the LED and watches the worker.
pub struct Heartbeat {
    led: Box<dyn OutputPin>,
    beats: u64,
}

impl Heartbeat {
    /// Heartbeat over a bound LED.
    #[must_use]
    pub fn new(led: Box<dyn OutputPin>) -> Self {
        Self { led, beats: 0 }
    }

    /// Beats so far.
    #[must_use]
    pub const fn beats(&self) -> u64 {
        self.beats
    }

    /// Current LED level.
    #[must_use]
    pub fn led_level(&self) -> bool {
        self.led.level()
    }

    /// One heartbeat: toggle, log, check the worker.
    ///
    /// A failed LED write is logged and otherwise ignored.
    pub fn beat<T>(&mut self, worker: &JoinHandle<T>) -> Pulse {
        if let Err(e) = self.led.toggle() {
            warn!(led = self.led.name(), error = %e, "Failed to toggle LED");
        }
        self.beats += 1;
        info!(beat = self.beats, "main thread still running");

        if worker.is_finished() {
            Pulse::WorkerDead
        } else {
            Pulse::Alive
        }
    }
}

/// Owns hardware bring-up and the worker's lifetime.
pub struct MainThreadSupervisor {
    config: BeaconConfig,
}

impl MainThreadSupervisor {
    /// Supervisor for a loaded configuration.
    #[must_use]
    pub const fn new(config: BeaconConfig) -> Self {
        Self { config }
    }

    /// Bind and configure the liveness LED.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::HardwareBind`] if the LED cannot be bound.
    pub fn bring_up(&self) -> Result<Box<dyn OutputPin>> {
        let supervisor = &self.config.supervisor;
        info!(led = %supervisor.led, backend = ?supervisor.led_backend, "Hardware bring-up");
        let led = bind_led(&supervisor.led, supervisor.led_backend).map_err(|e| {
            error!(led = %supervisor.led, error = %e, "Could not bind LED");
            BeaconError::from(e)
        })?;
        Ok(led)
    }

    /// Bring up, start the worker, heartbeat until the worker dies.
    ///
    /// # Errors
    ///
    /// Returns the bring-up or spawn failure, or [`BeaconError::WorkerExited`].
    pub fn run(self) -> Result<Infallible> {
        let led = self.bring_up()?;
        entropy_self_test();

        let period = Duration::from_millis(self.config.supervisor.heartbeat_ms);
        let stack_bytes = self.config.supervisor.worker_stack_bytes;
        let config = self.config;
        let handle = spawn_worker(stack_bytes, move || sensing_main(&config))?;

        let mut heartbeat = Heartbeat::new(led);
        loop {
            thread::sleep(period);
            if heartbeat.beat(&handle) == Pulse::WorkerDead {
                error!(beats = heartbeat.beats(), "Sensing worker is gone");
                return Err(BeaconError::WorkerExited);
            }
        }
    }
}

/// Spawn the worker thread with the firmware's name and stack size.
///
/// # Errors
///
/// Returns [`BeaconError::WorkerSpawn`] if the OS refuses the thread.
pub fn spawn_worker<F>(stack_bytes: usize, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .stack_size(stack_bytes)
        .spawn(body)
        .map_err(|e| BeaconError::WorkerSpawn(e.to_string()))?;
    debug!(stack_bytes, "Sensing worker spawned");
    Ok(handle)
}

fn sensing_main(config: &BeaconConfig) {
    let platform = WorkerPlatform {
        entropy: SecureRandomSource::new(OsEntropy),
        device_id: MachineIdSource::default(),
    };
    let sensing = config.sensing;
    let Err(e) = worker::run(
        config,
        platform,
        |context, supplier| SimulatedSensorArray::new(context, supplier, sensing),
        &SystemClock,
    );
    error!(error = %e, "Sensing worker stopped");
}

fn entropy_self_test() {
    let mut rng = SecureRandomSource::new(OsEntropy);
    match rng.self_test() {
        Ok(()) => info!("Entropy self-test passed"),
        Err(e) => warn!(error = %e, "Entropy self-test failed; identity keys may fall back"),
    }
}
