//! Sensing worker entry point.
//!
//! Everything the sensing side needs is built here, in order, on the worker
//! thread itself:
//!
//! 1. execution context
//! 2. payload supplier (one identity path, see [`build_supplier`])
//! 3. sensing subsystem, with delegates registered
//! 4. `start()`, then the iteration scheduler forever
//!
//! The subsystem is owned by this thread's stack frame and never shared.

use std::convert::Infallible;
use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::BeaconConfig;
use crate::context::ExecutionContext;
use crate::delegate::{ContactLogDelegate, LoggingDelegate, SensorDelegate};
use crate::entropy::{EntropySource, SecureRandomSource};
use crate::error::Result;
use crate::keys::KeyProvenance;
use crate::payload::{build_supplier, DeviceIdSource, IdentityMode, PayloadDataSupplier};
use crate::scheduler::{Clock, IterationScheduler};
use crate::sensing::SensingSubsystem;

/// Hardware handles the worker consumes during boot.
pub struct WorkerPlatform<E, D> {
    /// Secure random source for key provisioning.
    pub entropy: SecureRandomSource<E>,
    /// Hardware-unique identifier for test identities.
    pub device_id: D,
}

/// A started subsystem and the scheduler that will drive it.
pub struct SensingBoot<S> {
    /// The started sensing subsystem.
    pub subsystem: S,
    /// Scheduler anchored at the start instant.
    pub scheduler: IterationScheduler,
    /// Identity path that ran.
    pub mode: IdentityMode,
    /// Key origin in production mode.
    pub key_provenance: Option<KeyProvenance>,
}

/// Build and start the sensing side.
///
/// `construct` plays the role of the subsystem constructor: it receives the
/// execution context and the payload supplier and returns an unstarted
/// subsystem.
///
/// # Errors
///
/// Returns an error if the subsystem rejects delegate registration or start.
pub fn boot<E, D, S, F, C>(
    config: &BeaconConfig,
    platform: &mut WorkerPlatform<E, D>,
    construct: F,
    clock: &C,
) -> Result<SensingBoot<S>>
where
    E: EntropySource,
    D: DeviceIdSource,
    S: SensingSubsystem,
    F: FnOnce(Arc<ExecutionContext>, Arc<dyn PayloadDataSupplier>) -> S,
    C: Clock + ?Sized,
{
    info!("Sensing setup begins");
    let context = ExecutionContext::new();
    info!(
        boot_id = %context.boot_id(),
        booted_at = %context.booted_at().to_rfc3339(),
        "Execution context ready"
    );

    let build = build_supplier(
        config.identity.mode,
        &context,
        config.identity.params(),
        &mut platform.entropy,
        &mut platform.device_id,
    );

    {
        let _sink = context.logging_sink("payload", "boot").entered();
        let sample = build.supplier.payload(clock.now());
        debug!(payload = %sample.hex_encoded(), "Initial payload");
    }

    info!("Creating sensor array");
    let mut subsystem = construct(Arc::clone(&context), Arc::clone(&build.supplier));

    subsystem.add(Arc::new(LoggingDelegate))?;
    if let Some(delegate) = contact_log_delegate(config) {
        subsystem.add(delegate)?;
    }

    info!("Starting sensor array");
    subsystem.start()?;

    Ok(SensingBoot {
        subsystem,
        scheduler: IterationScheduler::new(config.scheduler, clock.now()),
        mode: build.mode,
        key_provenance: build.key_provenance,
    })
}

/// Worker thread body: [`boot`], then iterate forever.
///
/// Only returns if boot fails. The caller treats any return as the worker
/// having died.
///
/// # Errors
///
/// Returns the boot failure.
pub fn run<E, D, S, F, C>(
    config: &BeaconConfig,
    mut platform: WorkerPlatform<E, D>,
    construct: F,
    clock: &C,
) -> Result<Infallible>
where
    E: EntropySource,
    D: DeviceIdSource,
    S: SensingSubsystem,
    F: FnOnce(Arc<ExecutionContext>, Arc<dyn PayloadDataSupplier>) -> S,
    C: Clock + ?Sized,
{
    let SensingBoot {
        mut subsystem,
        scheduler,
        ..
    } = boot(config, &mut platform, construct, clock).map_err(|e| {
        error!(error = %e, code = e.error_code(), "Sensing boot failed");
        e
    })?;
    scheduler.run_forever(&mut subsystem, clock)
}

fn contact_log_delegate(config: &BeaconConfig) -> Option<Arc<dyn SensorDelegate>> {
    let path = config.contact_log.path.as_ref()?;
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            info!(path = %path.display(), "Contact log enabled");
            Some(Arc::new(ContactLogDelegate::new(file)))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not open contact log; continuing without it");
            None
        }
    }
}
