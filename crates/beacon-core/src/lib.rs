//! # beacon-core
//!
//! Core orchestration logic for the beacon proximity-sensing firmware.
//!
//! This crate provides:
//! - Identity key provisioning from a hardware random source
//! - Payload supplier construction (fixed test identity or rotating secured identity)
//! - Sensor event fan-out to registered delegates
//! - The fixed-quantum iteration scheduler that drives the sensing subsystem
//! - Layered configuration loading and validation
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`entropy`] - Secure random source with lazy hardware initialisation
//! - [`keys`] - Identity key material and provisioning with fallback
//! - [`payload`] - Payload data suppliers and the identity-mode factory
//! - [`delegate`] - Sensor events, delegates and the fan-out set
//! - [`sensing`] - The sensing subsystem seam and a simulated radio stack
//! - [`scheduler`] - Warm-up, fixed-quantum iteration and heartbeat logging
//! - [`worker`] - Sensing worker boot sequence and run loop
//! - [`context`] - Per-boot execution context
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared domain types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod delegate;
pub mod entropy;
pub mod error;
pub mod keys;
pub mod payload;
pub mod scheduler;
pub mod sensing;
pub mod types;
pub mod worker;

// Re-export primary types for convenience
pub use config::{
    default_config_path, is_valid_device_name, BeaconConfig, ConfigError, ConfigResult,
    ContactLogConfig, IdentityConfig, LedBackend, SupervisorConfig,
};
pub use context::ExecutionContext;
pub use delegate::{ContactLogDelegate, DelegateSet, LoggingDelegate, SensorDelegate, SensorEvent};
pub use entropy::{EntropyError, EntropyResult, EntropySource, OsEntropy, SecureRandomSource};
pub use error::{BeaconError, Result};
pub use keys::{provision_key, IdentityKeyMaterial, KeyProvenance, SECRET_KEY_LEN};
pub use payload::{
    build_supplier, DeviceIdSource, FixedPayloadSupplier, IdentityMode, IdentityParams,
    MachineIdSource, PayloadDataSupplier, SecuredPayloadSupplier, SupplierBuild,
};
pub use scheduler::{Clock, IterationScheduler, SchedulerConfig, SystemClock, Tick};
pub use sensing::{
    SensingError, SensingResult, SensingSubsystem, SimulatedSensorArray, SimulationConfig,
};
pub use types::{PayloadData, Proximity, SensorState, SensorType, TargetIdentifier};
pub use worker::{SensingBoot, WorkerPlatform};
