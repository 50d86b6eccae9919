//! Sensing subsystem boundary.
//!
//! The radio stack that advertises, scans and connects is an external
//! component. The orchestration layer only needs the [`SensingSubsystem`]
//! contract: register delegates, start once, then advance it with
//! `iteration(elapsed)` from a single thread.
//!
//! [`SimulatedSensorArray`] implements that contract with a seeded pool of
//! virtual peers so the firmware can run end to end on hosts without the
//! radio stack, and so the scheduler can be exercised in tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::delegate::{DelegateSet, SensorDelegate, SensorEvent};
use crate::payload::PayloadDataSupplier;
use crate::types::{PayloadData, Proximity, SensorState, SensorType, TargetIdentifier};

/// Contract violations reported by a sensing subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensingError {
    /// `start` was called a second time.
    #[error("sensing subsystem already started")]
    AlreadyStarted,

    /// `iteration` or `stop` was called before `start`.
    #[error("sensing subsystem not started")]
    NotStarted,

    /// A delegate was added after `start`.
    #[error("delegates must be added before the sensing subsystem starts")]
    AddAfterStart,
}

/// Scan windows replayed at most after a long gap between iterations.
const MAX_SCAN_BACKLOG: u32 = 8;

/// Result alias for sensing operations.
pub type SensingResult<T> = std::result::Result<T, SensingError>;

/// The external sensing subsystem as seen by the worker thread.
pub trait SensingSubsystem {
    /// Register a delegate. Allowed any number of times before [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Implementations may reject registration after start.
    fn add(&mut self, delegate: Arc<dyn SensorDelegate>) -> SensingResult<()>;

    /// Start advertising and scanning. Called exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`SensingError::AlreadyStarted`] on a second call.
    fn start(&mut self) -> SensingResult<()>;

    /// Stop advertising and scanning.
    ///
    /// # Errors
    ///
    /// Returns [`SensingError::NotStarted`] if never started.
    fn stop(&mut self) -> SensingResult<()>;

    /// Advance pending work by `elapsed`.
    ///
    /// # Errors
    ///
    /// Returns [`SensingError::NotStarted`] before [`start`](Self::start).
    fn iteration(&mut self, elapsed: Duration) -> SensingResult<()>;
}

/// Tuning for [`SimulatedSensorArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Virtual peers in range.
    pub device_count: u32,
    /// Seed for the peer pool and per-scan randomness.
    pub seed: u64,
    /// Simulated time between scan windows, in milliseconds.
    pub scan_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            device_count: 8,
            seed: 42,
            scan_interval_ms: 2000,
        }
    }
}

struct VirtualPeer {
    target: TargetIdentifier,
    payload: PayloadData,
    base_rssi: i16,
    visibility: f64,
    payload_read: bool,
}

/// In-process stand-in for the radio sensing stack.
pub struct SimulatedSensorArray {
    context: Arc<ExecutionContext>,
    supplier: Arc<dyn PayloadDataSupplier>,
    delegates: DelegateSet,
    rng: ChaCha8Rng,
    peers: Vec<VirtualPeer>,
    scan_interval: Duration,
    since_scan: Duration,
    advertised: Option<PayloadData>,
    started: bool,
    iterations: u64,
}

impl SimulatedSensorArray {
    /// Construct from the boot's execution context and payload supplier.
    #[must_use]
    pub fn new(
        context: Arc<ExecutionContext>,
        supplier: Arc<dyn PayloadDataSupplier>,
        config: SimulationConfig,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let peers = (0..config.device_count.min(256))
            .map(|_| {
                let mut id = [0u8; 16];
                rng.fill(&mut id);
                let mut payload = vec![0x10];
                payload.extend_from_slice(&id);
                VirtualPeer {
                    target: TargetIdentifier::from_uuid(
                        uuid::Builder::from_random_bytes(id).into_uuid(),
                    ),
                    payload: PayloadData::new(payload),
                    base_rssi: rng.gen_range(-90..-35),
                    visibility: rng.gen_range(0.3..1.0),
                    payload_read: false,
                }
            })
            .collect();

        Self {
            context,
            supplier,
            delegates: DelegateSet::new(),
            rng,
            peers,
            scan_interval: Duration::from_millis(config.scan_interval_ms.max(1)),
            since_scan: Duration::ZERO,
            advertised: None,
            started: false,
            iterations: 0,
        }
    }

    /// Whether [`start`](SensingSubsystem::start) has run and `stop` has not.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Iterations processed since start.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    fn refresh_advertisement(&mut self) {
        let payload = self.supplier.payload(Utc::now());
        if self.advertised.as_ref() != Some(&payload) {
            let _sink = self.context.logging_sink("sensor", "advertiser").entered();
            info!(payload = %payload.hex_encoded(), "Advertising payload");
            self.advertised = Some(payload);
        }
    }

    fn scan(&mut self) {
        let _sink = self.context.logging_sink("sensor", "scanner").entered();
        let mut seen = 0usize;
        for i in 0..self.peers.len() {
            if self.rng.gen::<f64>() >= self.peers[i].visibility {
                continue;
            }
            seen += 1;
            let rssi = self.peers[i].base_rssi + self.rng.gen_range(-6..=6);
            let proximity = Proximity::rssi(rssi);
            let target = self.peers[i].target;

            self.delegates
                .emit(SensorType::Ble, &SensorEvent::Detect { target });

            if !self.peers[i].payload_read {
                self.peers[i].payload_read = true;
                self.delegates.emit(
                    SensorType::Ble,
                    &SensorEvent::PayloadRead {
                        payload: self.peers[i].payload.clone(),
                        target,
                    },
                );
            }

            self.delegates
                .emit(SensorType::Ble, &SensorEvent::Proximity { proximity, target });
            self.delegates.emit(
                SensorType::Ble,
                &SensorEvent::ProximityWithPayload {
                    proximity,
                    target,
                    payload: self.peers[i].payload.clone(),
                },
            );
        }
        debug!(seen, total = self.peers.len(), "Scan window complete");
    }
}

impl SensingSubsystem for SimulatedSensorArray {
    fn add(&mut self, delegate: Arc<dyn SensorDelegate>) -> SensingResult<()> {
        if self.started {
            return Err(SensingError::AddAfterStart);
        }
        self.delegates.add(delegate);
        Ok(())
    }

    fn start(&mut self) -> SensingResult<()> {
        if self.started {
            return Err(SensingError::AlreadyStarted);
        }
        self.started = true;
        info!(
            delegates = self.delegates.len(),
            peers = self.peers.len(),
            "Sensor array started"
        );
        self.refresh_advertisement();
        self.delegates.emit(
            SensorType::Ble,
            &SensorEvent::StateChange {
                state: SensorState::On,
            },
        );
        Ok(())
    }

    fn stop(&mut self) -> SensingResult<()> {
        if !self.started {
            return Err(SensingError::NotStarted);
        }
        self.started = false;
        self.delegates.emit(
            SensorType::Ble,
            &SensorEvent::StateChange {
                state: SensorState::Off,
            },
        );
        info!("Sensor array stopped");
        Ok(())
    }

    fn iteration(&mut self, elapsed: Duration) -> SensingResult<()> {
        if !self.started {
            return Err(SensingError::NotStarted);
        }
        self.iterations += 1;
        self.refresh_advertisement();

        self.since_scan = (self.since_scan + elapsed).min(self.scan_interval * MAX_SCAN_BACKLOG);
        while self.since_scan >= self.scan_interval {
            self.since_scan -= self.scan_interval;
            self.scan();
        }
        Ok(())
    }
}
