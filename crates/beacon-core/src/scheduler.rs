//! Iteration scheduler for the sensing worker.
//!
//! Wakes every quantum, measures the wall-clock time since the previous wake
//! and hands it to [`SensingSubsystem::iteration`]. The first ticks after
//! start are a warm-up during which the subsystem is not iterated, so early
//! boot and advertising output can settle.
//!
//! Keep the quantum small. It bounds how late the subsystem notices pending
//! connection work, and the radio's supervision timers will not wait.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sensing::SensingSubsystem;

/// Source of wall-clock time.
pub trait Clock {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between ticks, in milliseconds.
    pub quantum_ms: u64,
    /// Ticks skipped after start before the subsystem is iterated.
    pub warmup_ticks: u64,
    /// Interval between heartbeat log lines, in milliseconds.
    pub heartbeat_period_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_ms: 250,
            warmup_ticks: 41,
            heartbeat_period_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    /// Sleep quantum.
    #[must_use]
    pub const fn quantum(&self) -> Duration {
        Duration::from_millis(self.quantum_ms)
    }

    /// Heartbeat every this many ticks (at least 1).
    #[must_use]
    pub fn heartbeat_every(&self) -> u64 {
        (self.heartbeat_period_ms / self.quantum_ms.max(1)).max(1)
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Zero-based tick index.
    pub index: u64,
    /// Time since the previous tick (never negative).
    pub elapsed: Duration,
    /// Whether the subsystem was iterated.
    pub iterated: bool,
    /// Whether a heartbeat was emitted.
    pub heartbeat: bool,
}

/// Drives a [`SensingSubsystem`] forward one tick at a time.
#[derive(Debug, Clone)]
pub struct IterationScheduler {
    config: SchedulerConfig,
    last_tick: DateTime<Utc>,
    iteration_count: u64,
}

impl IterationScheduler {
    /// Scheduler whose first elapsed sample is measured from `started_at`.
    #[must_use]
    pub const fn new(config: SchedulerConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            config,
            last_tick: started_at,
            iteration_count: 0,
        }
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn iteration_count(&self) -> u64 {
        self.iteration_count
    }

    /// Whether the warm-up period is over.
    #[must_use]
    pub const fn warmed_up(&self) -> bool {
        self.iteration_count >= self.config.warmup_ticks
    }

    /// Process one wake-up at `now`.
    ///
    /// A clock that stepped backwards yields a zero elapsed time. Subsystem
    /// errors are logged and do not stop the schedule.
    pub fn tick<S: SensingSubsystem + ?Sized>(&mut self, subsystem: &mut S, now: DateTime<Utc>) -> Tick {
        let elapsed = (now - self.last_tick).to_std().unwrap_or_else(|_| {
            warn!(%now, last = %self.last_tick, "Clock moved backwards; clamping elapsed to zero");
            Duration::ZERO
        });

        let iterated = self.warmed_up();
        if iterated {
            if let Err(e) = subsystem.iteration(elapsed) {
                warn!(error = %e, "Sensing iteration failed");
            }
        }

        let heartbeat = self.iteration_count % self.config.heartbeat_every() == 0;
        if heartbeat {
            info!(iteration = self.iteration_count, "sensing thread still running");
        }

        let tick = Tick {
            index: self.iteration_count,
            elapsed,
            iterated,
            heartbeat,
        };
        self.last_tick = now;
        self.iteration_count += 1;
        tick
    }

    /// Sleep, tick, repeat. Never returns.
    pub fn run_forever<S, C>(mut self, subsystem: &mut S, clock: &C) -> !
    where
        S: SensingSubsystem + ?Sized,
        C: Clock + ?Sized,
    {
        let quantum = self.config.quantum();
        loop {
            std::thread::sleep(quantum);
            self.tick(subsystem, clock.now());
        }
    }
}
