//! Unified error types for the beacon core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers every
//! failure the orchestration layer can surface. Each module also has its own
//! specific error type ([`ConfigError`](crate::config::ConfigError),
//! [`SensingError`](crate::sensing::SensingError)) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Boot classification**: Errors know whether retrying the boot can help
//! - **Stable codes**: Every variant has a machine-readable code for logs
//!
//! Most hardware trouble never becomes an error at all: missing entropy or a
//! missing device identifier degrade to fallback material and are only logged.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::BeaconError;
//!
//! let missing_led = BeaconError::HardwareBind {
//!     device: "led0".into(),
//!     reason: "device not found".into(),
//! };
//! assert!(missing_led.is_fatal_to_boot());
//!
//! // A dead worker is worth a reboot; a missing LED is not.
//! assert!(!BeaconError::WorkerExited.is_fatal_to_boot());
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::sensing::SensingError;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // HARDWARE ERRORS
    // =========================================================================
    /// A hardware output could not be bound or configured.
    #[error("Failed to bind hardware device '{device}': {reason}")]
    HardwareBind {
        /// Device name that was requested.
        device: String,
        /// Driver-level reason.
        reason: String,
    },

    // =========================================================================
    // SENSING ERRORS
    // =========================================================================
    /// The sensing subsystem rejected a lifecycle call.
    #[error("Sensing subsystem error: {0}")]
    Sensing(#[from] SensingError),

    /// The sensing worker thread could not be spawned.
    #[error("Failed to spawn sensing worker: {0}")]
    WorkerSpawn(String),

    /// The sensing worker thread finished. It is meant to run forever.
    #[error("Sensing worker exited")]
    WorkerExited,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// The configuration could not be written back to disk.
    #[error("Failed to persist configuration: {0}")]
    ConfigWriteError(String),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if this error comes from device hardware.
    #[inline]
    #[must_use]
    pub const fn is_hardware_error(&self) -> bool {
        matches!(self, Self::HardwareBind { .. })
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::ConfigWriteError(_)
        )
    }

    /// Returns `true` if booting again cannot fix this error.
    ///
    /// Missing hardware and bad configuration fail the same way on every
    /// boot, so the device halts instead of rebooting. Worker failures are
    /// runtime faults and get a warm reset.
    #[inline]
    #[must_use]
    pub const fn is_fatal_to_boot(&self) -> bool {
        self.is_hardware_error() || self.is_config_error()
    }

    /// Returns a machine-readable error code for logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::HardwareBind { .. } => "HARDWARE_BIND_FAILED",
            Self::Sensing(_) => "SENSING_ERROR",
            Self::WorkerSpawn(_) => "WORKER_SPAWN_FAILED",
            Self::WorkerExited => "WORKER_EXITED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::ConfigWriteError(_) => "CONFIG_WRITE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::ConfigWriteError(format!("{}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BeaconConfig, ConfigError};

    fn bind_error() -> BeaconError {
        BeaconError::HardwareBind {
            device: "led0".into(),
            reason: "missing".into(),
        }
    }

    #[test]
    fn test_hardware_error_classification() {
        assert!(bind_error().is_hardware_error());
        assert!(!BeaconError::Sensing(SensingError::NotStarted).is_hardware_error());
        assert!(!BeaconError::WorkerExited.is_hardware_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(BeaconError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(BeaconError::ConfigValidationError("invalid value".into()).is_config_error());
        assert!(BeaconError::ConfigWriteError("read-only".into()).is_config_error());
        assert!(!BeaconError::WorkerSpawn("oom".into()).is_config_error());
    }

    #[test]
    fn test_boot_fatal_errors_are_hardware_and_config() {
        assert!(bind_error().is_fatal_to_boot());
        assert!(BeaconError::ConfigNotFound(PathBuf::new()).is_fatal_to_boot());
        assert!(BeaconError::ConfigValidationError("x".into()).is_fatal_to_boot());
    }

    #[test]
    fn test_runtime_faults_are_not_fatal_to_boot() {
        assert!(!BeaconError::WorkerExited.is_fatal_to_boot());
        assert!(!BeaconError::WorkerSpawn("oom".into()).is_fatal_to_boot());
        assert!(!BeaconError::Sensing(SensingError::AlreadyStarted).is_fatal_to_boot());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(bind_error().error_code(), "HARDWARE_BIND_FAILED");
        assert_eq!(
            BeaconError::Sensing(SensingError::AlreadyStarted).error_code(),
            "SENSING_ERROR"
        );
        assert_eq!(BeaconError::WorkerExited.error_code(), "WORKER_EXITED");
        assert_eq!(
            BeaconError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: BeaconError = ConfigError::ValidationError {
            field: "scheduler.quantum_ms".into(),
            message: "must be greater than zero".into(),
        }
        .into();
        assert!(err.is_fatal_to_boot());
        assert!(err.to_string().contains("scheduler.quantum_ms"));

        let err: BeaconError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();
        assert!(err.to_string().contains("a: bad; b: worse"));
    }

    #[test]
    fn test_missing_config_file_halts_boot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = BeaconConfig::load(Some(&path)).map_err(BeaconError::from).unwrap_err();
        assert!(matches!(err, BeaconError::ConfigNotFound(ref p) if *p == path));
        assert!(err.is_fatal_to_boot());
    }

    #[test]
    fn test_config_write_failure_maps_to_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let err = BeaconConfig::default()
            .save(&blocker.join("config.toml"))
            .map_err(BeaconError::from)
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_WRITE_ERROR");
    }

    #[test]
    fn test_error_display_messages() {
        assert!(bind_error().to_string().contains("led0"));

        let err = BeaconError::WorkerSpawn("resource exhausted".into());
        assert!(err.to_string().contains("resource exhausted"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
