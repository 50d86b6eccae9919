//! Firmware configuration management.
//!
//! Handles loading, saving, and validating beacon configuration including:
//! - Identity mode (test or production) and region codes
//! - Iteration scheduler tuning
//! - Main-thread supervisor settings (liveness LED, worker stack)
//! - Simulated sensing parameters
//! - Contact log destination
//!
//! Sources are layered with the `config` crate: built-in defaults, then a TOML
//! file, then `BEACON__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::{IdentityMode, IdentityParams};
use crate::scheduler::SchedulerConfig;
use crate::sensing::SimulationConfig;

/// Smallest worker stack accepted.
pub const MIN_WORKER_STACK_BYTES: usize = 16 * 1024;

static DEVICE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_:.\-]*$").expect("device name pattern is valid"));

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Writing the configuration file failed.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A source could not be parsed or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Identity provisioning settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Which identity construction path runs at boot.
    pub mode: IdentityMode,
    /// ISO 3166-1 numeric country code.
    pub country_code: u16,
    /// Sub-national region code.
    pub state_code: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let params = IdentityParams::default();
        Self {
            mode: IdentityMode::default(),
            country_code: params.country_code,
            state_code: params.state_code,
        }
    }
}

impl IdentityConfig {
    /// Region codes for payload construction.
    #[must_use]
    pub const fn params(&self) -> IdentityParams {
        IdentityParams {
            country_code: self.country_code,
            state_code: self.state_code,
        }
    }
}

/// How the liveness indicator is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedBackend {
    /// Linux LED class device under `/sys/class/leds`.
    Sysfs,
    /// Log level changes only (development hosts).
    #[default]
    Log,
}

/// Main-thread supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Name of the liveness LED.
    pub led: String,
    /// LED driver.
    pub led_backend: LedBackend,
    /// Main heartbeat period in milliseconds.
    pub heartbeat_ms: u64,
    /// Stack size of the sensing worker thread.
    pub worker_stack_bytes: usize,
    /// Use production logging (JSON files + compact stdout).
    pub production_logging: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            led: "led0".to_string(),
            led_backend: LedBackend::default(),
            heartbeat_ms: 2000,
            worker_stack_bytes: 256 * 1024,
            production_logging: false,
        }
    }
}

/// Contact log settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactLogConfig {
    /// File receiving one JSON line per sensor event. Disabled when unset.
    pub path: Option<PathBuf>,
}

/// Main firmware configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Identity provisioning.
    pub identity: IdentityConfig,
    /// Worker iteration scheduler.
    pub scheduler: SchedulerConfig,
    /// Main-thread supervisor.
    pub supervisor: SupervisorConfig,
    /// Simulated sensing subsystem.
    pub sensing: SimulationConfig,
    /// Contact log.
    pub contact_log: ContactLogConfig,
}

impl BeaconConfig {
    /// Load configuration.
    ///
    /// With `Some(path)` the file must exist. With `None` the platform default
    /// path is used if present. `BEACON__` environment variables override both.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_from(path, env_source())
    }

    fn load_from(path: Option<&Path>, env: config::Environment) -> ConfigResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        builder = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                builder.add_source(config::File::from(path))
            }
            None => builder.add_source(config::File::from(default_config_path()).required(false)),
        };

        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns every violation found.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        check(
            self.scheduler.quantum_ms > 0,
            "scheduler.quantum_ms",
            "must be greater than zero",
        );
        check(
            self.scheduler.heartbeat_period_ms > 0,
            "scheduler.heartbeat_period_ms",
            "must be greater than zero",
        );
        check(
            self.supervisor.heartbeat_ms > 0,
            "supervisor.heartbeat_ms",
            "must be greater than zero",
        );
        check(
            self.supervisor.worker_stack_bytes >= MIN_WORKER_STACK_BYTES,
            "supervisor.worker_stack_bytes",
            "must be at least 16384",
        );
        check(
            is_valid_device_name(&self.supervisor.led),
            "supervisor.led",
            "must start with a letter and contain only letters, digits, '_', ':', '.', '-'",
        );
        check(
            self.sensing.scan_interval_ms > 0,
            "sensing.scan_interval_ms",
            "must be greater than zero",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Whether `name` is an acceptable hardware device name.
#[must_use]
pub fn is_valid_device_name(name: &str) -> bool {
    DEVICE_NAME_RE.is_match(name)
}

/// The platform default configuration path.
///
/// On Linux devices: `/etc/beacon/config.toml`.
/// Elsewhere: the user configuration directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon").map_or_else(
            || PathBuf::from("beacon.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("BEACON")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env_source().source(Some(map))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BeaconConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identity.mode, IdentityMode::Production);
        assert_eq!(config.identity.country_code, 826);
        assert_eq!(config.scheduler.quantum_ms, 250);
        assert_eq!(config.supervisor.led, "led0");
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[identity]
mode = "test"
country_code = 840

[scheduler]
warmup_ticks = 4
"#,
        )
        .unwrap();

        let config = BeaconConfig::load_from(Some(&path), env(&[])).unwrap();
        assert_eq!(config.identity.mode, IdentityMode::Test);
        assert_eq!(config.identity.country_code, 840);
        assert_eq!(config.identity.state_code, 0);
        assert_eq!(config.scheduler.warmup_ticks, 4);
        assert_eq!(config.scheduler.quantum_ms, 250);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\nquantum_ms = 100\n").unwrap();

        let config = BeaconConfig::load_from(
            Some(&path),
            env(&[
                ("BEACON__SCHEDULER__QUANTUM_MS", "50"),
                ("BEACON__IDENTITY__MODE", "test"),
            ]),
        )
        .unwrap();
        assert_eq!(config.scheduler.quantum_ms, 50);
        assert_eq!(config.identity.mode, IdentityMode::Test);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BeaconConfig::load_from(Some(&dir.path().join("absent.toml")), env(&[]));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = BeaconConfig::default();
        config.identity.mode = IdentityMode::Test;
        config.supervisor.led_backend = LedBackend::Sysfs;
        config.contact_log.path = Some(dir.path().join("contacts.log"));

        config.save(&path).unwrap();
        let loaded = BeaconConfig::load_from(Some(&path), env(&[])).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = BeaconConfig::default();
        config.scheduler.quantum_ms = 0;
        config.supervisor.worker_stack_bytes = 1024;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }

        config.scheduler.quantum_ms = 250;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "supervisor.worker_stack_bytes"
        ));
    }

    #[test]
    fn test_device_names() {
        assert!(is_valid_device_name("led0"));
        assert!(is_valid_device_name("gpio0:13"));
        assert!(is_valid_device_name("ACT"));
        assert!(!is_valid_device_name(""));
        assert!(!is_valid_device_name("0led"));
        assert!(!is_valid_device_name("../led0"));
    }
}
