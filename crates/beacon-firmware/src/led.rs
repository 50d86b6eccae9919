//! Liveness indicator output.
//!
//! The main thread toggles one output every heartbeat. On devices that is a
//! LED exposed through the sysfs LED class; in development it is a log line.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_core::{BeaconError, LedBackend};
use thiserror::Error;
use tracing::{debug, info};

/// Default sysfs LED class directory.
pub const SYSFS_LED_ROOT: &str = "/sys/class/leds";

/// Errors that can occur while binding or driving an output.
#[derive(Debug, Error)]
pub enum GpioError {
    /// No device with this name exists.
    #[error("No output device named '{name}' at {}", .path.display())]
    NotFound {
        /// Requested device name.
        name: String,
        /// Where it was looked for.
        path: PathBuf,
    },

    /// The device exists but could not be configured or written.
    #[error("Failed to drive output '{name}': {source}")]
    Io {
        /// Device name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<GpioError> for BeaconError {
    fn from(err: GpioError) -> Self {
        match err {
            GpioError::NotFound { name, .. } => Self::HardwareBind {
                device: name,
                reason: "device not found".to_string(),
            },
            GpioError::Io { name, source } => Self::HardwareBind {
                device: name,
                reason: source.to_string(),
            },
        }
    }
}

/// A bound, output-configured pin.
pub trait OutputPin: Send {
    /// Device name the pin was bound by.
    fn name(&self) -> &str;

    /// Current output level.
    fn level(&self) -> bool;

    /// Drive the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the write.
    fn set_level(&mut self, high: bool) -> Result<(), GpioError>;

    /// Invert the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the write.
    fn toggle(&mut self) -> Result<(), GpioError> {
        let next = !self.level();
        self.set_level(next)
    }
}

/// Bind `name` with the configured backend and drive it low.
///
/// # Errors
///
/// Returns [`GpioError::NotFound`] if the sysfs device does not exist.
pub fn bind_led(name: &str, backend: LedBackend) -> Result<Box<dyn OutputPin>, GpioError> {
    match backend {
        LedBackend::Sysfs => Ok(Box::new(SysfsLed::bind_in(Path::new(SYSFS_LED_ROOT), name)?)),
        LedBackend::Log => Ok(Box::new(LogLed::new(name))),
    }
}

/// LED driven through `<root>/<name>/brightness`.
#[derive(Debug)]
pub struct SysfsLed {
    name: String,
    brightness: PathBuf,
    level: bool,
}

impl SysfsLed {
    /// Bind the LED `name` under `root`.
    ///
    /// Detaches any kernel trigger so the brightness file is ours, then drives
    /// the output low.
    ///
    /// # Errors
    ///
    /// Returns an error if the device directory is missing or not writable.
    pub fn bind_in(root: &Path, name: &str) -> Result<Self, GpioError> {
        let dir = root.join(name);
        let brightness = dir.join("brightness");
        if !brightness.exists() {
            return Err(GpioError::NotFound {
                name: name.to_string(),
                path: dir,
            });
        }

        let trigger = dir.join("trigger");
        if trigger.exists() {
            fs::write(&trigger, "none").map_err(|source| GpioError::Io {
                name: name.to_string(),
                source,
            })?;
        }

        let mut led = Self {
            name: name.to_string(),
            brightness,
            level: false,
        };
        led.set_level(false)?;
        info!(led = name, path = %dir.display(), "Bound sysfs LED");
        Ok(led)
    }
}

impl OutputPin for SysfsLed {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> bool {
        self.level
    }

    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        fs::write(&self.brightness, if high { "1" } else { "0" }).map_err(|source| {
            GpioError::Io {
                name: self.name.clone(),
                source,
            }
        })?;
        self.level = high;
        Ok(())
    }
}

/// Indicator that only logs its level changes.
#[derive(Debug)]
pub struct LogLed {
    name: String,
    level: bool,
}

impl LogLed {
    /// A log-only indicator, initially low.
    #[must_use]
    pub fn new(name: &str) -> Self {
        info!(led = name, "Using log-only liveness indicator");
        Self {
            name: name.to_string(),
            level: false,
        }
    }
}

impl OutputPin for LogLed {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> bool {
        self.level
    }

    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        self.level = high;
        debug!(led = %self.name, level = u8::from(high), "LED");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_led(root: &Path, name: &str, with_trigger: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("brightness"), "1").unwrap();
        if with_trigger {
            fs::write(dir.join("trigger"), "heartbeat").unwrap();
        }
    }

    #[test]
    fn test_sysfs_bind_drives_low_and_detaches_trigger() {
        let root = tempfile::tempdir().unwrap();
        fake_led(root.path(), "led0", true);

        let led = SysfsLed::bind_in(root.path(), "led0").unwrap();
        assert!(!led.level());
        assert_eq!(fs::read_to_string(root.path().join("led0/brightness")).unwrap(), "0");
        assert_eq!(fs::read_to_string(root.path().join("led0/trigger")).unwrap(), "none");
    }

    #[test]
    fn test_sysfs_toggle_writes_brightness() {
        let root = tempfile::tempdir().unwrap();
        fake_led(root.path(), "ACT", false);

        let mut led = SysfsLed::bind_in(root.path(), "ACT").unwrap();
        led.toggle().unwrap();
        assert!(led.level());
        assert_eq!(fs::read_to_string(root.path().join("ACT/brightness")).unwrap(), "1");
        led.toggle().unwrap();
        assert_eq!(fs::read_to_string(root.path().join("ACT/brightness")).unwrap(), "0");
    }

    #[test]
    fn test_sysfs_missing_device_fails_to_bind() {
        let root = tempfile::tempdir().unwrap();
        let err = SysfsLed::bind_in(root.path(), "led7").unwrap_err();
        assert!(matches!(err, GpioError::NotFound { ref name, .. } if name == "led7"));

        let beacon: BeaconError = err.into();
        assert!(beacon.is_hardware_error());
        assert!(beacon.is_fatal_to_boot());
    }

    #[test]
    fn test_log_led_toggles() {
        let mut led = bind_led("led0", LedBackend::Log).unwrap();
        assert_eq!(led.name(), "led0");
        led.toggle().unwrap();
        assert!(led.level());
        led.toggle().unwrap();
        assert!(!led.level());
    }
}
