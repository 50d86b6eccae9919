//! Shared sensing data types.
//!
//! These are the values the sensing subsystem hands to delegates. Delegates only
//! ever borrow them for the duration of a callback.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle identifying a remote device for the duration of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetIdentifier(Uuid);

impl TargetIdentifier {
    /// Create a fresh, random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Identity bytes read from (or presented to) a remote target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadData(Vec<u8>);

impl PayloadData {
    /// Wrap raw payload bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lower-case hex rendering, used for logs and the contact log.
    #[must_use]
    pub fn hex_encoded(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for PayloadData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Time-critical data written to us by a remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmediateSendData(Vec<u8>);

impl ImmediateSendData {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lower-case hex rendering.
    #[must_use]
    pub fn hex_encoded(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Unit of a proximity measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityUnit {
    /// Received signal strength in dBm.
    Rssi,
    /// Round-trip time.
    Rtt,
}

/// A single signal-strength sample for one target at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    /// Measurement unit.
    pub unit: ProximityUnit,
    /// Measured value.
    pub value: f64,
}

impl Proximity {
    /// An RSSI sample in dBm.
    #[must_use]
    pub fn rssi(dbm: i16) -> Self {
        Self {
            unit: ProximityUnit::Rssi,
            value: f64::from(dbm),
        }
    }
}

/// The sensor that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Bluetooth Low Energy advertising/scanning.
    Ble,
    /// Keep-awake / background execution sensor.
    Awake,
    /// Any other sensor.
    Other,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ble => "ble",
            Self::Awake => "awake",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Operational state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    /// Sensor is running.
    On,
    /// Sensor is stopped.
    Off,
    /// Underlying hardware is not available.
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_hex_encoding() {
        let payload = PayloadData::new(vec![0x08, 0x03, 0x3a, 0xff]);
        assert_eq!(payload.hex_encoded(), "08033aff");
        assert_eq!(payload.len(), 4);
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_target_identifiers_are_unique() {
        let a = TargetIdentifier::random();
        let b = TargetIdentifier::random();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_rssi_proximity() {
        let p = Proximity::rssi(-60);
        assert_eq!(p.unit, ProximityUnit::Rssi);
        assert!((p.value + 60.0).abs() < f64::EPSILON);
    }
}
