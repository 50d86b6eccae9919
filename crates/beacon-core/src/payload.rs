//! Device identity payloads.
//!
//! Two suppliers exist and exactly one is built per boot, chosen by
//! [`IdentityMode`]:
//!
//! - [`FixedPayloadSupplier`] presents the same bytes forever. It is trackable
//!   and only meant for testing.
//! - [`SecuredPayloadSupplier`] presents a contact identifier derived from the
//!   secret key that changes every rotation period.
//!
//! Layouts are local to this firmware:
//!
//! ```text
//! fixed:   [0x08][country u16 BE][state u16 BE][client id u64 BE]
//! secured: [0x10][country u16 BE][state u16 BE][contact identifier; 16]
//! ```

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::entropy::{EntropySource, SecureRandomSource};
use crate::keys::{provision_key, IdentityKeyMaterial, KeyProvenance};
use crate::types::PayloadData;

/// Header byte of the fixed payload.
pub const FIXED_PAYLOAD_HEADER: u8 = 0x08;

/// Header byte of the secured payload.
pub const SECURED_PAYLOAD_HEADER: u8 = 0x10;

/// Client identifier used when no hardware identifier can be read.
pub const PLACEHOLDER_CLIENT_ID: u64 = 1_234_567_890;

/// Bytes read from the hardware identifier source.
pub const DEVICE_ID_LEN: usize = 8;

/// Length of a contact identifier.
pub const CONTACT_IDENTIFIER_LEN: usize = 16;

/// Default rotation period for contact identifiers.
pub const DEFAULT_ROTATION_MINUTES: u16 = 6;

/// Produces the identity bytes presented to nearby devices.
pub trait PayloadDataSupplier: Send + Sync {
    /// The payload to present at `at`.
    fn payload(&self, at: DateTime<Utc>) -> PayloadData;
}

/// Which identity construction path runs at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Deterministic, non-rotating identity. Trackable; test use only.
    Test,
    /// Privacy-preserving rotating identity backed by a secret key.
    #[default]
    Production,
}

/// Region codes embedded in every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityParams {
    /// ISO 3166-1 numeric country code.
    pub country_code: u16,
    /// Sub-national region code (0 = national default).
    pub state_code: u16,
}

impl Default for IdentityParams {
    fn default() -> Self {
        Self {
            country_code: 826,
            state_code: 0,
        }
    }
}

/// Driver interface to a hardware-unique identifier (serial number, etc.).
pub trait DeviceIdSource {
    /// Copy up to `buf.len()` identifier bytes into `buf`.
    ///
    /// # Errors
    ///
    /// Returns a driver status code when no identifier is available.
    fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32>;
}

/// Reads a hex machine identifier from a file such as `/etc/machine-id`.
#[derive(Debug, Clone)]
pub struct MachineIdSource {
    path: std::path::PathBuf,
}

impl MachineIdSource {
    /// Status reported when the identifier file is missing or unreadable.
    pub const NOT_FOUND: i32 = -2;
    /// Status reported when the file does not contain hex.
    pub const MALFORMED: i32 = -5;

    /// Source reading from `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for MachineIdSource {
    fn default() -> Self {
        Self::new("/etc/machine-id")
    }
}

impl DeviceIdSource for MachineIdSource {
    fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
        let content = std::fs::read_to_string(&self.path).map_err(|_| Self::NOT_FOUND)?;
        let bytes = hex::decode(content.trim()).map_err(|_| Self::MALFORMED)?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
}

/// Derive the test-mode client identifier.
///
/// Reads [`DEVICE_ID_LEN`] bytes (little-endian, zero padded when fewer are
/// returned). Falls back to [`PLACEHOLDER_CLIENT_ID`] when the source has
/// nothing to offer.
pub fn derive_client_id<D: DeviceIdSource + ?Sized>(source: &mut D) -> u64 {
    let mut unique_id = [0u8; DEVICE_ID_LEN];
    match source.get(&mut unique_id) {
        Ok(read) if read > 0 => {
            debug!(read, "Read bytes for a unique, persistent device id");
            u64::from_le_bytes(unique_id)
        }
        Ok(_) => {
            debug!("Hardware identifier source returned no bytes");
            PLACEHOLDER_CLIENT_ID
        }
        Err(status) => {
            debug!(status, "Couldn't read hardware info for device");
            PLACEHOLDER_CLIENT_ID
        }
    }
}

/// Deterministic payload. Never rotates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPayloadSupplier {
    params: IdentityParams,
    client_id: u64,
}

impl FixedPayloadSupplier {
    /// Supplier presenting `client_id` in `params`' region.
    #[must_use]
    pub const fn new(params: IdentityParams, client_id: u64) -> Self {
        Self { params, client_id }
    }

    /// The embedded client identifier.
    #[must_use]
    pub const fn client_id(&self) -> u64 {
        self.client_id
    }
}

impl PayloadDataSupplier for FixedPayloadSupplier {
    fn payload(&self, _at: DateTime<Utc>) -> PayloadData {
        let mut bytes = Vec::with_capacity(13);
        bytes.push(FIXED_PAYLOAD_HEADER);
        bytes.extend_from_slice(&self.params.country_code.to_be_bytes());
        bytes.extend_from_slice(&self.params.state_code.to_be_bytes());
        bytes.extend_from_slice(&self.client_id.to_be_bytes());
        PayloadData::new(bytes)
    }
}

/// Rotation schedule and derivation functions for contact identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivation {
    rotation_minutes: u16,
}

impl KeyDerivation {
    /// Derivation rotating every `rotation_minutes` (minimum one minute).
    #[must_use]
    pub fn new(rotation_minutes: u16) -> Self {
        Self {
            rotation_minutes: rotation_minutes.max(1),
        }
    }

    /// Days since the Unix epoch at `at`.
    #[must_use]
    pub fn day(at: DateTime<Utc>) -> u32 {
        u32::try_from(at.timestamp().div_euclid(86_400)).unwrap_or(0)
    }

    /// Rotation period index within the day at `at`.
    #[must_use]
    pub fn period(&self, at: DateTime<Utc>) -> u16 {
        let minute_of_day = at.hour() * 60 + at.minute();
        u16::try_from(minute_of_day / u32::from(self.rotation_minutes)).unwrap_or(u16::MAX)
    }

    /// Per-day key: `SHA-256(secret || day BE)`.
    #[must_use]
    pub fn day_key(&self, secret: &IdentityKeyMaterial, day: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(day.to_be_bytes());
        hasher.finalize().into()
    }

    /// Contact identifier: first 16 bytes of `SHA-256(day key || period BE)`.
    #[must_use]
    pub fn contact_identifier(
        &self,
        day_key: &[u8; 32],
        period: u16,
    ) -> [u8; CONTACT_IDENTIFIER_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(day_key);
        hasher.update(period.to_be_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; CONTACT_IDENTIFIER_LEN];
        id.copy_from_slice(&digest[..CONTACT_IDENTIFIER_LEN]);
        id
    }
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATION_MINUTES)
    }
}

/// Privacy-preserving payload whose identifier rotates over time.
pub struct SecuredPayloadSupplier {
    context: Arc<ExecutionContext>,
    params: IdentityParams,
    key: IdentityKeyMaterial,
    derivation: KeyDerivation,
}

impl SecuredPayloadSupplier {
    /// Build from provisioned key material.
    #[must_use]
    pub const fn new(
        context: Arc<ExecutionContext>,
        params: IdentityParams,
        key: IdentityKeyMaterial,
        derivation: KeyDerivation,
    ) -> Self {
        Self {
            context,
            params,
            key,
            derivation,
        }
    }
}

impl PayloadDataSupplier for SecuredPayloadSupplier {
    fn payload(&self, at: DateTime<Utc>) -> PayloadData {
        let _sink = self.context.logging_sink("payload", "secured").entered();
        let day_key = self.derivation.day_key(&self.key, KeyDerivation::day(at));
        let contact_id = self
            .derivation
            .contact_identifier(&day_key, self.derivation.period(at));

        let mut bytes = Vec::with_capacity(5 + CONTACT_IDENTIFIER_LEN);
        bytes.push(SECURED_PAYLOAD_HEADER);
        bytes.extend_from_slice(&self.params.country_code.to_be_bytes());
        bytes.extend_from_slice(&self.params.state_code.to_be_bytes());
        bytes.extend_from_slice(&contact_id);
        PayloadData::new(bytes)
    }
}

/// The supplier built for this boot and how it was built.
pub struct SupplierBuild {
    /// The supplier, shared read-only with the sensing subsystem.
    pub supplier: Arc<dyn PayloadDataSupplier>,
    /// The construction path that ran.
    pub mode: IdentityMode,
    /// Key origin; `None` in test mode where no key is provisioned.
    pub key_provenance: Option<KeyProvenance>,
}

/// Build the boot's payload supplier.
///
/// Runs exactly one construction path. Test mode only touches `device_id`;
/// production mode only touches `rng`. Neither path can fail: missing
/// hardware degrades to placeholder/fallback material.
pub fn build_supplier<E, D>(
    mode: IdentityMode,
    context: &Arc<ExecutionContext>,
    params: IdentityParams,
    rng: &mut SecureRandomSource<E>,
    device_id: &mut D,
) -> SupplierBuild
where
    E: EntropySource,
    D: DeviceIdSource + ?Sized,
{
    match mode {
        IdentityMode::Test => {
            warn!("Using fixed test payload; this identity is trackable and must not ship");
            let client_id = derive_client_id(device_id);
            info!(client_id, "Final client id");
            SupplierBuild {
                supplier: Arc::new(FixedPayloadSupplier::new(params, client_id)),
                mode,
                key_provenance: None,
            }
        }
        IdentityMode::Production => {
            let (key, provenance) = provision_key(rng);
            let supplier = SecuredPayloadSupplier::new(
                Arc::clone(context),
                params,
                key,
                KeyDerivation::default(),
            );
            info!(?provenance, "Created secured payload data supplier");
            SupplierBuild {
                supplier: Arc::new(supplier),
                mode,
                key_provenance: Some(provenance),
            }
        }
    }
}
