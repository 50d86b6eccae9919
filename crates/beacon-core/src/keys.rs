//! Secret key material for the secured identity payload.
//!
//! The key lives in a fixed-capacity buffer. Writes and reads are bounded by
//! that capacity; going past it is a programming error and panics.

use std::fmt;

use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::entropy::{EntropySource, SecureRandomSource};

/// Capacity of the production secret key.
pub const SECRET_KEY_LEN: usize = 2048;

/// Chunk size used by the readback self-check.
pub const VERIFY_CHUNK_LEN: usize = 64;

/// Fixed-capacity secret buffer.
///
/// Bytes are zeroed when the value is dropped.
pub struct IdentityKeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
    len: usize,
}

impl IdentityKeyMaterial {
    /// A full buffer of `capacity` bytes, every byte set to `fill`.
    #[must_use]
    pub fn filled(fill: u8, capacity: usize) -> Self {
        Self {
            bytes: Zeroizing::new(vec![fill; capacity]),
            len: capacity,
        }
    }

    /// The fixed, non-random key used when no entropy is available.
    #[must_use]
    pub fn fallback() -> Self {
        Self::filled(0x00, SECRET_KEY_LEN)
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written since the last [`clear`](Self::clear).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero every byte and rewind the write position.
    pub fn clear(&mut self) {
        self.bytes.as_mut_slice().zeroize();
        self.len = 0;
    }

    /// Append `src[offset..offset + length]` at the current write position.
    ///
    /// # Panics
    ///
    /// Panics if the source range is out of bounds or the write would exceed
    /// the key's capacity.
    pub fn append(&mut self, src: &[u8], offset: usize, length: usize) {
        let end = self.len + length;
        assert!(
            end <= self.capacity(),
            "key append of {length} bytes at {} exceeds capacity {}",
            self.len,
            self.capacity()
        );
        self.bytes[self.len..end].copy_from_slice(&src[offset..offset + length]);
        self.len = end;
    }

    /// Copy out `length` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + length` exceeds the key's capacity.
    #[must_use]
    pub fn subdata(&self, offset: usize, length: usize) -> Vec<u8> {
        assert!(
            offset + length <= self.capacity(),
            "key read of {length} bytes at {offset} exceeds capacity {}",
            self.capacity()
        );
        self.bytes[offset..offset + length].to_vec()
    }

    /// The written portion of the key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Read the key back in `chunk_len` pieces across its written length.
    ///
    /// The final chunk is shorter when the length is not a multiple of
    /// `chunk_len`.
    pub fn chunks(&self, chunk_len: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
        let chunk_len = chunk_len.max(1);
        (0..self.len)
            .step_by(chunk_len)
            .map(move |offset| self.subdata(offset, chunk_len.min(self.len - offset)))
    }

    /// Readback self-check.
    ///
    /// Reads the key in [`VERIFY_CHUNK_LEN`] chunks and confirms the chunks
    /// reassemble into the stored bytes. Returns `false` (and logs) on mismatch.
    #[must_use]
    pub fn verify(&self) -> bool {
        let mut reassembled = Zeroizing::new(Vec::with_capacity(self.len));
        for (index, chunk) in self.chunks(VERIFY_CHUNK_LEN).enumerate() {
            debug!(offset = index * VERIFY_CHUNK_LEN, "Read back key chunk");
            reassembled.extend_from_slice(&chunk);
        }
        let consistent = reassembled.as_slice() == self.as_bytes();
        if !consistent {
            warn!(len = self.len, "Secret key readback does not match stored bytes");
        }
        consistent
    }
}

impl fmt::Debug for IdentityKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyMaterial")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Where the provisioned key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvenance {
    /// Freshly generated by the entropy hardware.
    Hardware,
    /// Entropy was unavailable; the fixed fallback key is in use.
    Fallback,
}

/// Provision the production secret key.
///
/// Starts from [`IdentityKeyMaterial::fallback`] and replaces it with
/// [`SECRET_KEY_LEN`] freshly generated bytes when the entropy source delivers
/// all of them. Any entropy failure leaves the fallback untouched.
pub fn provision_key<S: EntropySource>(
    rng: &mut SecureRandomSource<S>,
) -> (IdentityKeyMaterial, KeyProvenance) {
    let mut key = IdentityKeyMaterial::fallback();
    let mut buf = Zeroizing::new(vec![0u8; SECRET_KEY_LEN]);

    let provenance = match rng.fill(&mut buf) {
        Ok(_) => {
            key.clear();
            key.append(&buf, 0, SECRET_KEY_LEN);
            info!("Applied hardware generated data to secret key");
            KeyProvenance::Hardware
        }
        Err(e) => {
            warn!(
                error = %e,
                "Could not generate {SECRET_KEY_LEN} bytes of randomness for the secret key; \
                 falling back to fixed generic key (degraded security)"
            );
            KeyProvenance::Fallback
        }
    };

    if !key.verify() {
        warn!("Secret key failed readback verification");
    }

    (key, provenance)
}
