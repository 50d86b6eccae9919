//! Hardware-backed secure randomness.
//!
//! [`EntropySource`] is the driver boundary: an `init` call and a blocking `get`
//! that reports how many bytes were written. [`SecureRandomSource`] wraps a
//! driver and turns its status codes into the three distinct failure modes the
//! rest of the firmware reacts to. None of them are fatal; callers fall back to
//! a degraded key instead.

use thiserror::Error;
use tracing::{debug, warn};

/// Size of the boot-time entropy self-test.
pub const SELF_TEST_LEN: usize = 16;

/// Raw driver interface to an entropy generator.
///
/// Status codes are driver specific and only ever logged.
pub trait EntropySource: Send {
    /// Bring up the generator.
    ///
    /// # Errors
    ///
    /// Returns the driver status code if the hardware module is unavailable.
    fn init(&mut self) -> Result<(), i32>;

    /// Fill `buf`, blocking until entropy is available.
    ///
    /// Returns the number of bytes actually written, which may be less than
    /// `buf.len()`.
    ///
    /// # Errors
    ///
    /// Returns the driver status code if generation fails.
    fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32>;
}

/// Why a request for secure random bytes could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntropyError {
    /// The entropy hardware could not be initialised.
    #[error("entropy hardware initialisation failed (status {status})")]
    InitFailed {
        /// Driver status code.
        status: i32,
    },

    /// Initialisation succeeded but generating bytes failed.
    #[error("secure random generation failed (status {status})")]
    GenerateFailed {
        /// Driver status code.
        status: i32,
    },

    /// The generator returned fewer bytes than requested.
    #[error("short entropy read: requested {requested} bytes, got {written}")]
    ShortRead {
        /// Bytes requested.
        requested: usize,
        /// Bytes actually written.
        written: usize,
    },
}

/// Result alias for entropy operations.
pub type EntropyResult<T> = std::result::Result<T, EntropyError>;

/// Secure random byte source over an [`EntropySource`] driver.
pub struct SecureRandomSource<S> {
    driver: S,
    initialised: bool,
}

impl<S: EntropySource> SecureRandomSource<S> {
    /// Wrap a driver. Initialisation is deferred to the first [`fill`](Self::fill).
    pub const fn new(driver: S) -> Self {
        Self {
            driver,
            initialised: false,
        }
    }

    /// Fill `buf` completely with secure random bytes.
    ///
    /// Blocks the calling thread until the driver returns. On success the whole
    /// buffer has been written and its length is returned.
    ///
    /// # Errors
    ///
    /// Returns one of the three [`EntropyError`] variants. A failed
    /// initialisation is retried on the next call.
    pub fn fill(&mut self, buf: &mut [u8]) -> EntropyResult<usize> {
        if !self.initialised {
            if let Err(status) = self.driver.init() {
                warn!(status, "Could not initialise entropy hardware");
                return Err(EntropyError::InitFailed { status });
            }
            self.initialised = true;
        }

        let requested = buf.len();
        let written = match self.driver.get(buf) {
            Ok(written) => written,
            Err(status) => {
                warn!(status, "Secure RNG failed");
                return Err(EntropyError::GenerateFailed { status });
            }
        };

        if written != requested {
            warn!(requested, written, "Didn't generate enough randomness for output");
            return Err(EntropyError::ShortRead { requested, written });
        }

        Ok(written)
    }

    /// Release the wrapped driver.
    pub fn into_inner(self) -> S {
        self.driver
    }

    /// Generate a small sample and report whether the generator works.
    ///
    /// # Errors
    ///
    /// Propagates the [`fill`](Self::fill) failure.
    pub fn self_test(&mut self) -> EntropyResult<()> {
        let mut sample = [0u8; SELF_TEST_LEN];
        self.fill(&mut sample)?;
        debug!("Entropy hardware initialised and tested");
        Ok(())
    }
}

/// Entropy driver backed by the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn init(&mut self) -> Result<(), i32> {
        Ok(())
    }

    fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
        getrandom::getrandom(buf).map_err(|e| e.raw_os_error().unwrap_or(-1))?;
        Ok(buf.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::EntropySource;

    /// Scripted driver used across the crate's tests.
    #[derive(Debug, Clone, Copy)]
    pub enum FakeEntropy {
        /// Every byte is this value.
        Fixed(u8),
        /// `init` fails with the given status.
        InitFails(i32),
        /// `get` fails with the given status.
        GetFails(i32),
        /// Only this many bytes are written.
        Short(usize),
    }

    impl EntropySource for FakeEntropy {
        fn init(&mut self) -> Result<(), i32> {
            match *self {
                Self::InitFails(status) => Err(status),
                _ => Ok(()),
            }
        }

        fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
            match *self {
                Self::Fixed(byte) => {
                    buf.fill(byte);
                    Ok(buf.len())
                }
                Self::GetFails(status) => Err(status),
                Self::Short(n) => {
                    let n = n.min(buf.len());
                    buf[..n].fill(0xAB);
                    Ok(n)
                }
                Self::InitFails(_) => unreachable!("get called after failed init"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeEntropy;
    use super::*;

    #[test]
    fn test_fill_success() {
        let mut rng = SecureRandomSource::new(FakeEntropy::Fixed(7));
        let mut buf = [0u8; 32];
        assert_eq!(rng.fill(&mut buf), Ok(32));
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_init_failure_is_distinct() {
        let mut rng = SecureRandomSource::new(FakeEntropy::InitFails(-5));
        let mut buf = [0u8; 8];
        assert_eq!(rng.fill(&mut buf), Err(EntropyError::InitFailed { status: -5 }));
    }

    #[test]
    fn test_generate_failure_is_distinct() {
        let mut rng = SecureRandomSource::new(FakeEntropy::GetFails(-12));
        let mut buf = [0u8; 8];
        assert_eq!(
            rng.fill(&mut buf),
            Err(EntropyError::GenerateFailed { status: -12 })
        );
    }

    #[test]
    fn test_short_read_is_distinct() {
        let mut rng = SecureRandomSource::new(FakeEntropy::Short(3));
        let mut buf = [0u8; 8];
        assert_eq!(
            rng.fill(&mut buf),
            Err(EntropyError::ShortRead {
                requested: 8,
                written: 3
            })
        );
    }

    /// `init` fails a set number of times, then succeeds.
    struct FlakyInit {
        failures_left: usize,
        init_calls: usize,
    }

    impl EntropySource for FlakyInit {
        fn init(&mut self) -> Result<(), i32> {
            self.init_calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(-110);
            }
            Ok(())
        }

        fn get(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
            buf.fill(0x42);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_failed_init_is_retried_and_success_remembered() {
        let mut rng = SecureRandomSource::new(FlakyInit {
            failures_left: 1,
            init_calls: 0,
        });
        let mut buf = [0u8; 16];

        assert_eq!(rng.fill(&mut buf), Err(EntropyError::InitFailed { status: -110 }));
        assert_eq!(rng.fill(&mut buf), Ok(16));
        assert_eq!(rng.fill(&mut buf), Ok(16));

        assert_eq!(rng.into_inner().init_calls, 2);
    }

    #[test]
    fn test_init_is_deferred_to_first_fill() {
        let rng = SecureRandomSource::new(FlakyInit {
            failures_left: 0,
            init_calls: 0,
        });
        assert_eq!(rng.into_inner().init_calls, 0);
    }

    #[test]
    fn test_self_test_uses_fill() {
        assert!(SecureRandomSource::new(FakeEntropy::Fixed(1))
            .self_test()
            .is_ok());
        assert!(SecureRandomSource::new(FakeEntropy::GetFails(-1))
            .self_test()
            .is_err());
    }

    #[test]
    fn test_os_entropy_fills_buffer() {
        let mut rng = SecureRandomSource::new(OsEntropy);
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        assert_eq!(rng.fill(&mut a), Ok(64));
        assert_eq!(rng.fill(&mut b), Ok(64));
        assert_ne!(a, b);
    }
}
