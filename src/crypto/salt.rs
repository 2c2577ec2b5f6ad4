//! Salt sources.
//!
//! Salts are injected rather than drawn from a global generator so tests can
//! use a seeded source and assert exact hashes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Source of per-record salts
pub trait SaltSource: Send + Sync {
    /// Fresh salt bytes; never reused between calls
    fn next_salt(&self) -> [u8; SALT_LEN];

    /// Fresh salt, base64 encoded
    fn next_salt_b64(&self) -> String {
        STANDARD.encode(self.next_salt())
    }
}

/// Cryptographically secure salts from the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSaltSource;

impl SaltSource for OsSaltSource {
    fn next_salt(&self) -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }
}

/// Deterministic salts for tests and replay tooling
pub struct SeededSaltSource {
    rng: Mutex<StdRng>,
}

impl SeededSaltSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SaltSource for SeededSaltSource {
    fn next_salt(&self) -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        self.rng.lock().fill_bytes(&mut salt);
        salt
    }
}
