//! Hashing primitives shared by the Normalizer, the Merkle engine and the Verifier.

pub mod hash;
pub mod salt;

pub use hash::{compute_hash, compute_log_hash, sha256_hex};
pub use salt::{OsSaltSource, SaltSource, SeededSaltSource, SALT_LEN};
