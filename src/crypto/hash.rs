//! SHA-256 helpers.
//!
//! Every fingerprint in the system is the standard base64 encoding of a
//! SHA-256 digest over UTF-8 text. Leaf hashes and Merkle nodes are hashed the
//! same way so the anchor-time and verify-time computations agree bit-for-bit.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

/// Hash UTF-8 text and return the base64 digest
pub fn compute_hash(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Fingerprint of one normalized log.
///
/// `SHA256(source | epoch_millis | message | salt)` with `|` as the literal separator.
pub fn compute_log_hash(source: &str, epoch_millis: i64, message: &str, salt: &str) -> String {
    compute_hash(&format!("{}|{}|{}|{}", source, epoch_millis, message, salt))
}

/// Hex SHA-256 of raw bytes, used for ledger transaction ids and partitioning
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_is_base64_sha256() {
        // SHA-256("abc") = ba7816bf...
        assert_eq!(
            compute_hash("abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
        assert_eq!(compute_hash("abc").len(), 44);
    }

    #[test]
    fn test_log_hash_uses_pipe_separated_fields() {
        let expected = compute_hash("api|1700000000000|hello|c2FsdA==");
        assert_eq!(
            compute_log_hash("api", 1_700_000_000_000, "hello", "c2FsdA=="),
            expected
        );
    }

    #[test]
    fn test_log_hash_changes_with_salt() {
        let a = compute_log_hash("api", 1, "m", "salt-a");
        let b = compute_log_hash("api", 1, "m", "salt-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
