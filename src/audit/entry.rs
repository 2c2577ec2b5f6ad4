//! Audit Record Types
//!
//! Wire shapes exchanged between the workers and persisted in the index store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::compute_log_hash;
use crate::error::LogChainError;

/// Canonical, salted and fingerprinted form of one raw log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLog {
    pub level: String,
    /// ISO-8601 instant exactly as received
    pub timestamp: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: String,
    /// 32 random bytes, base64
    #[serde(default)]
    pub salt: String,
    /// base64 SHA-256 fingerprint
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub env: String,
}

impl NormalizedLog {
    /// Event time in milliseconds since the Unix epoch
    pub fn epoch_millis(&self) -> Result<i64, LogChainError> {
        parse_timestamp_millis(&self.timestamp)
    }

    /// Recompute the fingerprint from the record's own fields
    pub fn calculate_hash(&self) -> Result<String, LogChainError> {
        Ok(compute_log_hash(
            &self.source,
            self.epoch_millis()?,
            &self.message,
            &self.salt,
        ))
    }

    /// Leaf hash for Merkle commitment: the carried hash, or a recomputed one
    pub fn leaf_hash(&self) -> Result<String, LogChainError> {
        if self.hash.is_empty() {
            self.calculate_hash()
        } else {
            Ok(self.hash.clone())
        }
    }

    /// Check the carried hash against the record's fields
    pub fn verify_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.hash)
    }
}

/// A normalized log annotated with the evidence of its anchoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedLogRecord {
    pub log: NormalizedLog,
    pub batch_id: String,
    pub merkle_root: String,
    pub ledger_tx_id: String,
    pub anchored_at: DateTime<Utc>,
    /// Position of the log inside its batch
    #[serde(default)]
    pub leaf_index: u32,
}

/// Parse an ISO-8601 instant into epoch milliseconds
pub fn parse_timestamp_millis(value: &str) -> Result<i64, LogChainError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.timestamp_millis())
        .map_err(|e| LogChainError::ValidationError(format!("Invalid timestamp '{}': {}", value, e)))
}
