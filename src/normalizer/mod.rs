//! Normalizer
//!
//! Turns one raw event into one [`NormalizedLog`] carrying a fresh 32-byte
//! salt and the salted fingerprint
//! `SHA256(source | epochMillis | message | salt)`.

pub mod worker;

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::audit::{parse_timestamp_millis, NormalizedLog};
use crate::crypto::{compute_log_hash, SaltSource};
use crate::error::LogChainError;

pub use worker::NormalizerWorker;

/// Timestamp keys, in lookup order
pub const TIMESTAMP_KEYS: [&str; 2] = ["@timestamp", "timestamp"];

pub const DEFAULT_LEVEL: &str = "INFO";
pub const DEFAULT_SOURCE: &str = "unknown";

#[derive(Clone)]
pub struct Normalizer {
    app: String,
    env: String,
    salts: Arc<dyn SaltSource>,
}

impl Normalizer {
    pub fn new(app: impl Into<String>, env: impl Into<String>, salts: Arc<dyn SaltSource>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            salts,
        }
    }

    /// Parse raw bytes and normalize them
    pub fn normalize_bytes(&self, raw: &[u8]) -> Result<NormalizedLog, LogChainError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| LogChainError::ValidationError(format!("Raw record is not JSON: {}", e)))?;
        self.normalize(&value)
    }

    pub fn normalize(&self, raw: &Value) -> Result<NormalizedLog, LogChainError> {
        if !raw.is_object() {
            return Err(LogChainError::ValidationError(
                "Raw record must be a JSON object".to_string(),
            ));
        }

        let level = text_field(raw, "level")
            .map(|l| l.to_uppercase())
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
        let message = text_field(raw, "message").unwrap_or_default();
        let source = text_field(raw, "source").unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        if raw.get(TIMESTAMP_KEYS[0]).is_none() {
            warn!("Record missing {}, trying {}", TIMESTAMP_KEYS[0], TIMESTAMP_KEYS[1]);
        }
        // the first key present wins, even when its value is null
        let key = TIMESTAMP_KEYS
            .iter()
            .find(|key| raw.get(**key).is_some())
            .ok_or_else(|| LogChainError::ValidationError("Record has no timestamp".to_string()))?;
        let timestamp = text_field(raw, key)
            .ok_or_else(|| LogChainError::ValidationError(format!("Record {} is null", key)))?;
        let epoch_millis = parse_timestamp_millis(&timestamp)?;

        let salt = self.salts.next_salt_b64();
        let hash = compute_log_hash(&source, epoch_millis, &message, &salt);

        Ok(NormalizedLog {
            level,
            timestamp,
            message,
            source,
            salt,
            hash,
            app: self.app.clone(),
            env: self.env.clone(),
        })
    }
}

/// Text of a field; null counts as absent and other scalars use their JSON text
fn text_field(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
