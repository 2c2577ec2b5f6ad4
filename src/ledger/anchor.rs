//! Anchor record stored on the ledger

use serde::{Deserialize, Serialize};

/// Durable commitment binding a batch id to its Merkle root and time bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub tx_id: String,
    pub batch_id: String,
    pub root: String,
    pub count: i64,
    pub start_ts_millis: i64,
    pub end_ts_millis: i64,
    pub prev_root: Option<String>,
    /// Server time when the batch was processed
    pub anchor_ts_millis: i64,
    pub tx_note: Option<String>,
}

/// Arguments of the `PutAnchor` transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAnchorRequest {
    pub batch_id: String,
    pub root: String,
    pub count: i64,
    pub start_ts_millis: i64,
    pub end_ts_millis: i64,
    pub process_ts_millis: i64,
    pub prev_root: Option<String>,
    pub tx_note: Option<String>,
}

impl PutAnchorRequest {
    /// Positional string arguments in contract order
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.batch_id.clone(),
            self.root.clone(),
            self.count.to_string(),
            self.start_ts_millis.to_string(),
            self.end_ts_millis.to_string(),
            self.process_ts_millis.to_string(),
            self.prev_root.clone().unwrap_or_default(),
            self.tx_note.clone().unwrap_or_default(),
        ]
    }
}
