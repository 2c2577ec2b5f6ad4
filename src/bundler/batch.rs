//! Count-closed batches and the material anchored for them

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::audit::{compute_merkle_root, NormalizedLog};
use crate::config::BatchIdStrategy;
use crate::error::LogChainError;
use crate::ledger::PutAnchorRequest;
use crate::stream::{Offsets, Record};

const BATCH_ID_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

impl BatchIdStrategy {
    /// New batch id for a batch sealed at `now_millis`
    pub fn generate(self, now_millis: i64) -> String {
        match self {
            BatchIdStrategy::EpochRandom => {
                let mut rng = rand::thread_rng();
                let suffix: String = (0..3)
                    .map(|_| BATCH_ID_LETTERS[rng.gen_range(0..BATCH_ID_LETTERS.len())] as char)
                    .collect();
                format!("{}-{}", now_millis, suffix)
            }
            BatchIdStrategy::EpochUuid => format!("{}-{}", now_millis, uuid::Uuid::new_v4()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub log: NormalizedLog,
    pub leaf_hash: String,
    pub ts_millis: i64,
}

/// Logs accumulated by one worker, in arrival order
#[derive(Debug)]
pub struct Batch {
    target: usize,
    entries: Vec<BatchEntry>,
    offsets: Offsets,
}

impl Batch {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            entries: Vec::with_capacity(target),
            offsets: Offsets::new(),
        }
    }

    /// Decode one normalized record and append it.
    ///
    /// The record's offset is tracked even when it is rejected, so a
    /// malformed record is committed together with the batch it arrived in.
    pub fn push_record(&mut self, record: &Record) -> Result<(), LogChainError> {
        self.offsets.track(record);
        let log: NormalizedLog = serde_json::from_slice(&record.value)?;
        self.push(log)
    }

    pub fn push(&mut self, log: NormalizedLog) -> Result<(), LogChainError> {
        let ts_millis = log.epoch_millis()?;
        let leaf_hash = log.leaf_hash()?;
        self.entries.push(BatchEntry {
            log,
            leaf_hash,
            ts_millis,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.target
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    /// Close the batch: compute the root, time bounds and note
    pub fn seal(
        &self,
        batch_id: String,
        process_ts_millis: i64,
        filters: &[String],
    ) -> Result<SealedBatch, LogChainError> {
        let leaves: Vec<String> = self.entries.iter().map(|e| e.leaf_hash.clone()).collect();
        let root = compute_merkle_root(&leaves)?;

        let start_ts_millis = self.entries.iter().map(|e| e.ts_millis).min().unwrap_or(0);
        let end_ts_millis = self.entries.iter().map(|e| e.ts_millis).max().unwrap_or(0);
        let logs: Vec<NormalizedLog> = self.entries.iter().map(|e| e.log.clone()).collect();

        Ok(SealedBatch {
            note: anchor_note(&logs, filters)?,
            batch_id,
            root,
            leaves,
            start_ts_millis,
            end_ts_millis,
            process_ts_millis,
            logs,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.offsets.clear();
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }
}

/// Everything needed to anchor a closed batch and publish its evidence
#[derive(Debug, Clone)]
pub struct SealedBatch {
    pub batch_id: String,
    pub root: String,
    pub leaves: Vec<String>,
    pub start_ts_millis: i64,
    pub end_ts_millis: i64,
    pub process_ts_millis: i64,
    pub note: Option<String>,
    pub logs: Vec<NormalizedLog>,
}

impl SealedBatch {
    pub fn put_anchor_request(&self) -> PutAnchorRequest {
        PutAnchorRequest {
            batch_id: self.batch_id.clone(),
            root: self.root.clone(),
            count: self.logs.len() as i64,
            start_ts_millis: self.start_ts_millis,
            end_ts_millis: self.end_ts_millis,
            process_ts_millis: self.process_ts_millis,
            prev_root: None,
            tx_note: self.note.clone(),
        }
    }
}

/// JSON array of logs whose message contains any filter substring.
///
/// A log matching several filters appears once; no matches means no note.
pub fn anchor_note(logs: &[NormalizedLog], filters: &[String]) -> Result<Option<String>, LogChainError> {
    if filters.is_empty() {
        return Ok(None);
    }

    let matching: Vec<&NormalizedLog> = logs
        .iter()
        .filter(|log| filters.iter().any(|f| log.message.contains(f.as_str())))
        .collect();

    if matching.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&matching)?))
}

/// Batch that could not be anchored, parked for replay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterBatch {
    pub batch_id: String,
    pub root: String,
    pub count: usize,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub logs: Vec<NormalizedLog>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::compute_merkle_root;
    use crate::crypto::compute_log_hash;

    fn log(message: &str, timestamp: &str) -> NormalizedLog {
        let mut log = NormalizedLog {
            level: "INFO".to_string(),
            timestamp: timestamp.to_string(),
            message: message.to_string(),
            source: "booking-service".to_string(),
            salt: format!("salt-{}", message),
            hash: String::new(),
            app: "my-app".to_string(),
            env: "prod".to_string(),
        };
        log.hash = log.calculate_hash().unwrap();
        log
    }

    #[test]
    fn test_batch_id_formats() {
        let random = BatchIdStrategy::EpochRandom.generate(1_700_000_000_000);
        let (millis, suffix) = random.split_once('-').unwrap();
        assert_eq!(millis, "1700000000000");
        assert_eq!(suffix.len(), 3);
        assert!(suffix.chars().all(|c| c.is_ascii_alphabetic()));

        let uuid = BatchIdStrategy::EpochUuid.generate(42);
        let (millis, suffix) = uuid.split_once('-').unwrap();
        assert_eq!(millis, "42");
        assert!(uuid::Uuid::parse_str(suffix).is_ok());
        assert_ne!(uuid, BatchIdStrategy::EpochUuid.generate(42));
    }

    #[test]
    fn test_batch_closes_by_count() {
        let mut batch = Batch::new(3);
        batch.push(log("a", "2025-03-01T10:00:00Z")).unwrap();
        batch.push(log("b", "2025-03-01T10:00:01Z")).unwrap();
        assert!(!batch.is_full());
        batch.push(log("c", "2025-03-01T10:00:02Z")).unwrap();
        assert!(batch.is_full());
        assert_eq!(batch.len(), 3);

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.offsets().is_empty());
    }

    #[test]
    fn test_seal_bounds_root_and_arrival_order() {
        let mut batch = Batch::new(3);
        let logs = vec![
            log("late", "2025-03-01T10:00:05Z"),
            log("early", "2025-03-01T10:00:01Z"),
            log("middle", "2025-03-01T10:00:03Z"),
        ];
        for l in &logs {
            batch.push(l.clone()).unwrap();
        }

        let sealed = batch.seal("b-1".to_string(), 99, &[]).unwrap();
        let leaves: Vec<String> = logs.iter().map(|l| l.hash.clone()).collect();
        assert_eq!(sealed.leaves, leaves);
        assert_eq!(sealed.root, compute_merkle_root(&leaves).unwrap());
        assert_eq!(sealed.start_ts_millis, logs[1].epoch_millis().unwrap());
        assert_eq!(sealed.end_ts_millis, logs[0].epoch_millis().unwrap());
        assert_eq!(sealed.note, None);

        let request = sealed.put_anchor_request();
        assert_eq!(request.count, 3);
        assert_eq!(request.process_ts_millis, 99);
        assert_eq!(request.prev_root, None);
    }

    #[test]
    fn test_missing_hash_recomputed_by_rule() {
        let mut stripped = log("x", "2025-03-01T10:00:00Z");
        stripped.hash = String::new();

        let mut batch = Batch::new(1);
        batch.push(stripped.clone()).unwrap();
        let expected = compute_log_hash(
            &stripped.source,
            stripped.epoch_millis().unwrap(),
            &stripped.message,
            &stripped.salt,
        );
        assert_eq!(batch.entries()[0].leaf_hash, expected);
    }

    #[test]
    fn test_malformed_record_tracked_but_rejected() {
        let mut batch = Batch::new(2);
        let record = Record {
            topic: "logs.normalized".to_string(),
            partition: 0,
            offset: 7,
            key: None,
            value: b"{\"level\":1}".to_vec(),
        };
        assert!(batch.push_record(&record).is_err());
        assert!(batch.is_empty());
        assert!(!batch.offsets().is_empty());
    }

    #[test]
    fn test_note_lists_each_matching_log_once() {
        let logs = vec![
            log("BOOKING-CREATE PAYMENT ok", "2025-03-01T10:00:00Z"),
            log("health check", "2025-03-01T10:00:00Z"),
            log("PAYMENT refund", "2025-03-01T10:00:00Z"),
        ];
        let filters = vec!["BOOKING".to_string(), "PAYMENT".to_string()];

        let note = anchor_note(&logs, &filters).unwrap().unwrap();
        let parsed: Vec<NormalizedLog> = serde_json::from_str(&note).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], logs[0]);
        assert_eq!(parsed[1], logs[2]);

        assert_eq!(anchor_note(&logs[1..2], &filters).unwrap(), None);
        assert_eq!(anchor_note(&logs, &[]).unwrap(), None);
    }
}
