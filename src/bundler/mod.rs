//! Bundler
//!
//! Accumulates normalized logs into count-closed batches, commits each batch
//! to a Merkle root, anchors the root on the ledger with bounded retries and
//! publishes one enriched record per log. Consumer offsets are committed only
//! after both the anchor and the evidence are durable.

pub mod batch;
pub mod worker;

use std::time::Duration;

use crate::config::{BatchIdStrategy, BundlerConfig};

pub use batch::{anchor_note, Batch, DeadLetterBatch, SealedBatch};
pub use worker::BundlerWorker;

/// Per-worker settings derived from [`BundlerConfig`]
#[derive(Debug, Clone)]
pub struct BundlerSettings {
    pub produce_topic: String,
    pub dead_letter_topic: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub filters: Vec<String>,
    pub batch_id_strategy: BatchIdStrategy,
    pub poll_timeout: Duration,
}

impl BundlerSettings {
    pub fn from_config(config: &BundlerConfig, poll_timeout: Duration) -> Self {
        Self {
            produce_topic: config.produce_topic.clone(),
            dead_letter_topic: config.dead_letter_topic.clone(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            filters: config.filters.clone(),
            batch_id_strategy: config.batch_id_strategy,
            poll_timeout,
        }
    }
}
