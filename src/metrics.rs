//! Pipeline metrics
//!
//! One registry is shared by every worker so percentiles describe the whole
//! fleet. Latency histograms track 1 ms to 1 h with three significant
//! digits; values outside that range are dropped and counted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::LogChainError;

pub const HISTOGRAM_LOWEST_MS: u64 = 1;
pub const HISTOGRAM_HIGHEST_MS: u64 = 3_600_000;
const SIGNIFICANT_DIGITS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    LogsNormalized,
    LogsRejected,
    BatchesAnchored,
    LogsAnchored,
    AnchorRetries,
    BatchesDeadLettered,
    BatchesFailed,
    RecordsIndexed,
    LogsIngested,
}

impl Counter {
    const ALL: [Counter; 9] = [
        Counter::LogsNormalized,
        Counter::LogsRejected,
        Counter::BatchesAnchored,
        Counter::LogsAnchored,
        Counter::AnchorRetries,
        Counter::BatchesDeadLettered,
        Counter::BatchesFailed,
        Counter::RecordsIndexed,
        Counter::LogsIngested,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::LogsNormalized => "logs_normalized",
            Counter::LogsRejected => "logs_rejected",
            Counter::BatchesAnchored => "batches_anchored",
            Counter::LogsAnchored => "logs_anchored",
            Counter::AnchorRetries => "anchor_retries",
            Counter::BatchesDeadLettered => "batches_dead_lettered",
            Counter::BatchesFailed => "batches_failed",
            Counter::RecordsIndexed => "records_indexed",
            Counter::LogsIngested => "logs_ingested",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    /// Anchor time minus original event time, per log
    Freshness,
    /// Duration of the whole PutAnchor submission including retries
    AnchorSubmit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PercentileSnapshot {
    pub count: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub freshness_ms: PercentileSnapshot,
    pub anchor_submit_ms: PercentileSnapshot,
}

struct TrackedHistogram {
    histogram: Histogram<u64>,
    dropped: u64,
}

impl TrackedHistogram {
    fn new() -> Result<Self, LogChainError> {
        let histogram =
            Histogram::new_with_bounds(HISTOGRAM_LOWEST_MS, HISTOGRAM_HIGHEST_MS, SIGNIFICANT_DIGITS)
                .map_err(|e| LogChainError::ConfigError(format!("Invalid histogram bounds: {:?}", e)))?;
        Ok(Self { histogram, dropped: 0 })
    }

    fn reset(&mut self) {
        self.histogram.reset();
        self.dropped = 0;
    }

    fn snapshot(&self) -> PercentileSnapshot {
        let h = &self.histogram;
        PercentileSnapshot {
            count: h.len(),
            p50: h.value_at_quantile(0.50),
            p95: h.value_at_quantile(0.95),
            p99: h.value_at_quantile(0.99),
            max: h.max(),
            dropped: self.dropped,
        }
    }
}

pub struct MetricsRegistry {
    counters: [AtomicU64; 9],
    freshness: Mutex<TrackedHistogram>,
    anchor_submit: Mutex<TrackedHistogram>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, LogChainError> {
        Ok(Self {
            counters: Default::default(),
            freshness: Mutex::new(TrackedHistogram::new()?),
            anchor_submit: Mutex::new(TrackedHistogram::new()?),
        })
    }

    pub fn incr(&self, counter: Counter, by: u64) {
        self.counters[counter.index()].fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Record a millisecond value; returns false when it falls outside 1 ms..1 h
    pub fn record(&self, latency: Latency, value_ms: i64) -> bool {
        let mut tracked = self.histogram(latency).lock();
        let in_range = value_ms >= HISTOGRAM_LOWEST_MS as i64 && value_ms <= HISTOGRAM_HIGHEST_MS as i64;
        if !in_range || tracked.histogram.record(value_ms as u64).is_err() {
            tracked.dropped += 1;
            warn!("{:?} value {} ms outside histogram range, dropped", latency, value_ms);
            return false;
        }
        true
    }

    pub fn percentiles(&self, latency: Latency) -> PercentileSnapshot {
        self.histogram(latency).lock().snapshot()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|c| (c.name(), self.get(*c)))
                .collect(),
            freshness_ms: self.percentiles(Latency::Freshness),
            anchor_submit_ms: self.percentiles(Latency::AnchorSubmit),
        }
    }

    /// Clear histograms and counters
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.freshness.lock().reset();
        self.anchor_submit.lock().reset();
        info!("Metrics reset");
    }

    /// Log fleet-wide percentiles, called after each anchored batch
    pub fn log_percentiles(&self, worker: &str) {
        let freshness = self.percentiles(Latency::Freshness);
        let submit = self.percentiles(Latency::AnchorSubmit);
        info!(
            "{} freshness p50={}ms p95={}ms p99={}ms (n={}) | anchor submit p50={}ms p95={}ms p99={}ms",
            worker,
            freshness.p50,
            freshness.p95,
            freshness.p99,
            freshness.count,
            submit.p50,
            submit.p95,
            submit.p99
        );
    }

    fn histogram(&self, latency: Latency) -> &Mutex<TrackedHistogram> {
        match latency {
            Latency::Freshness => &self.freshness,
            Latency::AnchorSubmit => &self.anchor_submit,
        }
    }
}
