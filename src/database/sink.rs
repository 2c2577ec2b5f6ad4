//! Index sink workers
//!
//! Copy normalized logs and enriched records from their topics into the
//! index store, committing each record once it is written.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::audit::{EnrichedLogRecord, NormalizedLog};
use crate::database::IndexStore;
use crate::error::LogChainError;
use crate::metrics::{Counter, MetricsRegistry};
use crate::stream::{Offsets, Record, StreamConsumer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Normalized,
    Anchored,
}

pub struct IndexSinkWorker {
    name: String,
    kind: SinkKind,
    store: Arc<dyn IndexStore>,
    consumer: Box<dyn StreamConsumer>,
    poll_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    shutdown: watch::Receiver<bool>,
}

impl IndexSinkWorker {
    pub fn new(
        name: String,
        kind: SinkKind,
        store: Arc<dyn IndexStore>,
        consumer: Box<dyn StreamConsumer>,
        poll_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            kind,
            store,
            consumer,
            poll_timeout,
            metrics,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<(), LogChainError> {
        info!("{} starting ({:?})", self.name, self.kind);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let records = tokio::select! {
                polled = self.consumer.poll(self.poll_timeout) => polled?,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            self.write(&records).await?;
        }

        info!("{} stopped", self.name);
        Ok(())
    }

    async fn write(&mut self, records: &[Record]) -> Result<(), LogChainError> {
        let mut offsets = Offsets::new();

        for (i, record) in records.iter().enumerate() {
            match self.store_record(record).await {
                Ok(()) => {
                    self.metrics.incr(Counter::RecordsIndexed, 1);
                }
                Err(LogChainError::SerializationError(e)) | Err(LogChainError::ValidationError(e)) => {
                    warn!(
                        "{} skipping undecodable record {}/{}@{}: {}",
                        self.name, record.topic, record.partition, record.offset, e
                    );
                }
                Err(e) => {
                    error!("{} index write failed: {}", self.name, e);
                    for pending in &records[i..] {
                        self.consumer.rewind(pending);
                    }
                    tokio::time::sleep(self.poll_timeout).await;
                    break;
                }
            }
            offsets.track(record);
        }

        if !offsets.is_empty() {
            self.consumer.commit(&offsets).await?;
        }
        Ok(())
    }

    async fn store_record(&self, record: &Record) -> Result<(), LogChainError> {
        match self.kind {
            SinkKind::Normalized => {
                let log: NormalizedLog = serde_json::from_slice(&record.value)?;
                self.store.index_normalized(&log).await
            }
            SinkKind::Anchored => {
                let enriched: EnrichedLogRecord = serde_json::from_slice(&record.value)?;
                self.store.index_enriched(&enriched).await
            }
        }
    }
}
