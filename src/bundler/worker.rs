use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::EnrichedLogRecord;
use crate::bundler::batch::{Batch, DeadLetterBatch, SealedBatch};
use crate::bundler::BundlerSettings;
use crate::error::LogChainError;
use crate::ledger::{AnchorLedger, LedgerError};
use crate::metrics::{Counter, Latency, MetricsRegistry};
use crate::stream::{Record, StreamConsumer, StreamProducer};

/// Age of an event when its batch is processed; same-millisecond events count as 1 ms
fn freshness_millis(process_ts_millis: i64, event_ts_millis: i64) -> i64 {
    match process_ts_millis - event_ts_millis {
        0 => 1,
        age => age,
    }
}

struct AnchorFailure {
    attempts: u32,
    error: LedgerError,
}

/// One Bundler worker: `POLLING -> ACCUMULATING -> ANCHORING -> PUBLISHING_EVIDENCE -> COMMIT_OFFSETS`
pub struct BundlerWorker {
    name: String,
    ledger: AnchorLedger,
    consumer: Box<dyn StreamConsumer>,
    producer: Arc<dyn StreamProducer>,
    settings: BundlerSettings,
    metrics: Arc<MetricsRegistry>,
    shutdown: watch::Receiver<bool>,
    batch: Batch,
}

impl BundlerWorker {
    pub fn new(
        name: String,
        ledger: AnchorLedger,
        consumer: Box<dyn StreamConsumer>,
        producer: Arc<dyn StreamProducer>,
        settings: BundlerSettings,
        metrics: Arc<MetricsRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let batch = Batch::new(settings.batch_size);
        Self {
            name,
            ledger,
            consumer,
            producer,
            settings,
            metrics,
            shutdown,
            batch,
        }
    }

    /// Run until shutdown; returns an error when a batch can be neither
    /// anchored nor dead-lettered
    pub async fn run(mut self) -> Result<(), LogChainError> {
        info!(
            "{} starting, batch size {}, publishing to {}",
            self.name, self.settings.batch_size, self.settings.produce_topic
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let records = tokio::select! {
                polled = self.consumer.poll(self.settings.poll_timeout) => polled?,
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

            debug!("{} polled {} records", self.name, records.len());
            self.accumulate(&records).await?;
        }

        if !self.batch.is_empty() {
            info!(
                "{} stopping with {} unanchored logs; they stay uncommitted for redelivery",
                self.name,
                self.batch.len()
            );
        }
        info!("{} stopped", self.name);
        Ok(())
    }

    async fn accumulate(&mut self, records: &[Record]) -> Result<(), LogChainError> {
        for record in records {
            if let Err(e) = self.batch.push_record(record) {
                warn!(
                    "{} skipping malformed record {}/{}@{}: {}",
                    self.name, record.topic, record.partition, record.offset, e
                );
                self.metrics.incr(Counter::LogsRejected, 1);
                continue;
            }

            if self.batch.is_full() {
                self.anchor_batch().await?;
            }
        }
        Ok(())
    }

    async fn anchor_batch(&mut self) -> Result<(), LogChainError> {
        let process_ts_millis = Utc::now().timestamp_millis();
        let batch_id = self.settings.batch_id_strategy.generate(process_ts_millis);
        let sealed = self
            .batch
            .seal(batch_id, process_ts_millis, &self.settings.filters)?;
        info!(
            "{} anchoring batch {} of {} logs, root {}",
            self.name,
            sealed.batch_id,
            sealed.logs.len(),
            sealed.root
        );

        for entry in self.batch.entries() {
            self.metrics
                .record(Latency::Freshness, freshness_millis(process_ts_millis, entry.ts_millis));
        }

        let started = Instant::now();
        let outcome = self.anchor_with_retry(&sealed).await;
        let elapsed_ms = started.elapsed().as_millis().max(1) as i64;
        self.metrics.record(Latency::AnchorSubmit, elapsed_ms);

        match outcome {
            Ok(tx_id) => {
                self.publish_evidence(&sealed, &tx_id).await?;
                self.metrics.incr(Counter::BatchesAnchored, 1);
                self.metrics.incr(Counter::LogsAnchored, sealed.logs.len() as u64);
                self.metrics.log_percentiles(&self.name);
            }
            Err(failure) => self.handle_failure(&sealed, failure).await?,
        }

        self.consumer.commit(self.batch.offsets()).await?;
        self.batch.clear();
        Ok(())
    }

    async fn anchor_with_retry(&self, sealed: &SealedBatch) -> Result<String, AnchorFailure> {
        let request = sealed.put_anchor_request();
        let max_retries = self.settings.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.ledger.put_anchor(&request).await {
                Ok(tx_id) => {
                    info!(
                        "{} batch {} anchored in tx {} (attempt {})",
                        self.name, sealed.batch_id, tx_id, attempt
                    );
                    return Ok(tx_id);
                }
                Err(e) if e.is_transient() && attempt < max_retries => {
                    warn!(
                        "{} anchor attempt {}/{} for batch {} failed: {}",
                        self.name, attempt, max_retries, sealed.batch_id, e
                    );
                    self.metrics.incr(Counter::AnchorRetries, 1);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    return Err(AnchorFailure {
                        attempts: attempt,
                        error: e,
                    })
                }
            }
        }
    }

    async fn publish_evidence(&self, sealed: &SealedBatch, tx_id: &str) -> Result<(), LogChainError> {
        let anchored_at = Utc::now();
        for (leaf_index, log) in sealed.logs.iter().enumerate() {
            let enriched = EnrichedLogRecord {
                log: log.clone(),
                batch_id: sealed.batch_id.clone(),
                merkle_root: sealed.root.clone(),
                ledger_tx_id: tx_id.to_string(),
                anchored_at,
                leaf_index: leaf_index as u32,
            };
            let payload = serde_json::to_vec(&enriched)?;
            self.send_with_retry(&self.settings.produce_topic, &sealed.batch_id, payload)
                .await?;
        }
        debug!(
            "{} published {} enriched records for batch {}",
            self.name,
            sealed.logs.len(),
            sealed.batch_id
        );
        Ok(())
    }

    async fn handle_failure(&self, sealed: &SealedBatch, failure: AnchorFailure) -> Result<(), LogChainError> {
        let reason = if failure.error.is_transient() {
            format!(
                "Ledger unavailable after {} attempts: {}",
                failure.attempts, failure.error
            )
        } else {
            format!("Ledger rejected batch: {}", failure.error)
        };

        let Some(topic) = &self.settings.dead_letter_topic else {
            error!("{} giving up on batch {}: {}", self.name, sealed.batch_id, reason);
            self.metrics.incr(Counter::BatchesFailed, 1);
            return Err(if failure.error.is_transient() {
                LogChainError::LedgerUnavailable(reason)
            } else {
                failure.error.into()
            });
        };

        let dead_letter = DeadLetterBatch {
            batch_id: sealed.batch_id.clone(),
            root: sealed.root.clone(),
            count: sealed.logs.len(),
            attempts: failure.attempts,
            error: reason.clone(),
            failed_at: Utc::now(),
            logs: sealed.logs.clone(),
        };
        let payload = serde_json::to_vec(&dead_letter)?;
        self.send_with_retry(topic, &sealed.batch_id, payload).await?;

        warn!(
            "{} moved batch {} to {}: {}",
            self.name, sealed.batch_id, topic, reason
        );
        self.metrics.incr(Counter::BatchesDeadLettered, 1);
        Ok(())
    }

    async fn send_with_retry(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), LogChainError> {
        let max_retries = self.settings.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.producer.send(topic, Some(key), payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    warn!("{} publish to {} failed (attempt {}): {}", self.name, topic, attempt, e);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{compute_merkle_root, NormalizedLog};
    use crate::config::BatchIdStrategy;
    use crate::crypto::OsSaltSource;
    use crate::ledger::{ContractError, LedgerClient, LedgerDeadlines, LocalLedger, MemoryStateStore};
    use crate::normalizer::Normalizer;
    use crate::stream::MemoryBroker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    const IN: &str = "logs.normalized";
    const OUT: &str = "logs.anchored";
    const DLQ: &str = "logs.anchor.dlq";
    const GROUP: &str = "bundler";

    /// Fails the first `failures` submits, then delegates
    struct FlakyLedger {
        inner: LocalLedger,
        failures: Mutex<u32>,
        error: LedgerError,
        submits: Mutex<u32>,
    }

    impl FlakyLedger {
        fn new(failures: u32, error: LedgerError) -> Arc<Self> {
            Arc::new(Self {
                inner: LocalLedger::new(Arc::new(MemoryStateStore::new()), LedgerDeadlines::default()),
                failures: Mutex::new(failures),
                error,
                submits: Mutex::new(0),
            })
        }

        fn submits(&self) -> u32 {
            *self.submits.lock()
        }
    }

    #[async_trait]
    impl LedgerClient for FlakyLedger {
        async fn submit(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
            *self.submits.lock() += 1;
            {
                let mut left = self.failures.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(self.error.clone());
                }
            }
            self.inner.submit(function, args).await
        }

        async fn evaluate(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
            self.inner.evaluate(function, args).await
        }
    }

    fn settings(dead_letter: bool) -> BundlerSettings {
        BundlerSettings {
            produce_topic: OUT.to_string(),
            dead_letter_topic: dead_letter.then(|| DLQ.to_string()),
            batch_size: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            filters: vec!["PAYMENT".to_string()],
            batch_id_strategy: BatchIdStrategy::EpochUuid,
            poll_timeout: Duration::from_millis(5),
        }
    }

    fn publish_logs(broker: &MemoryBroker, messages: &[&str]) -> Vec<NormalizedLog> {
        let normalizer = Normalizer::new("my-app", "prod", Arc::new(OsSaltSource));
        messages
            .iter()
            .map(|message| {
                let log = normalizer
                    .normalize(&json!({
                        "message": message,
                        "source": "booking-service",
                        "timestamp": "2025-03-01T10:00:00Z"
                    }))
                    .unwrap();
                broker.append(IN, Some("booking-service"), serde_json::to_vec(&log).unwrap());
                log
            })
            .collect()
    }

    fn spawn_worker(
        broker: &MemoryBroker,
        client: Arc<dyn LedgerClient>,
        settings: BundlerSettings,
    ) -> (
        watch::Sender<bool>,
        tokio::task::JoinHandle<Result<(), LogChainError>>,
        Arc<MetricsRegistry>,
    ) {
        let (tx, rx) = watch::channel(false);
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let worker = BundlerWorker::new(
            "bundler-0".to_string(),
            AnchorLedger::new(client),
            Box::new(broker.subscribe(GROUP, IN)),
            Arc::new(broker.clone()),
            settings,
            metrics.clone(),
            rx,
        );
        (tx, tokio::spawn(worker.run()), metrics)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_same_millisecond_event_is_recorded() {
        assert_eq!(freshness_millis(1_000, 1_000), 1);
        assert_eq!(freshness_millis(1_250, 1_000), 250);

        let metrics = MetricsRegistry::new().unwrap();
        assert!(metrics.record(Latency::Freshness, freshness_millis(5, 5)));
        assert_eq!(metrics.percentiles(Latency::Freshness).dropped, 0);
    }

    #[tokio::test]
    async fn test_full_batch_anchored_published_and_committed() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(0, LedgerError::Submit("unused".into()));
        let logs = publish_logs(&broker, &["a", "PAYMENT captured", "c", "d", "e"]);

        let (tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(true));
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let enriched: Vec<EnrichedLogRecord> = broker
            .records(OUT)
            .iter()
            .map(|r| serde_json::from_slice(&r.value).unwrap())
            .collect();
        assert_eq!(enriched.len(), 5);

        let leaves: Vec<String> = logs.iter().map(|l| l.hash.clone()).collect();
        let root = compute_merkle_root(&leaves).unwrap();
        for (i, record) in enriched.iter().enumerate() {
            assert_eq!(record.leaf_index, i as u32);
            assert_eq!(record.log, logs[i]);
            assert_eq!(record.merkle_root, root);
            assert_eq!(record.batch_id, enriched[0].batch_id);
        }
        assert!(broker
            .records(OUT)
            .iter()
            .all(|r| r.key.as_deref() == Some(enriched[0].batch_id.as_str())));

        let ledger = AnchorLedger::new(client);
        let anchor = ledger.get_anchor(&enriched[0].batch_id).await.unwrap();
        assert_eq!(anchor.root, root);
        assert_eq!(anchor.count, 5);
        assert_eq!(anchor.tx_id, enriched[0].ledger_tx_id);
        let note: Vec<NormalizedLog> = serde_json::from_str(anchor.tx_note.as_deref().unwrap()).unwrap();
        assert_eq!(note, vec![logs[1].clone()]);

        assert_eq!(metrics.get(Counter::BatchesAnchored), 1);
        assert_eq!(metrics.get(Counter::LogsAnchored), 5);
        assert_eq!(metrics.percentiles(Latency::AnchorSubmit).count, 1);
    }

    #[tokio::test]
    async fn test_partial_batch_is_neither_anchored_nor_committed() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(0, LedgerError::Submit("unused".into()));
        publish_logs(&broker, &["a", "b", "c"]);

        let (tx, handle, _) = spawn_worker(&broker, client.clone(), settings(true));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submits(), 0);
        assert_eq!(broker.committed(GROUP, IN, 0), None);
        assert_eq!(broker.topic_len(OUT), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(2, LedgerError::Endorse("peer down".into()));
        publish_logs(&broker, &["a", "b", "c", "d", "e"]);

        let (tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(true));
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submits(), 3);
        assert_eq!(metrics.get(Counter::AnchorRetries), 2);
        assert_eq!(broker.topic_len(OUT), 5);
        assert_eq!(broker.topic_len(DLQ), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_lettered_and_committed() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(3, LedgerError::CommitStatus("MVCC_READ_CONFLICT".into()));
        let logs = publish_logs(&broker, &["a", "b", "c", "d", "e"]);

        let (tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(true));
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(5)).await;

        // the worker keeps running and anchors the next batch
        publish_logs(&broker, &["f", "g", "h", "i", "j"]);
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(10)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let dead: Vec<DeadLetterBatch> = broker
            .records(DLQ)
            .iter()
            .map(|r| serde_json::from_slice(&r.value).unwrap())
            .collect();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].count, 5);
        assert_eq!(dead[0].logs, logs);
        assert!(dead[0].error.contains("after 3 attempts"));

        assert_eq!(metrics.get(Counter::BatchesDeadLettered), 1);
        assert_eq!(broker.topic_len(OUT), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_without_dead_letter_stop_the_worker() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(10, LedgerError::Submit("orderer down".into()));
        publish_logs(&broker, &["a", "b", "c", "d", "e"]);

        let (_tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(false));
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(LogChainError::LedgerUnavailable(_))));
        assert_eq!(client.submits(), 3);
        assert_eq!(metrics.get(Counter::BatchesFailed), 1);
        assert_eq!(broker.committed(GROUP, IN, 0), None);
    }

    #[tokio::test]
    async fn test_permanent_rejection_skips_retries() {
        let broker = MemoryBroker::new(1, 100);
        let rejection = LedgerError::Contract(ContractError {
            code: Some("ALREADY_EXISTS".to_string()),
            message: "Anchor already exists".to_string(),
            subject: "dup".to_string(),
        });
        let client = FlakyLedger::new(1, rejection);
        publish_logs(&broker, &["a", "b", "c", "d", "e"]);

        let (tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(true));
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(client.submits(), 1);
        assert_eq!(metrics.get(Counter::AnchorRetries), 0);
        let dead: DeadLetterBatch = serde_json::from_slice(&broker.records(DLQ)[0].value).unwrap();
        assert_eq!(dead.attempts, 1);
        assert!(dead.error.contains("rejected"));
    }

    #[tokio::test]
    async fn test_malformed_record_skipped_and_committed_with_batch() {
        let broker = MemoryBroker::new(1, 100);
        let client = FlakyLedger::new(0, LedgerError::Submit("unused".into()));
        publish_logs(&broker, &["a", "b"]);
        broker.append(IN, None, b"garbage".to_vec());
        publish_logs(&broker, &["c", "d", "e"]);

        let (tx, handle, metrics) = spawn_worker(&broker, client.clone(), settings(true));
        wait_for(|| broker.committed(GROUP, IN, 0) == Some(6)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(metrics.get(Counter::LogsRejected), 1);
        assert_eq!(broker.topic_len(OUT), 5);
    }
}
