use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::LogChainError;
use crate::metrics::{Counter, MetricsRegistry};
use crate::normalizer::Normalizer;
use crate::stream::{Offsets, Record, StreamConsumer, StreamProducer};

/// Consume raw events, publish normalized logs under the original key
pub struct NormalizerWorker {
    name: String,
    normalizer: Normalizer,
    consumer: Box<dyn StreamConsumer>,
    producer: Arc<dyn StreamProducer>,
    produce_topic: String,
    poll_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    shutdown: watch::Receiver<bool>,
}

impl NormalizerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        normalizer: Normalizer,
        consumer: Box<dyn StreamConsumer>,
        producer: Arc<dyn StreamProducer>,
        produce_topic: String,
        poll_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            normalizer,
            consumer,
            producer,
            produce_topic,
            poll_timeout,
            metrics,
            shutdown,
        }
    }

    /// Poll until the shutdown flag is raised
    pub async fn run(mut self) -> Result<(), LogChainError> {
        info!("{} starting, publishing to {}", self.name, self.produce_topic);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let records = tokio::select! {
                polled = self.consumer.poll(self.poll_timeout) => polled?,
                changed = self.shutdown.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            self.process(&records).await?;
        }

        info!("{} stopped", self.name);
        Ok(())
    }

    async fn process(&mut self, records: &[Record]) -> Result<(), LogChainError> {
        let mut offsets = Offsets::new();

        for (i, record) in records.iter().enumerate() {
            let log = match self.normalizer.normalize_bytes(&record.value) {
                Ok(log) => log,
                Err(e) => {
                    warn!(
                        "{} dropping record {}/{}@{}: {}",
                        self.name, record.topic, record.partition, record.offset, e
                    );
                    self.metrics.incr(Counter::LogsRejected, 1);
                    offsets.track(record);
                    continue;
                }
            };

            let payload = serde_json::to_vec(&log)?;
            if let Err(e) = self
                .producer
                .send(&self.produce_topic, record.key.as_deref(), payload)
                .await
            {
                error!("{} failed to publish normalized log: {}", self.name, e);
                // Everything from here on is delivered again
                for pending in &records[i..] {
                    self.consumer.rewind(pending);
                }
                tokio::time::sleep(self.poll_timeout).await;
                break;
            }

            debug!("{} normalized {} from {}", self.name, log.hash, log.source);
            self.metrics.incr(Counter::LogsNormalized, 1);
            offsets.track(record);
        }

        if !offsets.is_empty() {
            self.consumer.commit(&offsets).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NormalizedLog;
    use crate::crypto::OsSaltSource;
    use crate::stream::MemoryBroker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    const RAW: &str = "logs.raw";
    const NORMALIZED: &str = "logs.normalized";

    fn worker(
        broker: &MemoryBroker,
        producer: Arc<dyn StreamProducer>,
        shutdown: watch::Receiver<bool>,
    ) -> (NormalizerWorker, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let worker = NormalizerWorker::new(
            "normalizer-0".to_string(),
            Normalizer::new("my-app", "prod", Arc::new(OsSaltSource)),
            Box::new(broker.subscribe("normalizer", RAW)),
            producer,
            NORMALIZED.to_string(),
            Duration::from_millis(5),
            metrics.clone(),
            shutdown,
        );
        (worker, metrics)
    }

    fn raw(message: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "message": message,
            "source": "booking-service",
            "timestamp": "2025-03-01T10:00:00Z"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_normalizes_keeps_key_and_commits() {
        let broker = MemoryBroker::new(1, 100);
        broker.append(RAW, Some("booking-service"), raw("a"));
        broker.append(RAW, Some("booking-service"), b"not json".to_vec());
        broker.append(RAW, Some("booking-service"), raw("b"));

        let (tx, rx) = watch::channel(false);
        let (worker, metrics) = worker(&broker, Arc::new(broker.clone()), rx);
        let handle = tokio::spawn(worker.run());

        for _ in 0..200 {
            if broker.committed("normalizer", RAW, 0) == Some(3) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let out = broker.records(NORMALIZED);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.key.as_deref() == Some("booking-service")));
        let first: NormalizedLog = serde_json::from_slice(&out[0].value).unwrap();
        assert_eq!(first.message, "a");
        assert!(first.verify_hash());

        assert_eq!(broker.committed("normalizer", RAW, 0), Some(3));
        assert_eq!(metrics.get(Counter::LogsNormalized), 2);
        assert_eq!(metrics.get(Counter::LogsRejected), 1);
    }

    struct FlakyProducer {
        inner: MemoryBroker,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl StreamProducer for FlakyProducer {
        async fn send(&self, topic: &str, key: Option<&str>, value: Vec<u8>) -> Result<(), LogChainError> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(LogChainError::StreamError("broker unavailable".to_string()));
                }
            }
            self.inner.send(topic, key, value).await
        }
    }

    #[tokio::test]
    async fn test_publish_failure_redelivers_record() {
        let broker = MemoryBroker::new(1, 100);
        broker.append(RAW, None, raw("a"));
        broker.append(RAW, None, raw("b"));

        let producer = Arc::new(FlakyProducer {
            inner: broker.clone(),
            failures_left: Mutex::new(1),
        });
        let (tx, rx) = watch::channel(false);
        let (worker, _) = worker(&broker, producer, rx);
        let handle = tokio::spawn(worker.run());

        for _ in 0..200 {
            if broker.topic_len(NORMALIZED) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let messages: Vec<String> = broker
            .records(NORMALIZED)
            .iter()
            .map(|r| serde_json::from_slice::<NormalizedLog>(&r.value).unwrap().message)
            .collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_without_traffic() {
        let broker = MemoryBroker::new(2, 100);
        let (tx, rx) = watch::channel(false);
        let (worker, _) = worker(&broker, Arc::new(broker.clone()), rx);
        let handle = tokio::spawn(worker.run());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
