//! Built-in sample event source
//!
//! Emits booking-service style log lines onto the raw topic so a fresh
//! deployment has traffic flowing through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::LogChainError;
use crate::stream::StreamProducer;

/// One raw event as an application logger would emit it
pub fn sample_event(source: &str, sequence: u64) -> Value {
    json!({
        "@timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": "info",
        "message": format!("SMART-CONTRACT-BOOKING-CREATE - Log written: {}", sequence),
        "source": source,
    })
}

pub struct SampleProducer {
    producer: Arc<dyn StreamProducer>,
    topic: String,
    source: String,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SampleProducer {
    pub fn new(
        producer: Arc<dyn StreamProducer>,
        topic: String,
        source: String,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            producer,
            topic,
            source,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<(), LogChainError> {
        info!("Sample producer writing to {} every {:?}", self.topic, self.interval);
        let mut interval = tokio::time::interval(self.interval);
        let mut sequence = 0u64;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            sequence += 1;
            let event = sample_event(&self.source, sequence);
            match self
                .producer
                .send(&self.topic, Some(&self.source), serde_json::to_vec(&event)?)
                .await
            {
                Ok(()) => debug!("Sample event {} written", sequence),
                Err(e) => warn!("Sample event {} dropped: {}", sequence, e),
            }
        }

        info!("Sample producer stopped after {} events", sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryBroker;

    #[test]
    fn test_sample_event_shape() {
        let event = sample_event("booking-service", 7);
        assert_eq!(event["source"], "booking-service");
        assert_eq!(event["message"], "SMART-CONTRACT-BOOKING-CREATE - Log written: 7");
        assert!(event["@timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_producer_emits_until_shutdown() {
        let broker = MemoryBroker::new(1, 100);
        let (tx, rx) = watch::channel(false);
        let producer = SampleProducer::new(
            Arc::new(broker.clone()),
            "raw".to_string(),
            "svc".to_string(),
            Duration::from_millis(2),
            rx,
        );
        let handle = tokio::spawn(producer.run());

        for _ in 0..200 {
            if broker.topic_len("raw") >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(broker.topic_len("raw") >= 3);
    }
}
