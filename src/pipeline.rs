//! Worker wiring
//!
//! Spawns the normalizer, bundler and index sink workers over one broker and
//! stops them together through a shared shutdown flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bundler::{BundlerSettings, BundlerWorker};
use crate::config::AppConfig;
use crate::crypto::SaltSource;
use crate::database::{IndexSinkWorker, IndexStore, SinkKind};
use crate::error::LogChainError;
use crate::ledger::AnchorLedger;
use crate::metrics::MetricsRegistry;
use crate::normalizer::{Normalizer, NormalizerWorker};
use crate::producer::SampleProducer;
use crate::stream::MemoryBroker;

/// Everything the workers share
#[derive(Clone)]
pub struct PipelineDeps {
    pub broker: MemoryBroker,
    pub ledger: AnchorLedger,
    pub store: Arc<dyn IndexStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub salts: Arc<dyn SaltSource>,
}

/// Running workers and the flag that stops them
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<Result<(), LogChainError>>)>,
}

impl PipelineHandle {
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Raise the shutdown flag and wait for every worker to exit.
    ///
    /// Returns the first worker failure, after all workers have stopped.
    pub async fn shutdown(self) -> Result<(), LogChainError> {
        info!("Stopping {} pipeline workers", self.workers.len());
        // Receivers may already be gone if every worker exited on its own
        let _ = self.shutdown.send(true);

        let mut first_error = None;
        for (name, handle) in self.workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{} terminated with error: {}", name, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("{} panicked: {}", name, e);
                    first_error.get_or_insert(LogChainError::StreamError(format!("{} panicked", name)));
                }
            }
        }

        info!("Pipeline stopped");
        first_error.map_or(Ok(()), Err)
    }
}

pub fn start(config: &AppConfig, deps: PipelineDeps) -> PipelineHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let poll_timeout = Duration::from_millis(config.stream.poll_timeout_ms);
    let mut workers = Vec::new();

    let normalizer = Normalizer::new(
        config.normalizer.app.clone(),
        config.normalizer.env.clone(),
        deps.salts.clone(),
    );
    for i in 0..config.normalizer.workers {
        let name = format!("normalizer-{}", i);
        let worker = NormalizerWorker::new(
            name.clone(),
            normalizer.clone(),
            Box::new(
                deps.broker
                    .subscribe(&config.normalizer.group_id, &config.normalizer.consume_topic),
            ),
            Arc::new(deps.broker.clone()),
            config.normalizer.produce_topic.clone(),
            poll_timeout,
            deps.metrics.clone(),
            shutdown_rx.clone(),
        );
        workers.push((name, tokio::spawn(worker.run())));
    }

    let settings = BundlerSettings::from_config(&config.bundler, poll_timeout);
    for i in 0..config.bundler.workers {
        let name = format!("bundler-{}", i);
        let worker = BundlerWorker::new(
            name.clone(),
            deps.ledger.clone(),
            Box::new(
                deps.broker
                    .subscribe(&config.bundler.group_id, &config.bundler.consume_topic),
            ),
            Arc::new(deps.broker.clone()),
            settings.clone(),
            deps.metrics.clone(),
            shutdown_rx.clone(),
        );
        workers.push((name, tokio::spawn(worker.run())));
    }

    if config.indexer.enabled {
        let sinks = [
            (
                "indexer-normalized",
                SinkKind::Normalized,
                &config.indexer.normalized_group_id,
                &config.normalizer.produce_topic,
            ),
            (
                "indexer-anchored",
                SinkKind::Anchored,
                &config.indexer.anchored_group_id,
                &config.bundler.produce_topic,
            ),
        ];
        for (name, kind, group, topic) in sinks {
            let worker = IndexSinkWorker::new(
                name.to_string(),
                kind,
                deps.store.clone(),
                Box::new(deps.broker.subscribe(group, topic)),
                poll_timeout,
                deps.metrics.clone(),
                shutdown_rx.clone(),
            );
            workers.push((name.to_string(), tokio::spawn(worker.run())));
        }
    }

    if config.producer.enabled {
        let producer = SampleProducer::new(
            Arc::new(deps.broker.clone()),
            config.normalizer.consume_topic.clone(),
            config.producer.source.clone(),
            Duration::from_millis(config.producer.interval_ms),
            shutdown_rx.clone(),
        );
        workers.push(("sample-producer".to_string(), tokio::spawn(producer.run())));
    }

    info!("Pipeline started with {} workers", workers.len());
    PipelineHandle { shutdown, workers }
}
