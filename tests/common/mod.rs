#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use log_chain::api::{self, AppState};
use log_chain::audit::Verifier;
use log_chain::config::AppConfig;
use log_chain::crypto::SeededSaltSource;
use log_chain::database::{Database, IndexStore};
use log_chain::ledger::{AnchorLedger, LedgerDeadlines, LocalLedger, MemoryStateStore};
use log_chain::metrics::MetricsRegistry;
use log_chain::pipeline::PipelineDeps;
use log_chain::stream::MemoryBroker;

/// Setup an in-memory SQLite index store for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory().await.expect("Failed to create test database")
}

/// In-process ledger over an in-memory world state
pub fn setup_test_ledger() -> AnchorLedger {
    AnchorLedger::new(Arc::new(LocalLedger::new(
        Arc::new(MemoryStateStore::new()),
        LedgerDeadlines::default(),
    )))
}

/// Single-partition, fast-polling configuration with one worker per engine
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.stream.partitions = 1;
    config.stream.poll_timeout_ms = 5;
    config.normalizer.workers = 1;
    config.bundler.workers = 1;
    config.bundler.retry_delay_ms = 1;
    config
}

pub struct TestHarness {
    pub config: AppConfig,
    pub broker: MemoryBroker,
    pub db: Database,
    pub ledger: AnchorLedger,
    pub metrics: Arc<MetricsRegistry>,
}

impl TestHarness {
    pub async fn new(config: AppConfig) -> Self {
        Self {
            broker: MemoryBroker::bounded(
                config.stream.partitions,
                config.stream.max_poll_records,
                config.stream.retention_records,
            ),
            db: setup_test_db().await,
            ledger: setup_test_ledger(),
            metrics: Arc::new(MetricsRegistry::new().expect("metrics")),
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn IndexStore> {
        Arc::new(self.db.clone())
    }

    pub fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            broker: self.broker.clone(),
            ledger: self.ledger.clone(),
            store: self.store(),
            metrics: self.metrics.clone(),
            salts: Arc::new(SeededSaltSource::new(7)),
        }
    }

    pub fn router(&self) -> Router {
        api::router(AppState {
            ledger: self.ledger.clone(),
            store: self.store(),
            verifier: Verifier::new(self.store(), self.config.verifier.batch_limit),
            producer: Arc::new(self.broker.clone()),
            raw_topic: self.config.normalizer.consume_topic.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

/// Raw event as an application logger would emit it
pub fn raw_event(message: &str, seconds: u32) -> Value {
    serde_json::json!({
        "@timestamp": format!("2025-03-01T10:00:{:02}Z", seconds),
        "level": "info",
        "message": message,
        "source": "booking-service",
    })
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::get(uri).body(Body::empty()).expect("request")).await
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Poll `check` until it holds or the deadline passes
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..600 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
