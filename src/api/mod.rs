//! HTTP query and administrative surface

pub mod anchor;
pub mod ingest;
pub mod verifier;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::audit::Verifier;
use crate::database::IndexStore;
use crate::error::LogChainError;
use crate::ledger::AnchorLedger;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::stream::StreamProducer;

/// Shared handles for every route
#[derive(Clone)]
pub struct AppState {
    pub ledger: AnchorLedger,
    pub store: Arc<dyn IndexStore>,
    pub verifier: Verifier,
    pub producer: Arc<dyn StreamProducer>,
    /// Topic that `POST /ingest` publishes raw events to
    pub raw_topic: String,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_snapshot))
        .route("/metrics/reset", post(reset_metrics))
        .route("/anchor", get(anchor::list_anchors).post(anchor::put_anchor))
        .route("/anchor/batch", get(anchor::get_anchor))
        .route("/anchor/latest", get(anchor::latest_anchor))
        .route("/anchor/:batch_id/exists", get(anchor::exists))
        .route("/verifier/searchLogs", get(verifier::search_logs))
        .route("/verifier/verify", get(verifier::verify))
        .route("/ingest", post(ingest::ingest))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "log-chain",
        "timestamp": chrono::Utc::now()
    }))
}

async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn reset_metrics(State(state): State<AppState>) -> StatusCode {
    state.metrics.reset();
    StatusCode::NO_CONTENT
}

impl LogChainError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DuplicateAnchor(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::EmptyLedger => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::IndexStoreError(_)
            | Self::SerializationError(_)
            | Self::LedgerRejected(_) => StatusCode::BAD_REQUEST,
            Self::LedgerUnavailable(_) | Self::StreamError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LogChainError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (
            status,
            Json(json!({
                "error": self.code(),
                "message": self.to_string()
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            LogChainError::DuplicateAnchor("b".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(LogChainError::EmptyLedger.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            LogChainError::IndexStoreError("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LogChainError::LedgerUnavailable("x".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
