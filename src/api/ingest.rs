//! Raw event ingestion

use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::AppState;
use crate::error::LogChainError;
use crate::metrics::Counter;

/// Publish one raw event or an array of them to the raw topic, keyed by `source`
pub async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, LogChainError> {
    let events = match payload {
        Value::Array(events) => events,
        event @ Value::Object(_) => vec![event],
        _ => {
            return Err(LogChainError::ValidationError(
                "expected a JSON object or an array of objects".to_string(),
            ))
        }
    };
    if let Some(position) = events.iter().position(|e| !e.is_object()) {
        return Err(LogChainError::ValidationError(format!(
            "event {} is not a JSON object",
            position
        )));
    }

    for event in &events {
        let key = event.get("source").and_then(Value::as_str);
        state
            .producer
            .send(&state.raw_topic, key, serde_json::to_vec(event)?)
            .await?;
    }

    state.metrics.incr(Counter::LogsIngested, events.len() as u64);
    debug!("Ingested {} raw events into {}", events.len(), state.raw_topic);
    Ok(Json(json!({ "accepted": events.len() })))
}
