//! Anchor ledger routes

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::AppState;
use crate::error::LogChainError;
use crate::ledger::{Anchor, PutAnchorRequest};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Body of `POST /anchor`; time bounds arrive in nanoseconds
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAnchorBody {
    pub batch_id: String,
    pub root: String,
    pub count: i64,
    pub start_ts_nanos: i64,
    pub end_ts_nanos: i64,
    #[serde(default)]
    pub prev_root: Option<String>,
    #[serde(default)]
    pub tx_note: Option<String>,
}

impl PutAnchorBody {
    fn into_request(self, process_ts_millis: i64) -> PutAnchorRequest {
        PutAnchorRequest {
            batch_id: self.batch_id,
            root: self.root,
            count: self.count,
            start_ts_millis: self.start_ts_nanos.div_euclid(NANOS_PER_MILLI),
            end_ts_millis: self.end_ts_nanos.div_euclid(NANOS_PER_MILLI),
            process_ts_millis,
            prev_root: self.prev_root.filter(|r| !r.is_empty()),
            tx_note: self.tx_note.filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuery {
    pub batch_id: Option<String>,
}

pub async fn list_anchors(State(state): State<AppState>) -> Result<Json<Vec<Anchor>>, LogChainError> {
    Ok(Json(state.ledger.list_anchors().await?))
}

pub async fn put_anchor(
    State(state): State<AppState>,
    Json(body): Json<PutAnchorBody>,
) -> Result<Json<Value>, LogChainError> {
    let request = body.into_request(Utc::now().timestamp_millis());
    let tx_id = state.ledger.put_anchor(&request).await?;
    info!("Anchor for batch {} submitted manually in tx {}", request.batch_id, tx_id);

    Ok(Json(json!({
        "txId": tx_id,
        "batchId": request.batch_id
    })))
}

pub async fn get_anchor(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<Anchor>, LogChainError> {
    let batch_id = query
        .batch_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| LogChainError::ValidationError("batchId is required".to_string()))?;
    Ok(Json(state.ledger.get_anchor(&batch_id).await?))
}

pub async fn exists(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, LogChainError> {
    let exists = state.ledger.exists(&batch_id).await?;
    Ok(Json(json!({ "exists": exists })))
}

pub async fn latest_anchor(State(state): State<AppState>) -> Result<Json<Anchor>, LogChainError> {
    Ok(Json(state.ledger.latest_anchor().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_converts_nanos_and_drops_empty_optionals() {
        let body: PutAnchorBody = serde_json::from_value(json!({
            "batchId": "b1",
            "root": "r",
            "count": 3,
            "startTsNanos": 1_500_000_000i64,
            "endTsNanos": 2_999_999_999i64,
            "prevRoot": "",
            "txNote": "note"
        }))
        .unwrap();

        let request = body.into_request(42);
        assert_eq!(request.start_ts_millis, 1500);
        assert_eq!(request.end_ts_millis, 2999);
        assert_eq!(request.process_ts_millis, 42);
        assert_eq!(request.prev_root, None);
        assert_eq!(request.tx_note.as_deref(), Some("note"));
    }
}
