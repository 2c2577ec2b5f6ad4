//! Search and verification routes

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::audit::{NormalizedLog, VerifyResult};
use crate::database::LogSearch;
use crate::error::LogChainError;

const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub hash: Option<String>,
    pub message: Option<String>,
    pub start_ts_millis: Option<i64>,
    pub end_ts_millis: Option<i64>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl SearchParams {
    fn into_search(self) -> Result<LogSearch, LogChainError> {
        let required = |value: Option<i64>, name: &str| {
            value.ok_or_else(|| LogChainError::ValidationError(format!("{} is required", name)))
        };
        Ok(LogSearch {
            start_ts_millis: required(self.start_ts_millis, "startTsMillis")?,
            end_ts_millis: required(self.end_ts_millis, "endTsMillis")?,
            hash: self.hash,
            message: self.message,
            page: self.page.unwrap_or(0),
            size: self.size.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyParams {
    pub log_hash: Option<String>,
}

pub async fn search_logs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<NormalizedLog>>, LogChainError> {
    let search = params.into_search()?;
    Ok(Json(state.store.search_logs(&search).await?))
}

pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<VerifyResult>, LogChainError> {
    let log_hash = params
        .log_hash
        .ok_or_else(|| LogChainError::ValidationError("logHash is required".to_string()))?;
    Ok(Json(state.verifier.verify(&log_hash).await?))
}
