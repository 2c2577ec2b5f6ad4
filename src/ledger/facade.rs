use std::sync::Arc;

use tracing::debug;

use crate::error::LogChainError;
use crate::ledger::anchor::{Anchor, PutAnchorRequest};
use crate::ledger::client::{LedgerClient, LedgerError};

/// Typed view of the Anchor contract over any [`LedgerClient`]
#[derive(Clone)]
pub struct AnchorLedger {
    client: Arc<dyn LedgerClient>,
}

impl AnchorLedger {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }

    /// Submit `PutAnchor` and return the ledger transaction id.
    ///
    /// Keeps the raw [`LedgerError`] so callers can tell transient failures
    /// from contract rejections.
    pub async fn put_anchor(&self, request: &PutAnchorRequest) -> Result<String, LedgerError> {
        let bytes = self.client.submit("PutAnchor", &request.to_args()).await?;
        let tx_id = String::from_utf8_lossy(&bytes).into_owned();
        debug!("Anchored batch {} in tx {}", request.batch_id, tx_id);
        Ok(tx_id)
    }

    pub async fn exists(&self, batch_id: &str) -> Result<bool, LogChainError> {
        let bytes = self
            .client
            .evaluate("Exists", &[batch_id.to_string()])
            .await?;
        Ok(bytes.as_slice() == b"true")
    }

    pub async fn get_anchor(&self, batch_id: &str) -> Result<Anchor, LogChainError> {
        let bytes = self
            .client
            .evaluate("GetAnchor", &[batch_id.to_string()])
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn latest_anchor(&self) -> Result<Anchor, LogChainError> {
        let bytes = self.client.evaluate("LatestAnchor", &[]).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_anchors(&self) -> Result<Vec<Anchor>, LogChainError> {
        let bytes = self.client.evaluate("ListAnchors", &[]).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::client::{LedgerDeadlines, LocalLedger};
    use crate::ledger::state::MemoryStateStore;

    fn facade() -> AnchorLedger {
        let ledger = LocalLedger::new(Arc::new(MemoryStateStore::new()), LedgerDeadlines::default());
        AnchorLedger::new(Arc::new(ledger))
    }

    fn request(batch_id: &str) -> PutAnchorRequest {
        PutAnchorRequest {
            batch_id: batch_id.to_string(),
            root: format!("root-{}", batch_id),
            count: 2,
            start_ts_millis: 10,
            end_ts_millis: 20,
            process_ts_millis: 30,
            prev_root: None,
            tx_note: Some("[]".to_string()),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_facade() {
        let ledger = facade();
        let tx_id = ledger.put_anchor(&request("b1")).await.unwrap();

        assert!(ledger.exists("b1").await.unwrap());
        assert!(!ledger.exists("b2").await.unwrap());

        let anchor = ledger.get_anchor("b1").await.unwrap();
        assert_eq!(anchor.tx_id, tx_id);
        assert_eq!(anchor.count, 2);
        assert_eq!(anchor.anchor_ts_millis, 30);

        let latest = ledger.latest_anchor().await.unwrap();
        assert_eq!(latest.batch_id, "b1");
    }

    #[tokio::test]
    async fn test_errors_map_to_domain_errors() {
        let ledger = facade();
        assert!(matches!(
            ledger.latest_anchor().await.unwrap_err(),
            LogChainError::EmptyLedger
        ));
        assert!(matches!(
            ledger.get_anchor("missing").await.unwrap_err(),
            LogChainError::NotFound(_)
        ));

        ledger.put_anchor(&request("b1")).await.unwrap();
        let err: LogChainError = ledger.put_anchor(&request("b1")).await.unwrap_err().into();
        assert!(matches!(err, LogChainError::DuplicateAnchor(ref id) if id == "b1"));
    }

    #[tokio::test]
    async fn test_list_anchors() {
        let ledger = facade();
        assert!(ledger.list_anchors().await.unwrap().is_empty());
        for i in 0..3 {
            ledger.put_anchor(&request(&format!("b{}", i))).await.unwrap();
        }
        assert_eq!(ledger.list_anchors().await.unwrap().len(), 3);
    }
}
