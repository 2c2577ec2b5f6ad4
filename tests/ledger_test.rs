use std::sync::Arc;

use log_chain::ledger::{
    AnchorLedger, LedgerDeadlines, LocalLedger, PutAnchorRequest, SqliteStateStore, ANCHORED_EVENT,
};
use log_chain::LogChainError;

mod common;

fn request(batch_id: &str, root: &str) -> PutAnchorRequest {
    PutAnchorRequest {
        batch_id: batch_id.to_string(),
        root: root.to_string(),
        count: 5,
        start_ts_millis: 100,
        end_ts_millis: 200,
        process_ts_millis: 300,
        prev_root: None,
        tx_note: None,
    }
}

async fn file_ledger(dir: &tempfile::TempDir) -> (AnchorLedger, Arc<LocalLedger>) {
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let store = SqliteStateStore::connect(&url).await.unwrap();
    let local = Arc::new(LocalLedger::new(Arc::new(store), LedgerDeadlines::default()));
    (AnchorLedger::new(local.clone()), local)
}

#[tokio::test]
async fn test_anchors_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (ledger, _) = file_ledger(&dir).await;
        ledger.put_anchor(&request("b1", "r1")).await.unwrap();
        ledger.put_anchor(&request("b2", "r2")).await.unwrap();
    }

    let (ledger, _) = file_ledger(&dir).await;
    assert_eq!(ledger.list_anchors().await.unwrap().len(), 2);
    assert_eq!(ledger.latest_anchor().await.unwrap().batch_id, "b2");
    assert_eq!(ledger.get_anchor("b1").await.unwrap().root, "r1");

    let duplicate = ledger.put_anchor(&request("b1", "other")).await.unwrap_err();
    assert_eq!(duplicate.contract_code(), Some("ALREADY_EXISTS"));
    assert_eq!(ledger.get_anchor("b1").await.unwrap().root, "r1");
}

#[tokio::test]
async fn test_concurrent_distinct_batches_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let (ledger, local) = file_ledger(&dir).await;
    let mut events = local.subscribe();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger.put_anchor(&request(&format!("b{}", i), &format!("r{}", i))).await
        }));
    }
    let mut tx_ids = Vec::new();
    for task in tasks {
        tx_ids.push(task.await.unwrap().unwrap());
    }

    let anchors = ledger.list_anchors().await.unwrap();
    assert_eq!(anchors.len(), 10);
    for anchor in &anchors {
        assert!(tx_ids.contains(&anchor.tx_id));
    }

    // LATEST points at one of the committed batches
    let latest = ledger.latest_anchor().await.unwrap();
    assert!(anchors.iter().any(|a| a.batch_id == latest.batch_id));

    let mut seen = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.name, ANCHORED_EVENT);
        seen += 1;
    }
    assert_eq!(seen, 10);
}

#[tokio::test]
async fn test_empty_ledger_queries() {
    let ledger = common::setup_test_ledger();
    assert!(matches!(ledger.latest_anchor().await, Err(LogChainError::EmptyLedger)));
    assert!(matches!(ledger.get_anchor("b").await, Err(LogChainError::NotFound(_))));
    assert!(!ledger.exists("b").await.unwrap());
    assert!(ledger.list_anchors().await.unwrap().is_empty());
}
