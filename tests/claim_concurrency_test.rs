//! Competing instances over one input directory and shared backends

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use mx_pipeline::claim::{ClaimKey, ClaimStore, InMemoryClaimStore};
use mx_pipeline::ledger::{InMemoryProcessLedger, ProcessLedger};
use mx_pipeline::messaging::InMemoryMessagingService;
use mx_pipeline::orchestration::{Pipeline, PipelineComponents};
use mx_pipeline::stages::TypeProcessorRegistry;
use mx_pipeline::ProcessStatus;
use tokio_test::assert_ok;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_produce_exactly_one_owner() {
    let store = Arc::new(InMemoryClaimStore::new());
    let key = ClaimKey::content_hash(b"<Document/>");

    let attempts = (0..32).map(|i| {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            store
                .try_claim(&key, &format!("instance-{i}"), Duration::from_secs(5))
                .await
                .unwrap()
                .is_acquired()
        })
    });
    let winners = join_all(attempts)
        .await
        .into_iter()
        .filter(|won| *won.as_ref().unwrap())
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_instances_share_one_directory_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(InMemoryProcessLedger::new());
    let claims = Arc::new(InMemoryClaimStore::new());
    let messaging = Arc::new(InMemoryMessagingService::new());

    let mut handles = Vec::new();
    for instance in ["node-a", "node-b"] {
        let mut config = fast_config(dir.path());
        config.claim.instance_id = instance.to_string();
        let components = PipelineComponents {
            ledger: ledger.clone(),
            claims: claims.clone(),
            messaging: messaging.clone(),
            processors: TypeProcessorRegistry::with_defaults(),
        };
        handles.push(Pipeline::with_components(config, components).await.unwrap());
    }

    let config = fast_config(dir.path());
    let staging = dir.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    for i in 0..40 {
        let name = format!("pacs-{i:02}.xml");
        std::fs::write(staging.join(&name), PACS_008).unwrap();
        std::fs::rename(staging.join(&name), config.files.input.join(&name)).unwrap();
    }

    let ledger_ref = &ledger;
    assert!(
        eventually(Duration::from_secs(20), move || async move {
            ledger_ref
                .find_by_status(ProcessStatus::Completed)
                .await
                .unwrap()
                .len()
                == 40
        })
        .await
    );
    assert_eq!(ledger.count().await.unwrap(), 40);
    assert_eq!(files_under(&config.files.success).len(), 40);
    assert!(files_under(&config.files.in_progress).is_empty());

    for handle in handles {
        handle.shutdown().await;
    }
    assert_eq!(claims.live_claims(), 0);
}

#[tokio::test]
async fn expired_claim_is_taken_over_by_another_owner() {
    let store = InMemoryClaimStore::new();
    let key = ClaimKey::inflight("$$7$$pacs.008.001.08.xml");

    assert!(store
        .try_claim(&key, "crashed", Duration::from_millis(20))
        .await
        .unwrap()
        .is_acquired());
    assert!(!store
        .try_claim(&key, "survivor", Duration::from_secs(5))
        .await
        .unwrap()
        .is_acquired());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store
        .try_claim(&key, "survivor", Duration::from_secs(5))
        .await
        .unwrap()
        .is_acquired());
    // the crashed owner can no longer release what it lost
    assert!(!assert_ok!(store.release(&key, "crashed").await));
    assert!(assert_ok!(store.release(&key, "survivor").await));
}
