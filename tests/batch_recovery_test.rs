//! A batch ridden through an outage of the claim store and the ledger.
//! Infrastructure failures retry without limit, so every file must still
//! complete exactly once.

mod common;

use std::time::Duration;

use common::*;
use mx_pipeline::ledger::ProcessLedger;
use mx_pipeline::ProcessStatus;

const BATCH: usize = 100;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_survives_backing_store_outage_without_duplicates_or_losses() {
    let pipeline = TestPipeline::start_with(|config| {
        config.claim.read_lock_timeout_ms = 1_000;
        config.consumers.validator = 4;
        config.consumers.message_types = 4;
    })
    .await;
    let p = &pipeline;

    for i in 0..BATCH / 2 {
        pipeline.drop_file(&format!("pacs-{i:03}.xml"), PACS_008);
    }
    // let part of the batch get into flight before the stores go away
    tokio::time::sleep(Duration::from_millis(60)).await;
    pipeline.ledger.set_reachable(false);
    pipeline.claims.set_reachable(false);

    for i in BATCH / 2..BATCH {
        pipeline.drop_file(&format!("pacs-{i:03}.xml"), PACS_008);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    pipeline.ledger.set_reachable(true);
    pipeline.claims.set_reachable(true);

    assert!(
        eventually(Duration::from_secs(30), move || async move {
            p.count_in(ProcessStatus::Completed).await == BATCH
        })
        .await,
        "batch did not settle: {} completed of {}",
        pipeline.count_in(ProcessStatus::Completed).await,
        pipeline.ledger.count().await.unwrap()
    );

    assert_eq!(pipeline.ledger.count().await.unwrap(), BATCH as u64);
    assert_eq!(pipeline.count_in(ProcessStatus::Failed).await, 0);
    assert_eq!(pipeline.count_in(ProcessStatus::Unsupported).await, 0);

    let mut names: Vec<String> = pipeline.records().await.into_iter().map(|r| r.name).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), BATCH);

    assert_eq!(files_under(&pipeline.config.files.success).len(), BATCH);
    assert!(files_under(&pipeline.config.files.input).is_empty());
    assert!(files_under(&pipeline.config.files.error).is_empty());
    assert_eq!(
        pipeline
            .messaging
            .queue_length(&pipeline.config.queues.dead_letter)
            .await,
        0
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn transport_outage_delays_but_does_not_drop_messages() {
    let pipeline = TestPipeline::start().await;
    let p = &pipeline;

    pipeline.messaging.set_reachable(false);
    for i in 0..10 {
        pipeline.drop_file(&format!("pacs-{i}.xml"), PACS_008);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.messaging.set_reachable(true);

    assert!(
        eventually(Duration::from_secs(20), move || async move {
            p.count_in(ProcessStatus::Completed).await == 10
        })
        .await
    );
    assert_eq!(pipeline.ledger.count().await.unwrap(), 10);

    pipeline.shutdown().await;
}
