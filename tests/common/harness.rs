//! In-memory pipeline harness shared by the integration tests

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mx_pipeline::claim::InMemoryClaimStore;
use mx_pipeline::config::{FilesConfig, PipelineConfig};
use mx_pipeline::ledger::{InMemoryProcessLedger, ProcessLedger};
use mx_pipeline::messaging::InMemoryMessagingService;
use mx_pipeline::orchestration::{Pipeline, PipelineComponents, PipelineHandle};
use mx_pipeline::stages::TypeProcessorRegistry;
use mx_pipeline::{ProcessRecord, ProcessStatus};
use tempfile::TempDir;

pub const PACS_008: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<Document xmlns=\"urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08\">\n\
  <FIToFICstmrCdtTrf>\n\
    <GrpHdr><MsgId>MSG-1</MsgId><NbOfTxs>1</NbOfTxs></GrpHdr>\n\
  </FIToFICstmrCdtTrf>\n\
</Document>\n";

pub const CAMT_053: &str = "<Document xmlns=\"urn:iso:std:iso:20022:tech:xsd:camt.053.001.08\"><BkToCstmrStmt/></Document>";

pub const MALFORMED: &str = "<Document xmlns=\"urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08\"><FIToFICstmrCdtTrf></Document>";

/// Millisecond-scale timings so scenarios settle quickly
pub fn fast_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.files = FilesConfig::rooted_at(root);
    config.claim.read_lock_check_interval_ms = 20;
    config.claim.read_lock_timeout_ms = 400;
    config.queues.poll_interval_ms = 10;
    config.queues.visibility_timeout_ms = 5_000;
    config.redelivery.initial_delay_ms = 10;
    config.redelivery.max_delay_ms = 80;
    config.redelivery.max_attempts = 3;
    config
}

pub struct TestPipeline {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub ledger: Arc<InMemoryProcessLedger>,
    pub claims: Arc<InMemoryClaimStore>,
    pub messaging: Arc<InMemoryMessagingService>,
    handle: Option<PipelineHandle>,
}

impl TestPipeline {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(adjust: impl FnOnce(&mut PipelineConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = fast_config(dir.path());
        adjust(&mut config);

        let ledger = Arc::new(InMemoryProcessLedger::new());
        let claims = Arc::new(InMemoryClaimStore::new());
        let messaging = Arc::new(InMemoryMessagingService::new());
        let components = PipelineComponents {
            ledger: ledger.clone(),
            claims: claims.clone(),
            messaging: messaging.clone(),
            processors: TypeProcessorRegistry::with_defaults(),
        };

        let handle = Pipeline::with_components(config.clone(), components)
            .await
            .expect("pipeline starts");

        Self {
            dir,
            config,
            ledger,
            claims,
            messaging,
            handle: Some(handle),
        }
    }

    /// Write `contents` next to the input directory, then move it in so the
    /// poller never sees a partial file
    pub fn drop_file(&self, name: &str, contents: &str) -> PathBuf {
        let staging = self.dir.path().join("staging");
        std::fs::create_dir_all(&staging).expect("staging dir");
        let staged = staging.join(name);
        std::fs::write(&staged, contents).expect("write staged file");
        let target = self.config.files.input.join(name);
        std::fs::rename(&staged, &target).expect("move into input");
        target
    }

    pub async fn records(&self) -> Vec<ProcessRecord> {
        let mut records = Vec::new();
        for status in [
            ProcessStatus::Created,
            ProcessStatus::Validated,
            ProcessStatus::Completed,
            ProcessStatus::Unsupported,
            ProcessStatus::Failed,
        ] {
            records.extend(self.ledger.find_by_status(status).await.expect("ledger query"));
        }
        records.sort_by_key(|r| r.id.get());
        records
    }

    pub async fn count_in(&self, status: ProcessStatus) -> usize {
        self.ledger
            .find_by_status(status)
            .await
            .expect("ledger query")
            .len()
    }

    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}

/// Every regular file below `root`, relative to it
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

/// Poll `check` until it returns true or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
