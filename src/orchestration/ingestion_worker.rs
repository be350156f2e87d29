//! # Ingestion Worker
//!
//! Polls the input directory, waits for each file to stop changing, then
//! hands it to [`IngestionStage`] with bounded concurrency. Every tick also
//! sweeps the in-progress directory for work orphaned by a dead instance.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::fs;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::claim::{ChangedReadLock, ReadLockState};
use crate::error::{PipelineError, PipelineResult};
use crate::stages::{IngestOutcome, IngestionStage, RecoveryOutcome};

/// What one poll of the input directory started
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub seen: usize,
    pub started: usize,
    pub recovered: usize,
}

pub struct IngestionWorker {
    stage: Arc<IngestionStage>,
    input_dir: PathBuf,
    poll_interval: Duration,
    read_lock: ChangedReadLock,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    tasks: Mutex<JoinSet<IngestOutcome>>,
}

impl std::fmt::Debug for IngestionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionWorker")
            .field("input_dir", &self.input_dir)
            .field("poll_interval", &self.poll_interval)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl IngestionWorker {
    pub fn new(
        stage: Arc<IngestionStage>,
        input_dir: impl Into<PathBuf>,
        check_interval: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            stage,
            input_dir: input_dir.into(),
            poll_interval: check_interval,
            read_lock: ChangedReadLock::new(check_interval),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Files currently being ingested by this worker
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Poll until `shutdown` flips to true, then abort outstanding ingests.
    /// Aborted files keep their claims until the TTL lapses and are picked
    /// up again by the next poll or the in-progress sweep.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                input_dir = %self.input_dir.display(),
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "🚀 Starting ingestion worker"
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.tick().await {
                    error!(error = %e, "Error polling input directory");
                }
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }

            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            tasks.shutdown().await;
            info!("🛑 Ingestion worker stopped");
        })
    }

    /// One poll: recovery sweep, then start every stable file
    pub async fn tick(&self) -> PipelineResult<TickSummary> {
        self.reap_finished();

        let mut summary = TickSummary::default();
        match self.stage.recover_in_progress().await {
            Ok(outcomes) => {
                summary.recovered = outcomes
                    .iter()
                    .filter(|o| !matches!(o, RecoveryOutcome::Skipped))
                    .count();
            }
            Err(e) => warn!(error = %e, "In-progress sweep failed"),
        }

        let files = self.list_input().await?;
        summary.seen = files.len();
        let present: HashSet<PathBuf> = files.iter().map(|(path, ..)| path.clone()).collect();

        for (path, size, modified) in files {
            if self.read_lock.observe(&path, size, modified) != ReadLockState::Stable {
                continue;
            }
            if self.in_flight.lock().contains(&path) {
                continue;
            }
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!(in_flight = self.in_flight(), "Ingest concurrency limit reached");
                break;
            };

            self.in_flight.lock().insert(path.clone());
            let stage = self.stage.clone();
            let in_flight = self.in_flight.clone();
            self.tasks.lock().spawn(async move {
                let outcome = stage.ingest(&path, size, modified).await;
                in_flight.lock().remove(&path);
                drop(permit);
                outcome
            });
            summary.started += 1;
        }

        self.read_lock.prune(&present);
        Ok(summary)
    }

    /// Wait for every started ingest to finish (for testing and drain)
    pub async fn wait_idle(&self) -> Vec<IngestOutcome> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Ingest task panicked or was aborted"),
            }
        }
        outcomes
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Ingest task panicked or was aborted");
            }
        }
    }

    async fn list_input(&self) -> PipelineResult<Vec<(PathBuf, u64, std::time::SystemTime)>> {
        let mut entries = fs::read_dir(&self.input_dir)
            .await
            .map_err(|e| PipelineError::io("list", &self.input_dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io("list", &self.input_dir, e))?
        {
            // entries may disappear between listing and stat
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            files.push((entry.path(), metadata.len(), modified));
        }
        Ok(files)
    }
}
