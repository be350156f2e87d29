//! # Ingestion Stage
//!
//! Takes one stable input file from claim to validator queue:
//!
//! 1. claim `ingest:<key>` (AlreadyClaimed: another instance owns it)
//! 2. read and strip line breaks (NotFound: the file already left)
//! 3. create the ledger record
//! 4. claim `inflight:<tagged name>`
//! 5. rename into the in-progress directory under the tagged name
//! 6. release the ingest claim
//! 7. send the envelope to the validator queue
//! 8. delete the in-progress file and release the inflight claim
//!
//! A failure redelivers from the first step not yet completed, so one
//! physical file never yields two ledger records. Claims are heartbeated
//! while waiting out a redelivery delay. A file that cannot be read at all
//! is moved to the error directory once redelivery gives up.
//!
//! [`IngestionStage::recover_in_progress`] finishes the work of an instance
//! that died between steps 5 and 8, using only the tagged file name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, error, info, warn, Span};

use crate::claim::{ClaimKey, ClaimKeyStrategy, ClaimOutcome, ClaimStore};
use crate::config::PipelineConfig;
use crate::constants::routes;
use crate::context::{with_correlation, CorrelationContext};
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::ProcessLedger;
use crate::logging::log_stage_operation;
use crate::messaging::{Envelope, MessagingService, MessagingServiceExt};
use crate::models::{ProcessId, ProcessRecord};
use crate::orchestration::{ErrorPolicy, FailedMessage, PolicyOutcome};
use crate::state_machine::ProcessStatus;
use crate::utils::{extract_process_id, strip_line_breaks, tag_file_name};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Forwarded(ProcessId),
    /// Another instance holds the claim
    AlreadyClaimed,
    /// The file left the input directory before it could be read
    Vanished,
    /// Routed terminally by the error policy
    Handled,
    /// File name is not valid UTF-8
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Ledger still CREATED; envelope sent again
    Resent(ProcessId),
    /// Ledger already past CREATED; leftover file removed
    Cleared(ProcessId),
    /// Claimed by a live instance, untagged, or not recoverable yet
    Skipped,
}

/// Progress of one file through ingestion
#[derive(Debug)]
struct IngestState {
    source: PathBuf,
    file_name: String,
    size: u64,
    modified: SystemTime,
    ingest_key: Option<ClaimKey>,
    payload: Option<String>,
    record: Option<ProcessRecord>,
    tagged: Option<String>,
    inflight_key: Option<ClaimKey>,
    in_progress: Option<PathBuf>,
    sent: bool,
    /// Sink name used while no process id exists
    untagged_sink_name: String,
}

impl IngestState {
    fn failed_message(&self) -> FailedMessage {
        FailedMessage {
            process_id: self.record.as_ref().map(|r| r.id),
            route_id: routes::FILE_INGESTION.to_string(),
            original_file_name: self.file_name.clone(),
            tagged_file_name: self
                .tagged
                .clone()
                .or_else(|| self.record.is_none().then(|| self.untagged_sink_name.clone())),
            payload: self.payload.clone().unwrap_or_default(),
        }
    }
}

pub struct IngestionStage {
    ledger: Arc<dyn ProcessLedger>,
    claims: Arc<dyn ClaimStore>,
    messaging: Arc<dyn MessagingService>,
    policy: Arc<ErrorPolicy>,
    in_progress_dir: PathBuf,
    error_dir: PathBuf,
    validator_queue: String,
    owner: String,
    claim_ttl: Duration,
    key_strategy: ClaimKeyStrategy,
}

impl IngestionStage {
    pub fn new(
        ledger: Arc<dyn ProcessLedger>,
        claims: Arc<dyn ClaimStore>,
        messaging: Arc<dyn MessagingService>,
        policy: Arc<ErrorPolicy>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            ledger,
            claims,
            messaging,
            policy,
            in_progress_dir: config.files.in_progress.clone(),
            error_dir: config.files.error.clone(),
            validator_queue: config.queues.validator.clone(),
            owner: config.claim.instance_id.clone(),
            claim_ttl: config.claim.read_lock_timeout(),
            key_strategy: config.claim.key_strategy,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn in_progress_dir(&self) -> &Path {
        &self.in_progress_dir
    }

    /// Ingest one input file observed with `size` and `modified`
    pub async fn ingest(&self, path: &Path, size: u64, modified: SystemTime) -> IngestOutcome {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Ignoring input file with a non UTF-8 name");
            return IngestOutcome::Ignored;
        };

        let mut state = IngestState {
            source: path.to_path_buf(),
            file_name: file_name.to_string(),
            size,
            modified,
            ingest_key: None,
            payload: None,
            record: None,
            tagged: None,
            inflight_key: None,
            in_progress: None,
            sent: false,
            untagged_sink_name: format!("{}_{}", uuid::Uuid::new_v4(), file_name),
        };

        let context = CorrelationContext::new(routes::FILE_INGESTION).with_file_name(file_name);
        with_correlation(&context, self.run(&mut state)).await
    }

    async fn run(&self, state: &mut IngestState) -> IngestOutcome {
        let mut attempt = 0;
        loop {
            let error = match self.attempt(state).await {
                Ok(outcome) => return outcome,
                Err(error) => error,
            };

            attempt += 1;
            match self
                .policy
                .on_error(&error, &state.failed_message(), attempt)
                .await
            {
                PolicyOutcome::Redeliver { delay, .. } => {
                    if !self.wait_holding_claims(state, delay).await {
                        return IngestOutcome::AlreadyClaimed;
                    }
                }
                PolicyOutcome::Handled { .. } => {
                    self.discard(state).await;
                    return IngestOutcome::Handled;
                }
            }
        }
    }

    /// Run every step not yet completed
    async fn attempt(&self, state: &mut IngestState) -> PipelineResult<IngestOutcome> {
        if state.ingest_key.is_none() && state.in_progress.is_none() {
            let key = match self.key_strategy {
                ClaimKeyStrategy::Fingerprint => {
                    ClaimKey::fingerprint(&state.source, state.size, state.modified)
                }
                ClaimKeyStrategy::ContentHash => {
                    let Some(bytes) = read_source(&state.source).await? else {
                        return Ok(IngestOutcome::Vanished);
                    };
                    state.payload = Some(normalize(&bytes));
                    ClaimKey::content_hash(&bytes)
                }
            };

            match self.claims.try_claim(&key, &self.owner, self.claim_ttl).await? {
                ClaimOutcome::Acquired => {
                    state.ingest_key = Some(key);
                    // bytes read before the claim only keyed it; the previous
                    // holder may have moved the file away since
                    if self.key_strategy == ClaimKeyStrategy::ContentHash {
                        state.payload = None;
                    }
                }
                ClaimOutcome::AlreadyClaimed => {
                    debug!("Input file claimed by another instance");
                    return Ok(IngestOutcome::AlreadyClaimed);
                }
            }
        }

        if state.payload.is_none() {
            match read_source(&state.source).await? {
                Some(bytes) => state.payload = Some(normalize(&bytes)),
                None => {
                    debug!("Input file vanished after claim");
                    self.release_held(state).await;
                    return Ok(IngestOutcome::Vanished);
                }
            }
        }

        let record = match &state.record {
            Some(record) => record.clone(),
            None => {
                let payload = state.payload.as_deref().unwrap_or_default();
                let record = self.ledger.create(&state.file_name, payload).await?;
                Span::current().record("process_id", record.id.get());
                state.record = Some(record.clone());
                record
            }
        };

        let tagged = match &state.tagged {
            Some(tagged) => tagged.clone(),
            None => {
                let tagged = tag_file_name(&state.file_name, record.id)?;
                state.tagged = Some(tagged.clone());
                tagged
            }
        };

        if state.inflight_key.is_none() {
            let key = ClaimKey::inflight(&tagged);
            match self.claims.try_claim(&key, &self.owner, self.claim_ttl).await? {
                ClaimOutcome::Acquired => state.inflight_key = Some(key),
                ClaimOutcome::AlreadyClaimed => {
                    return Err(PipelineError::unexpected(format!(
                        "in-progress claim for '{tagged}' is held by another instance"
                    )))
                }
            }
        }

        let in_progress = match &state.in_progress {
            Some(path) => path.clone(),
            None => {
                let target = self.in_progress_dir.join(&tagged);
                match fs::rename(&state.source, &target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        warn!(
                            process_id = record.id.get(),
                            "Input file left before the move, ledger record stays CREATED"
                        );
                        self.release_held(state).await;
                        return Ok(IngestOutcome::Vanished);
                    }
                    Err(e) => {
                        return Err(PipelineError::io("move to in-progress", &state.source, e))
                    }
                }
                state.in_progress = Some(target.clone());
                if let Some(key) = state.ingest_key.take() {
                    self.release_quietly(&key).await;
                }
                target
            }
        };

        if !state.sent {
            let envelope = Envelope::new(&record, tagged.as_str());
            debug!(queue = %self.validator_queue, "📤 Sending to queue");
            let message_id = self.messaging.send(&self.validator_queue, &envelope).await?;
            debug!(queue = %self.validator_queue, message_id = %message_id, "📤 Sent");
            state.sent = true;
        }

        remove_if_present(&in_progress).await?;
        if let Some(key) = state.inflight_key.take() {
            self.release_quietly(&key).await;
        }

        log_stage_operation(
            routes::FILE_INGESTION,
            Some(record.id),
            ProcessStatus::Created,
            Some(&tagged),
        );
        Ok(IngestOutcome::Forwarded(record.id))
    }

    /// Sleep for `delay`, extending held claims at half the TTL. Returns
    /// false when the ingest claim was lost before any record exists.
    async fn wait_holding_claims(&self, state: &IngestState, delay: Duration) -> bool {
        let heartbeat = (self.claim_ttl / 2).max(MIN_HEARTBEAT);
        let mut remaining = delay;
        loop {
            if !self.refresh_claims(state).await {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }
            let step = remaining.min(heartbeat);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    async fn refresh_claims(&self, state: &IngestState) -> bool {
        if let Some(key) = &state.ingest_key {
            match self.claims.extend(key, &self.owner, self.claim_ttl).await {
                Ok(true) => {}
                Ok(false) if state.record.is_none() => {
                    warn!(key = %key, "Ingest claim lost to another instance, abandoning file");
                    return false;
                }
                Ok(false) => {
                    warn!(key = %key, "Ingest claim lost after the ledger record was created");
                }
                Err(e) => debug!(key = %key, error = %e, "Claim heartbeat failed"),
            }
        }
        if let Some(key) = &state.inflight_key {
            match self.claims.extend(key, &self.owner, self.claim_ttl).await {
                Ok(true) => {}
                Ok(false) => warn!(key = %key, "In-progress claim lost to another instance"),
                Err(e) => debug!(key = %key, error = %e, "Claim heartbeat failed"),
            }
        }
        true
    }

    /// After terminal routing the sinks hold a copy of the payload, so the
    /// source file is removed. A file that was never read is moved into the
    /// error directory instead, over the empty placeholder the error sink
    /// wrote for it.
    async fn discard(&self, state: &mut IngestState) {
        if state.payload.is_none() {
            if !self.quarantine_unreadable(state).await {
                // keep the marker so the file is not picked up again until it expires
                return;
            }
        } else {
            let leftover = state.in_progress.as_ref().unwrap_or(&state.source);
            if let Err(e) = remove_if_present(leftover).await {
                warn!(path = %leftover.display(), error = %e, "Failed to remove routed file");
            }
        }
        self.release_held(state).await;
    }

    /// Returns false when the file is still in the input directory
    async fn quarantine_unreadable(&self, state: &IngestState) -> bool {
        let target = self.error_dir.join(&state.untagged_sink_name);
        if let Err(e) = remove_if_present(&target).await {
            debug!(
                path = %target.display(),
                error = %e,
                "Could not remove the error sink placeholder"
            );
        }
        match fs::rename(&state.source, &target).await {
            Ok(()) => {
                warn!(
                    path = %state.source.display(),
                    target = %target.display(),
                    "Unreadable input file moved to the error directory"
                );
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                error!(
                    path = %state.source.display(),
                    error = %e,
                    "Unreadable input file could not be moved out of the input directory"
                );
                false
            }
        }
    }

    async fn release_held(&self, state: &mut IngestState) {
        if let Some(key) = state.ingest_key.take() {
            self.release_quietly(&key).await;
        }
        if let Some(key) = state.inflight_key.take() {
            self.release_quietly(&key).await;
        }
    }

    async fn release_quietly(&self, key: &ClaimKey) {
        if let Err(e) = self.claims.release(key, &self.owner).await {
            debug!(key = %key, error = %e, "Claim release failed, marker will expire");
        }
    }

    /// Resume every in-progress file whose owner is gone
    pub async fn recover_in_progress(&self) -> PipelineResult<Vec<RecoveryOutcome>> {
        let mut entries = match fs::read_dir(&self.in_progress_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io("list", &self.in_progress_dir, e)),
        };

        let mut outcomes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io("list", &self.in_progress_dir, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file {
                outcomes.push(self.recover_one(&entry.path(), &name).await);
            }
        }
        Ok(outcomes)
    }

    async fn recover_one(&self, path: &Path, name: &str) -> RecoveryOutcome {
        let process_id = match extract_process_id(name) {
            Ok(id) => id,
            Err(e) => {
                warn!(file_name = %name, error = %e, "Untagged file in in-progress directory");
                return RecoveryOutcome::Skipped;
            }
        };

        let key = ClaimKey::inflight(name);
        match self.claims.try_claim(&key, &self.owner, self.claim_ttl).await {
            Ok(ClaimOutcome::Acquired) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => return RecoveryOutcome::Skipped,
            Err(e) => {
                debug!(file_name = %name, error = %e, "Recovery claim unavailable");
                return RecoveryOutcome::Skipped;
            }
        }

        let context = CorrelationContext::new(routes::IN_PROGRESS_RECOVERY)
            .with_process_id(process_id)
            .with_file_name(name);
        let outcome = with_correlation(&context, self.resume(path, name, process_id)).await;
        self.release_quietly(&key).await;

        outcome.unwrap_or_else(|e| {
            warn!(
                process_id = process_id.get(),
                file_name = %name,
                error = %e,
                "In-progress recovery failed, will retry on the next sweep"
            );
            RecoveryOutcome::Skipped
        })
    }

    async fn resume(
        &self,
        path: &Path,
        name: &str,
        process_id: ProcessId,
    ) -> PipelineResult<RecoveryOutcome> {
        // the owner deletes the file before releasing its claim
        if !fs::try_exists(path)
            .await
            .map_err(|e| PipelineError::io("stat", path, e))?
        {
            return Ok(RecoveryOutcome::Skipped);
        }

        let record = self.ledger.find_by_id(process_id).await?;
        let outcome = if record.status == ProcessStatus::Created {
            let envelope = Envelope::new(&record, name);
            self.messaging.send(&self.validator_queue, &envelope).await?;
            info!(
                process_id = process_id.get(),
                queue = %self.validator_queue,
                "♻️ Re-sent envelope recovered from in-progress file"
            );
            RecoveryOutcome::Resent(process_id)
        } else {
            debug!(status = %record.status, "Ledger already past CREATED, clearing leftover file");
            RecoveryOutcome::Cleared(process_id)
        };

        remove_if_present(path).await?;
        Ok(outcome)
    }
}

fn normalize(bytes: &[u8]) -> String {
    strip_line_breaks(&String::from_utf8_lossy(bytes))
}

async fn read_source(path: &Path) -> PipelineResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::io("read input", path, e)),
    }
}

async fn remove_if_present(path: &Path) -> PipelineResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io("remove", path, e)),
    }
}
