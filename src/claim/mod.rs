//! # Idempotent Claim Store
//!
//! At-most-one-claim-per-key markers shared by every cooperating instance.
//! A marker carries an owner and an expiry; an expired marker can be taken
//! over, so a crashed owner releases its files once the read-lock timeout
//! lapses.
//!
//! Claiming an input file combines two signals: [`ChangedReadLock`] decides
//! whether the file has stopped changing, and [`ClaimStore::try_claim`]
//! decides whether another instance already owns it.

pub mod in_memory;
pub mod postgres;
pub mod read_lock;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::claims::{INFLIGHT_PREFIX, INGEST_PREFIX};
use crate::error::PipelineResult;

pub use in_memory::InMemoryClaimStore;
pub use postgres::PgClaimStore;
pub use read_lock::{ChangedReadLock, ReadLockState};

pub(crate) const COMPONENT: &str = "claim store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Acquired,
    AlreadyClaimed,
}

impl ClaimOutcome {
    pub fn is_acquired(self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// How an input file's identity is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKeyStrategy {
    /// path, size and modification time
    #[default]
    Fingerprint,
    /// file bytes
    ContentHash,
}

/// Namespaced claim key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimKey(String);

impl ClaimKey {
    /// Key for an input file identified by path, size and mtime
    pub fn fingerprint(path: &Path, size: u64, modified: SystemTime) -> Self {
        let mtime_nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(size.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(mtime_nanos.to_string().as_bytes());
        Self(format!("{INGEST_PREFIX}{:x}", hasher.finalize()))
    }

    /// Key for an input file identified by its content
    pub fn content_hash(contents: &[u8]) -> Self {
        Self(format!("{INGEST_PREFIX}{:x}", Sha256::digest(contents)))
    }

    /// Key guarding a tagged file parked in the in-progress directory
    pub fn inflight(tagged_name: &str) -> Self {
        Self(format!("{INFLIGHT_PREFIX}{tagged_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait ClaimStore: Send + Sync + 'static {
    /// Claim `key` for `owner` unless a live marker already exists.
    ///
    /// An unreachable store yields `InfrastructureUnavailable`, never
    /// `AlreadyClaimed`.
    async fn try_claim(
        &self,
        key: &ClaimKey,
        owner: &str,
        ttl: Duration,
    ) -> PipelineResult<ClaimOutcome>;

    /// Push the expiry of a marker held by `owner` out to `ttl` from now
    async fn extend(&self, key: &ClaimKey, owner: &str, ttl: Duration) -> PipelineResult<bool>;

    /// Delete a marker held by `owner`
    async fn release(&self, key: &ClaimKey, owner: &str) -> PipelineResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_size_and_mtime() {
        let path = Path::new("/tmp/input/a.xml");
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let base = ClaimKey::fingerprint(path, 10, t0);
        assert_eq!(base, ClaimKey::fingerprint(path, 10, t0));
        assert_ne!(base, ClaimKey::fingerprint(path, 11, t0));
        assert_ne!(base, ClaimKey::fingerprint(path, 10, t0 + Duration::from_nanos(1)));
        assert!(base.as_str().starts_with("ingest:"));
    }

    #[test]
    fn content_hash_ignores_location() {
        let key = ClaimKey::content_hash(b"<Document/>");
        assert_eq!(key, ClaimKey::content_hash(b"<Document/>"));
        assert_eq!(key.as_str().len(), "ingest:".len() + 64);
    }

    #[test]
    fn inflight_keys_embed_the_tagged_name() {
        assert_eq!(
            ClaimKey::inflight("$$4$$a.xml").as_str(),
            "inflight:$$4$$a.xml"
        );
    }
}
