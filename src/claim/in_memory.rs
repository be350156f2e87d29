use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{ClaimKey, ClaimOutcome, ClaimStore, COMPONENT};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
struct ClaimMarker {
    owner: String,
    expires_at: Instant,
}

/// Claim store over a `DashMap`. The entry API makes claim-if-absent atomic
/// per key, so concurrent claimers inside one process race safely.
#[derive(Debug)]
pub struct InMemoryClaimStore {
    markers: DashMap<String, ClaimMarker>,
    reachable: AtomicBool,
}

impl Default for InMemoryClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self {
            markers: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate a store outage. Markers survive the outage.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Live markers (for testing)
    pub fn live_claims(&self) -> usize {
        let now = Instant::now();
        self.markers.iter().filter(|m| m.expires_at > now).count()
    }

    fn check_reachable(&self) -> PipelineResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::infrastructure_unavailable(
                COMPONENT,
                "claim store is offline",
            ))
        }
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn try_claim(
        &self,
        key: &ClaimKey,
        owner: &str,
        ttl: Duration,
    ) -> PipelineResult<ClaimOutcome> {
        self.check_reachable()?;
        let now = Instant::now();
        let marker = ClaimMarker {
            owner: owner.to_string(),
            expires_at: now + ttl,
        };

        let outcome = match self.markers.entry(key.as_str().to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().expires_at <= now {
                    debug!(
                        key = %key,
                        previous_owner = %existing.get().owner,
                        "Taking over expired claim"
                    );
                    existing.insert(marker);
                    ClaimOutcome::Acquired
                } else {
                    ClaimOutcome::AlreadyClaimed
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(marker);
                ClaimOutcome::Acquired
            }
        };
        Ok(outcome)
    }

    async fn extend(&self, key: &ClaimKey, owner: &str, ttl: Duration) -> PipelineResult<bool> {
        self.check_reachable()?;
        match self.markers.get_mut(key.as_str()) {
            Some(mut marker) if marker.owner == owner => {
                marker.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &ClaimKey, owner: &str) -> PipelineResult<bool> {
        self.check_reachable()?;
        Ok(self
            .markers
            .remove_if(key.as_str(), |_, marker| marker.owner == owner)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn second_claim_is_rejected_while_live() {
        let store = InMemoryClaimStore::new();
        let key = ClaimKey::inflight("$$1$$a.xml");
        assert_eq!(store.try_claim(&key, "a", TTL).await.unwrap(), ClaimOutcome::Acquired);
        assert_eq!(
            store.try_claim(&key, "b", TTL).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        assert_eq!(
            store.try_claim(&key, "a", TTL).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[tokio::test]
    async fn expired_claim_can_be_taken_over() {
        let store = InMemoryClaimStore::new();
        let key = ClaimKey::inflight("$$1$$a.xml");
        store
            .try_claim(&key, "crashed", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            store.try_claim(&key, "survivor", TTL).await.unwrap(),
            ClaimOutcome::Acquired
        );
        assert!(!store.release(&key, "crashed").await.unwrap());
        assert!(store.release(&key, "survivor").await.unwrap());
    }

    #[tokio::test]
    async fn extend_only_for_owner() {
        let store = InMemoryClaimStore::new();
        let key = ClaimKey::inflight("$$2$$b.xml");
        store.try_claim(&key, "a", TTL).await.unwrap();
        assert!(store.extend(&key, "a", TTL).await.unwrap());
        assert!(!store.extend(&key, "b", TTL).await.unwrap());
        assert_eq!(store.live_claims(), 1);
    }

    #[tokio::test]
    async fn outage_is_infrastructure_unavailable() {
        let store = InMemoryClaimStore::new();
        store.set_reachable(false);
        let error = store
            .try_claim(&ClaimKey::inflight("x"), "a", TTL)
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::InfrastructureUnavailable { .. }));
    }

    #[tokio::test]
    async fn concurrent_claimers_yield_one_winner() {
        let store = Arc::new(InMemoryClaimStore::new());
        let key = ClaimKey::content_hash(b"<Document/>");
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move { store.try_claim(&key, &format!("i{i}"), TTL).await })
            })
            .collect();

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_acquired() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }
}
