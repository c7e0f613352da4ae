//! §4.3 Work Coordinator: a lease-based queue of shard-sized
//! [`WorkItem`]s, backed by an external CAS-capable key-value store. Both
//! the in-memory store and the HTTP/index-backed store implement the
//! same [`CoordinatorStore`] trait, so acquisition, lease renewal,
//! completion and splitting are written once here rather than twice
//! (§9's "unified coordinator model" Open Question resolution: no
//! separate console/HTTP split path).

pub mod http;
pub mod memory;

pub use http::HttpCoordinatorStore;
pub use memory::InMemoryCoordinatorStore;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::model::{WorkItem, WorkItemState};

/// An opaque CAS version token for a stored work-item body. Stores are
/// free to use whatever native versioning they have (an `_seq_no`, an
/// ETag, a row version) as long as equality implies "no writer has
/// updated this key since the version was read."
pub type CasVersion = u64;

/// The abstract KV store interface §4.3 specifies: `createIfAbsent`,
/// `casUpdate`, `read`, `queryUnassigned`. A fifth method, `all_ids`,
/// is added so the coordinator can distinguish "no candidate is free
/// right now" (retryable) from "every item is done" (terminal) without
/// the store leaking its own schema into `Coordinator`.
#[async_trait]
pub trait CoordinatorStore: Send + Sync {
    async fn create_if_absent(&self, id: &str, body: WorkItem) -> Result<bool>;
    async fn cas_update(&self, id: &str, expected_version: CasVersion, new_body: WorkItem) -> Result<bool>;
    async fn read(&self, id: &str) -> Result<Option<(WorkItem, CasVersion)>>;
    async fn query_unassigned(&self, now_millis: i64, limit: usize) -> Result<Vec<String>>;
    async fn all_ids(&self) -> Result<Vec<String>>;
}

/// Outcome of [`Coordinator::acquire`]. `NoWorkReadyNow` means some
/// items remain but none are currently claimable (all leased by others)
/// - the caller should sleep briefly and retry. `NoMoreWork` means every
/// known item has reached `Completed` or `Split`.
pub enum AcquireOutcome {
    Acquired { item: WorkItem, version: CasVersion },
    NoWorkReadyNow,
    NoMoreWork,
}

/// Lease and exponential-backoff tuning for one coordinator instance
/// (§4.3 "Lease semantics").
#[derive(Clone, Copy, Debug)]
pub struct LeaseConfig {
    pub base_lease_millis: i64,
    pub max_acquisition_exponent: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { base_lease_millis: 30_000, max_acquisition_exponent: 6 }
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Generic coordinator logic over any [`CoordinatorStore`] implementation.
pub struct Coordinator<S: CoordinatorStore> {
    store: S,
    lease: LeaseConfig,
}

impl<S: CoordinatorStore> Coordinator<S> {
    pub fn new(store: S, lease: LeaseConfig) -> Self {
        Self { store, lease }
    }

    pub fn seed_unassigned(&self, index_name: &str, shard_number: u32) -> WorkItem {
        WorkItem::unassigned(index_name, shard_number)
    }

    /// §4.3 acquisition protocol: pick a claimable candidate, CAS it to
    /// `Leased`, retry against another candidate on CAS loss.
    #[instrument(skip(self, worker_id))]
    pub async fn acquire(&self, worker_id: &str) -> Result<AcquireOutcome> {
        let now = now_millis();
        let candidates = self.store.query_unassigned(now, 32).await?;
        if candidates.is_empty() {
            return Ok(if self.all_done().await? {
                AcquireOutcome::NoMoreWork
            } else {
                AcquireOutcome::NoWorkReadyNow
            });
        }

        for id in candidates {
            let Some((mut item, version)) = self.store.read(&id).await? else {
                continue;
            };
            let claimable = match item.state {
                WorkItemState::Unassigned => true,
                WorkItemState::Leased => item.lease_expiry.map(|exp| exp < now).unwrap_or(false),
                WorkItemState::Completed | WorkItemState::Split => false,
            };
            if !claimable {
                continue;
            }

            let exponent = item.acquisition_exponent;
            let lease_span = self.lease_span(exponent);
            item.state = WorkItemState::Leased;
            item.owner = Some(worker_id.to_string());
            item.lease_expiry = Some(now + lease_span);
            item.acquisition_exponent = exponent.saturating_add(1);

            if self.store.cas_update(&id, version, item.clone()).await? {
                return Ok(AcquireOutcome::Acquired { item, version: version + 1 });
            }
            // Lost the race to another worker; try the next candidate.
        }

        Ok(AcquireOutcome::NoWorkReadyNow)
    }

    fn lease_span(&self, exponent: u32) -> i64 {
        let capped = exponent.min(self.lease.max_acquisition_exponent);
        self.lease.base_lease_millis.saturating_mul(1i64 << capped)
    }

    async fn all_done(&self) -> Result<bool> {
        for id in self.store.all_ids().await? {
            if let Some((item, _)) = self.store.read(&id).await? {
                if !matches!(item.state, WorkItemState::Completed | WorkItemState::Split) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Renews `id`'s lease in place. Returns `Ok(false)` when the CAS is
    /// lost - the caller must treat the lease as gone and abort without
    /// publishing further progress (§4.3 "Lease semantics").
    #[instrument(skip(self))]
    pub async fn renew_lease(
        &self,
        id: &str,
        version: CasVersion,
        mut item: WorkItem,
    ) -> Result<Option<CasVersion>> {
        let now = now_millis();
        item.lease_expiry = Some(now + self.lease_span(item.acquisition_exponent.saturating_sub(1)));
        if self.store.cas_update(id, version, item).await? {
            Ok(Some(version + 1))
        } else {
            warn!(work_item = id, "lease renewal lost the CAS race");
            Ok(None)
        }
    }

    /// Publishes a progress checkpoint, conditional on still holding the
    /// lease. This is just `cas_update` with the checkpoint field set -
    /// a lost CAS here means the caller's lease is already gone.
    pub async fn publish_checkpoint(
        &self,
        id: &str,
        version: CasVersion,
        mut item: WorkItem,
        checkpoint: crate::model::CheckpointCursor,
    ) -> Result<Option<CasVersion>> {
        item.progress_checkpoint = Some(checkpoint);
        if self.store.cas_update(id, version, item).await? {
            Ok(Some(version + 1))
        } else {
            Ok(None)
        }
    }

    /// §4.3 `complete`: only succeeds while `worker_id` still owns the
    /// lease, otherwise `LeaseHeldElsewhere`.
    #[instrument(skip(self))]
    pub async fn complete(&self, id: &str, worker_id: &str, version: CasVersion, mut item: WorkItem) -> Result<()> {
        if item.owner.as_deref() != Some(worker_id) {
            return Err(Error::LeaseHeldElsewhere(id.to_string()));
        }
        item.state = WorkItemState::Completed;
        if self.store.cas_update(id, version, item).await? {
            Ok(())
        } else {
            Err(Error::LeaseHeldElsewhere(id.to_string()))
        }
    }

    /// §4.3 `completeWithSuccessors`: atomically (from the caller's
    /// perspective) completes `id` as `Split` and creates each successor
    /// `Unassigned` at `successor_exponent`. Successor creation is
    /// idempotent - an already-existing successor is left untouched.
    #[instrument(skip(self, successor_ids))]
    pub async fn complete_with_successors(
        &self,
        id: &str,
        worker_id: &str,
        version: CasVersion,
        mut item: WorkItem,
        successor_ids: &[String],
        successor_exponent: u32,
    ) -> Result<()> {
        if item.owner.as_deref() != Some(worker_id) {
            return Err(Error::LeaseHeldElsewhere(id.to_string()));
        }
        for successor_id in successor_ids {
            let mut successor = WorkItem::unassigned(&item.index_name, item.shard_number);
            successor.id = successor_id.clone();
            successor.acquisition_exponent = successor_exponent;
            self.store.create_if_absent(successor_id, successor).await?;
        }
        item.state = WorkItemState::Split;
        if self.store.cas_update(id, version, item).await? {
            Ok(())
        } else {
            Err(Error::LeaseHeldElsewhere(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Coordinator<InMemoryCoordinatorStore> {
        Coordinator::new(InMemoryCoordinatorStore::new(), LeaseConfig::default())
    }

    #[tokio::test]
    async fn acquires_unassigned_item_and_sets_lease() {
        let c = coordinator();
        let item = WorkItem::unassigned("idx_a", 0);
        c.store.create_if_absent(&item.id, item.clone()).await.unwrap();

        match c.acquire("worker-1").await.unwrap() {
            AcquireOutcome::Acquired { item, .. } => {
                assert_eq!(item.owner.as_deref(), Some("worker-1"));
                assert!(item.lease_expiry.is_some());
            }
            _ => panic!("expected Acquired"),
        }
    }

    #[tokio::test]
    async fn expired_lease_is_reacquirable_by_another_worker() {
        let c = coordinator();
        let mut item = WorkItem::unassigned("idx_a", 0);
        item.state = WorkItemState::Leased;
        item.owner = Some("dead-worker".into());
        item.lease_expiry = Some(now_millis() - 1000);
        c.store.create_if_absent(&item.id, item.clone()).await.unwrap();

        match c.acquire("worker-2").await.unwrap() {
            AcquireOutcome::Acquired { item, .. } => assert_eq!(item.owner.as_deref(), Some("worker-2")),
            _ => panic!("expected Acquired"),
        }
    }

    #[tokio::test]
    async fn no_work_ready_now_when_all_leased_and_unexpired() {
        let c = coordinator();
        let mut item = WorkItem::unassigned("idx_a", 0);
        item.state = WorkItemState::Leased;
        item.owner = Some("worker-1".into());
        item.lease_expiry = Some(now_millis() + 60_000);
        c.store.create_if_absent(&item.id, item).await.unwrap();

        assert!(matches!(c.acquire("worker-2").await.unwrap(), AcquireOutcome::NoWorkReadyNow));
    }

    #[tokio::test]
    async fn no_more_work_when_everything_completed() {
        let c = coordinator();
        let mut item = WorkItem::unassigned("idx_a", 0);
        item.state = WorkItemState::Completed;
        c.store.create_if_absent(&item.id, item).await.unwrap();

        assert!(matches!(c.acquire("worker-2").await.unwrap(), AcquireOutcome::NoMoreWork));
    }

    #[tokio::test]
    async fn complete_fails_when_lease_held_elsewhere() {
        let c = coordinator();
        let id = WorkItem::new_id("idx_a", 0);
        let mut item = WorkItem::unassigned("idx_a", 0);
        item.state = WorkItemState::Leased;
        item.owner = Some("worker-1".into());
        c.store.create_if_absent(&id, item.clone()).await.unwrap();
        let (_, version) = c.store.read(&id).await.unwrap().unwrap();

        let result = c.complete(&id, "worker-2", version, item).await;
        assert!(matches!(result, Err(Error::LeaseHeldElsewhere(_))));
    }

    #[tokio::test]
    async fn complete_with_successors_creates_unassigned_successors() {
        let c = coordinator();
        let id = WorkItem::new_id("idx_a", 0);
        let mut item = WorkItem::unassigned("idx_a", 0);
        item.state = WorkItemState::Leased;
        item.owner = Some("worker-1".into());
        c.store.create_if_absent(&id, item.clone()).await.unwrap();
        let (_, version) = c.store.read(&id).await.unwrap().unwrap();

        let successors = vec![item.successor_id(1), item.successor_id(2)];
        c.complete_with_successors(&id, "worker-1", version, item, &successors, 0)
            .await
            .unwrap();

        for successor_id in &successors {
            let (successor, _) = c.store.read(successor_id).await.unwrap().unwrap();
            assert_eq!(successor.state, WorkItemState::Unassigned);
        }
        let (original, _) = c.store.read(&id).await.unwrap().unwrap();
        assert_eq!(original.state, WorkItemState::Split);
    }
}
