//! In-process [`CoordinatorStore`] over a `Mutex<HashMap<...>>`, used for
//! single-node runs and as the coordinator's own test double (mirrors the
//! teacher's `Mutex`-guarded in-memory index build).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CasVersion, CoordinatorStore};
use crate::error::Result;
use crate::model::WorkItem;

#[derive(Default)]
pub struct InMemoryCoordinatorStore {
    items: Mutex<HashMap<String, (WorkItem, CasVersion)>>,
}

impl InMemoryCoordinatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinatorStore for InMemoryCoordinatorStore {
    async fn create_if_absent(&self, id: &str, body: WorkItem) -> Result<bool> {
        let mut items = self.items.lock().expect("coordinator store poisoned");
        if items.contains_key(id) {
            return Ok(false);
        }
        items.insert(id.to_string(), (body, 0));
        Ok(true)
    }

    async fn cas_update(&self, id: &str, expected_version: CasVersion, new_body: WorkItem) -> Result<bool> {
        let mut items = self.items.lock().expect("coordinator store poisoned");
        match items.get_mut(id) {
            Some((body, version)) if *version == expected_version => {
                *body = new_body;
                *version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read(&self, id: &str) -> Result<Option<(WorkItem, CasVersion)>> {
        Ok(self.items.lock().expect("coordinator store poisoned").get(id).cloned())
    }

    async fn query_unassigned(&self, now_millis: i64, limit: usize) -> Result<Vec<String>> {
        let items = self.items.lock().expect("coordinator store poisoned");
        let mut candidates: Vec<String> = items
            .iter()
            .filter(|(_, (item, _))| match item.state {
                crate::model::WorkItemState::Unassigned => true,
                crate::model::WorkItemState::Leased => {
                    item.lease_expiry.map(|exp| exp < now_millis).unwrap_or(false)
                }
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        candidates.sort();
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        Ok(self.items.lock().expect("coordinator store poisoned").keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let store = InMemoryCoordinatorStore::new();
        let item = WorkItem::unassigned("idx", 0);
        assert!(store.create_if_absent(&item.id, item.clone()).await.unwrap());
        assert!(!store.create_if_absent(&item.id, item).await.unwrap());
    }

    #[tokio::test]
    async fn cas_update_rejects_stale_version() {
        let store = InMemoryCoordinatorStore::new();
        let item = WorkItem::unassigned("idx", 0);
        store.create_if_absent(&item.id, item.clone()).await.unwrap();
        assert!(store.cas_update(&item.id, 5, item.clone()).await.unwrap() == false);
        assert!(store.cas_update(&item.id, 0, item).await.unwrap());
    }
}
