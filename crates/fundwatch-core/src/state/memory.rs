// # Memory State Store
//
// Keeps campaign state in a process-local map. Clones share the map, so a
// clone handed to a new reconciler sees what an earlier one persisted.
//
// Nothing survives the process: the next run bootstraps fresh watermarks,
// skipping donations made while it was down, and milestones crossed before
// the restart are announced again.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::StatePaths;
use crate::Error;
use crate::config::StateStoreConfig;
use crate::traits::state_store::{StateStore, StateStoreFactory};

/// In-memory state store
///
/// ```rust,no_run
/// use fundwatch_core::state::MemoryStateStore;
/// use fundwatch_core::traits::StateStore;
///
/// # async fn demo() -> Result<(), fundwatch_core::Error> {
/// let store = MemoryStateStore::new();
/// store.set("campaigns/c1/donations/ids", serde_json::json!(["d1"])).await?;
/// assert_eq!(store.snapshot().await.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    values: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored path and value
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.read().await.clone()
    }

    /// Drop everything persisted for one campaign, returning how many
    /// paths were removed
    pub async fn forget_campaign(&self, paths: &StatePaths) -> usize {
        let prefix = format!("{}/", paths.root());
        let mut values = self.values.write().await;
        let before = values.len();
        values.retain(|path, _| !path.starts_with(&prefix));
        before - values.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        Ok(self.values.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        self.values.write().await.insert(path.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        self.values.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .values
            .read()
            .await
            .range(prefix.to_owned()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for the in-memory store
pub struct MemoryStateStoreFactory;

#[async_trait]
impl StateStoreFactory for MemoryStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::Memory => Ok(Box::new(MemoryStateStore::new())),
            _ => Err(Error::config("Invalid config for memory state store")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_collection_is_not_absence() {
        let store = MemoryStateStore::new();
        store.set("campaigns/c1/milestones", json!([])).await.unwrap();

        assert_eq!(store.get("campaigns/c1/milestones").await.unwrap(), Some(json!([])));
        assert_eq!(store.get("campaigns/c2/milestones").await.unwrap(), None);

        store.delete("campaigns/c1/milestones").await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state_and_list_is_prefix_scoped() {
        let store = MemoryStateStore::new();
        let clone = store.clone();
        clone.set("campaigns/c1/donations/ids", json!([])).await.unwrap();
        clone.set("campaigns/c1/milestones", json!([])).await.unwrap();
        clone.set("campaigns/c10/milestones", json!([])).await.unwrap();

        assert_eq!(
            store.list("campaigns/c1/").await.unwrap(),
            vec!["campaigns/c1/donations/ids", "campaigns/c1/milestones"]
        );
        assert_eq!(store.list("campaigns/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_forget_campaign_keeps_other_campaigns() {
        let store = MemoryStateStore::new();
        store.set("campaigns/c1/donations/ids", json!(["d1"])).await.unwrap();
        store.set("campaigns/c1/milestones", json!([])).await.unwrap();
        store.set("campaigns/c10/milestones", json!([])).await.unwrap();

        assert_eq!(store.forget_campaign(&StatePaths::new("c1")).await, 2);
        assert_eq!(
            store.snapshot().await.keys().collect::<Vec<_>>(),
            vec!["campaigns/c10/milestones"]
        );
    }
}
