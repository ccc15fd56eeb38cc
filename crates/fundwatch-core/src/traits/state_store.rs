// # State Store Trait
//
// Defines the interface for persistent state management.
//
// ## Purpose
//
// The state store lets a poller resume after a restart without re-emitting
// events. It tracks, per campaign:
// - Processed donation ids and the donation watermark
// - Milestones and their sticky `reached` flags
// - Donation matches and the match watermark
//
// ## Paths
//
// Values are JSON documents addressed by hierarchical paths such as
// `campaigns/<id>/donations/ids`. See [`StatePaths`](crate::state::StatePaths).
//
// ## Usage
//
// ```rust,ignore
// use fundwatch_core::state::{load_json, save_json};
//
// let ids: Option<Vec<String>> = load_json(&*store, "campaigns/c1/donations/ids").await?;
// save_json(&*store, "campaigns/c1/donations/ids", &vec!["d1"]).await?;
// ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks; the
/// pollers of different campaigns share one store.
///
/// # Absence
///
/// `get` returns `Ok(None)` for a path that was never written, which is
/// distinct from an empty collection stored at that path.
///
/// # Trust Level: Trusted (Core Component)
///
/// - ✅ Perform I/O for persistent storage
/// - ✅ Cache state in memory (with explicit flush)
/// - ❌ Implement reconciliation logic (owned by `CampaignReconciler`)
/// - ❌ Spawn background tasks
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the value stored at `path`
    async fn get(&self, path: &str) -> Result<Option<Value>, crate::Error>;

    /// Write `value` at `path`, overwriting any previous value
    async fn set(&self, path: &str, value: Value) -> Result<(), crate::Error>;

    /// Remove the value at `path` (no-op when absent)
    async fn delete(&self, path: &str) -> Result<(), crate::Error>;

    /// List the stored paths starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    /// Create a StateStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::StateStoreConfig,
    ) -> Result<Box<dyn StateStore>, crate::Error>;
}

/// Store wrapper that rejects writes once its poller has been stopped
///
/// Reads still pass through. A tick that outlives `stop()` fails on its next
/// write, so nothing it processed after the stop is recorded.
pub(crate) struct GatedStateStore {
    inner: Arc<dyn StateStore>,
    campaign_id: String,
    token: CancellationToken,
}

impl GatedStateStore {
    pub(crate) fn new(inner: Arc<dyn StateStore>, campaign_id: &str, token: CancellationToken) -> Self {
        Self {
            inner,
            campaign_id: campaign_id.to_string(),
            token,
        }
    }

    fn check_open(&self, path: &str) -> Result<(), crate::Error> {
        if self.token.is_cancelled() {
            debug!("Poller for {} stopped, not writing {}", self.campaign_id, path);
            return Err(crate::Error::cancelled(&self.campaign_id));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for GatedStateStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, crate::Error> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), crate::Error> {
        self.check_open(path)?;
        self.inner.set(path, value).await
    }

    async fn delete(&self, path: &str) -> Result<(), crate::Error> {
        self.check_open(path)?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, crate::Error> {
        self.inner.list(prefix).await
    }

    async fn flush(&self) -> Result<(), crate::Error> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_gated_store_rejects_writes_after_cancel() {
        let store = MemoryStateStore::new();
        let token = CancellationToken::new();
        let gated = GatedStateStore::new(Arc::new(store.clone()), "c1", token.clone());

        gated.set("campaigns/c1/milestones", json!([])).await.unwrap();
        token.cancel();

        assert!(matches!(
            gated.set("campaigns/c1/donations/ids", json!(["d1"])).await,
            Err(crate::Error::Cancelled(_))
        ));
        assert!(matches!(
            gated.delete("campaigns/c1/milestones").await,
            Err(crate::Error::Cancelled(_))
        ));
        assert_eq!(
            gated.get("campaigns/c1/milestones").await.unwrap(),
            Some(json!([]))
        );
        assert_eq!(store.get("campaigns/c1/donations/ids").await.unwrap(), None);
    }
}
