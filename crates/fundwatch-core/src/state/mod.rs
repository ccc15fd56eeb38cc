// # State Store Implementations
//
// This module provides implementations of the StateStore trait, the
// per-campaign path layout, and typed JSON helpers on top of the raw store.

pub mod file;
pub mod memory;

pub use file::{FileStateStore, FileStateStoreFactory};
pub use memory::{MemoryStateStore, MemoryStateStoreFactory};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::traits::StateStore;

/// Paths of the values persisted for one campaign
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: String,
}

impl StatePaths {
    pub fn new(campaign_id: &str) -> Self {
        Self {
            root: format!("campaigns/{}", campaign_id),
        }
    }

    /// Prefix shared by every path of the campaign
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn donation_ids(&self) -> String {
        format!("{}/donations/ids", self.root)
    }

    pub fn last_donation_date(&self) -> String {
        format!("{}/donations/last_date", self.root)
    }

    pub fn milestones(&self) -> String {
        format!("{}/milestones", self.root)
    }

    pub fn donation_matches(&self) -> String {
        format!("{}/donation_matches/records", self.root)
    }

    pub fn last_donation_match_update(&self) -> String {
        format!("{}/donation_matches/last_update", self.root)
    }
}

/// Load and deserialize the value at `path`
///
/// Returns `Ok(None)` when nothing was stored there. A stored value that no
/// longer deserializes is a state store error, not absence.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    path: &str,
) -> Result<Option<T>, Error> {
    match store.get(path).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::state_store(format!("Malformed value at {}: {}", path, e))),
        None => Ok(None),
    }
}

/// Serialize and store `value` at `path`
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    path: &str,
    value: &T,
) -> Result<(), Error> {
    let value = serde_json::to_value(value)?;
    store.set(path, value).await
}
