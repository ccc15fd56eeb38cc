// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validated on load
// - Automatic backup: `.backup` keeps the last known good state
// - Recovery: falls back to the backup when the main file is corrupted
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": {
//     "campaigns/c1/donations/ids": ["d1", "d2"],
//     "campaigns/c1/donations/last_date": "2025-01-09T12:00:00Z"
//   }
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::Error;
use crate::config::StateStoreConfig;
use crate::traits::state_store::{StateStore, StateStoreFactory};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// On-disk document
#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: String,
    #[serde(default)]
    entries: BTreeMap<String, Value>,
}

/// File-based state store with crash recovery
///
/// The whole store is one JSON document shared by all campaigns. Every
/// mutation rewrites it before returning, so `flush` only has work to do
/// after a failed write.
///
/// # Example
///
/// ```rust,no_run
/// use fundwatch_core::state::FileStateStore;
/// use fundwatch_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/fundwatch/state.json").await?;
///     store.set("campaigns/c1/donations/ids", serde_json::json!(["d1"])).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
    /// Set while the in-memory entries are ahead of the file
    dirty: AtomicBool,
    /// Serializes writers so renames never interleave
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Open the state file at `path`, creating parent directories as needed
    ///
    /// A corrupted file is replaced by its `.backup`; when both are
    /// unusable the store starts empty.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the directory cannot be created, `Error::StateStore`
    /// when an existing file cannot be read.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let entries = match read_document(&path).await {
            Ok(entries) => {
                debug!("Loaded {} state entries from {}", entries.len(), path.display());
                entries
            }
            Err(Error::Json(e)) => {
                warn!("State file {} is corrupted: {}", path.display(), e);
                recover_from_backup(&path).await
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    /// Write the current entries to disk
    ///
    /// The previous file is kept as `.backup`, the new one is written to a
    /// temp file and renamed over it.
    async fn persist(&self) -> Result<(), Error> {
        let _writer = self.write_lock.lock().await;

        let json = {
            let entries = self.entries.read().await;
            serde_json::to_vec_pretty(&StateDocument {
                version: STATE_FILE_VERSION.to_string(),
                entries: entries.clone(),
            })
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?
        };

        let temp = sibling(&self.path, "tmp");
        write_file(&temp, &json).await?;

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, sibling(&self.path, "backup")).await
        {
            warn!("Failed to back up state file: {}", e);
        }

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, e))?;

        self.dirty.store(false, Ordering::Release);
        trace!("State written to {}", self.path.display());
        Ok(())
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<(), Error> {
        self.persist().await
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::state_store(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// Read a state document; a missing file is an empty store
async fn read_document(path: &Path) -> Result<BTreeMap<String, Value>, Error> {
    if !path.exists() {
        debug!("State file {} does not exist yet", path.display());
        return Ok(BTreeMap::new());
    }

    let content = fs::read(path).await.map_err(|e| io_error("read", path, e))?;
    let document: StateDocument = serde_json::from_slice(&content)?;

    if document.version != STATE_FILE_VERSION {
        warn!(
            "State file version {} differs from {}, loading anyway",
            document.version, STATE_FILE_VERSION
        );
    }
    Ok(document.entries)
}

async fn recover_from_backup(path: &Path) -> BTreeMap<String, Value> {
    let backup = sibling(path, "backup");
    if !backup.exists() {
        warn!("No state backup found, starting empty");
        return BTreeMap::new();
    }

    match read_document(&backup).await {
        Ok(entries) => {
            info!("Recovered {} state entries from {}", entries.len(), backup.display());
            if let Err(e) = fs::copy(&backup, path).await {
                error!("Failed to restore state file from backup: {}", e);
            }
            entries
        }
        Err(e) => {
            error!("State backup is unusable too ({}), starting empty", e);
            BTreeMap::new()
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| io_error("create", path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| io_error("write", path, e))?;
    file.sync_all().await.map_err(|e| io_error("sync", path, e))
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        self.entries.write().await.insert(path.to_string(), value);
        self.dirty.store(true, Ordering::Release);
        self.persist().await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        if self.entries.write().await.remove(path).is_none() {
            return Ok(());
        }
        self.dirty.store(true, Ordering::Release);
        self.persist().await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        if self.dirty.load(Ordering::Acquire) {
            self.persist().await
        } else {
            Ok(())
        }
    }
}

/// Factory for the file-backed store
pub struct FileStateStoreFactory;

#[async_trait]
impl StateStoreFactory for FileStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::File { path } => Ok(Box::new(FileStateStore::new(path).await?)),
            _ => Err(Error::config("Invalid config for file state store")),
        }
    }
}
