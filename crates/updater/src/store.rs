use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const STORE_FILE_NAME: &str = "updates.json";

/// Lifecycle of a stored update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Record created, assets still downloading.
    Pending,
    /// Every asset is on disk; the update can be launched.
    Ready,
}

/// Downloaded file belonging to an update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetRecord {
    pub key: Option<String>,
    pub url: String,
    /// File name relative to the updates directory.
    pub relative_path: String,
    pub sha256: String,
    pub is_launch_asset: bool,
}

/// Metadata of an update known to the store, including the launched one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRecord {
    pub id: Uuid,
    pub commit_time: DateTime<Utc>,
    pub runtime_version: String,
    pub status: UpdateStatus,
    /// Raw manifest body the update was created from.
    pub metadata: Value,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
}

impl UpdateRecord {
    pub fn is_ready(&self) -> bool {
        self.status == UpdateStatus::Ready
    }
}

/// Persistent catalogue of downloaded updates.
pub trait UpdateStore: Send {
    /// The update with `id`, if stored.
    fn update(&self, id: Uuid) -> Option<UpdateRecord>;

    /// Every stored update, in no particular order.
    fn all_updates(&self) -> Vec<UpdateRecord>;

    /// Add a new update; fails if one with the same id exists.
    fn insert_update(&mut self, update: UpdateRecord) -> Result<(), StoreError>;

    /// Attach `asset` to update `id`, replacing any asset with the same URL.
    fn insert_asset(&mut self, id: Uuid, asset: AssetRecord) -> Result<(), StoreError>;

    /// Mark update `id` launchable and return its final record.
    fn mark_ready(&mut self, id: Uuid) -> Result<UpdateRecord, StoreError>;
}

/// Store that lives only as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryUpdateStore {
    updates: BTreeMap<Uuid, UpdateRecord>,
}

impl MemoryUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, id: Uuid) -> Result<&mut UpdateRecord, StoreError> {
        self.updates.get_mut(&id).ok_or(StoreError::UnknownUpdate(id))
    }
}

impl UpdateStore for MemoryUpdateStore {
    fn update(&self, id: Uuid) -> Option<UpdateRecord> {
        self.updates.get(&id).cloned()
    }

    fn all_updates(&self) -> Vec<UpdateRecord> {
        self.updates.values().cloned().collect()
    }

    fn insert_update(&mut self, update: UpdateRecord) -> Result<(), StoreError> {
        if self.updates.contains_key(&update.id) {
            return Err(StoreError::DuplicateUpdate(update.id));
        }
        self.updates.insert(update.id, update);
        Ok(())
    }

    fn insert_asset(&mut self, id: Uuid, asset: AssetRecord) -> Result<(), StoreError> {
        let update = self.entry(id)?;
        update.assets.retain(|existing| existing.url != asset.url);
        update.assets.push(asset);
        Ok(())
    }

    fn mark_ready(&mut self, id: Uuid) -> Result<UpdateRecord, StoreError> {
        let update = self.entry(id)?;
        update.status = UpdateStatus::Ready;
        Ok(update.clone())
    }
}

/// Store persisted as a single JSON document inside the updates directory.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryUpdateStore,
}

impl JsonFileStore {
    /// Open (or create) the store kept in `directory`.
    pub fn open(directory: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(directory)?;
        let path = directory.join(STORE_FILE_NAME);
        let updates: Vec<UpdateRecord> = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let inner = MemoryUpdateStore {
            updates: updates.into_iter().map(|u| (u.id, u)).collect(),
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| std::io::Error::other("store path has no parent directory"))?;
        let bytes = serde_json::to_vec_pretty(&self.inner.all_updates())?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl UpdateStore for JsonFileStore {
    fn update(&self, id: Uuid) -> Option<UpdateRecord> {
        self.inner.update(id)
    }

    fn all_updates(&self) -> Vec<UpdateRecord> {
        self.inner.all_updates()
    }

    fn insert_update(&mut self, update: UpdateRecord) -> Result<(), StoreError> {
        self.inner.insert_update(update)?;
        self.flush()
    }

    fn insert_asset(&mut self, id: Uuid, asset: AssetRecord) -> Result<(), StoreError> {
        self.inner.insert_asset(id, asset)?;
        self.flush()
    }

    fn mark_ready(&mut self, id: Uuid) -> Result<UpdateRecord, StoreError> {
        let update = self.inner.mark_ready(id)?;
        self.flush()?;
        Ok(update)
    }
}

/// Shared handle to the single update store of a process.
#[derive(Clone)]
pub struct DatabaseHolder {
    store: Arc<Mutex<Box<dyn UpdateStore>>>,
}

impl DatabaseHolder {
    pub fn new(store: impl UpdateStore + 'static) -> Self {
        let store: Box<dyn UpdateStore> = Box::new(store);
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Wait for exclusive access to the store.
    pub async fn acquire(&self) -> DatabaseLease {
        let guard = self.store.clone().lock_owned().await;
        tracing::debug!("acquired update database");
        DatabaseLease { guard }
    }

    /// Exclusive access if nobody else holds the store right now.
    pub fn try_acquire(&self) -> Option<DatabaseLease> {
        let guard = self.store.clone().try_lock_owned().ok()?;
        Some(DatabaseLease { guard })
    }

    /// Whether a lease is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.store.try_lock().is_err()
    }
}

/// Exclusive access to the update store, released when dropped.
pub struct DatabaseLease {
    guard: OwnedMutexGuard<Box<dyn UpdateStore>>,
}

impl Deref for DatabaseLease {
    type Target = dyn UpdateStore;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for DatabaseLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for DatabaseLease {
    fn drop(&mut self) {
        tracing::debug!("released update database");
    }
}
