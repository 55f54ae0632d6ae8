use crate::selection::SelectionPolicy;
use crate::store::{DatabaseHolder, DatabaseLease, UpdateRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use url::Url;

/// Host-side state the update operations depend on.
#[async_trait]
pub trait UpdatesController: Send + Sync {
    /// Where the remote manifest is published.
    fn manifest_url(&self) -> &Url;

    /// The update currently running, if one has been launched.
    fn launched_update(&self) -> Option<UpdateRecord>;

    /// Exclusive access to the update store; dropping the lease releases it.
    async fn acquire_database(&self) -> DatabaseLease;

    /// Asset keys of the launched update mapped to their files on disk.
    fn local_assets(&self) -> BTreeMap<String, PathBuf>;
}

/// Controller backed by a [`DatabaseHolder`] and an updates directory.
pub struct AppController {
    manifest_url: Url,
    updates_directory: PathBuf,
    database: DatabaseHolder,
    launched: RwLock<Option<UpdateRecord>>,
}

impl AppController {
    pub fn new(
        manifest_url: Url,
        updates_directory: impl Into<PathBuf>,
        database: DatabaseHolder,
    ) -> Self {
        Self {
            manifest_url,
            updates_directory: updates_directory.into(),
            database,
            launched: RwLock::new(None),
        }
    }

    pub fn updates_directory(&self) -> &Path {
        &self.updates_directory
    }

    pub fn database(&self) -> &DatabaseHolder {
        &self.database
    }

    /// Pick the update to run from the store and record it as launched.
    pub async fn launch(&self, policy: &dyn SelectionPolicy) -> Option<UpdateRecord> {
        let updates = self.database.acquire().await.all_updates();
        let selected = policy.select_update_to_launch(&updates).cloned();
        match &selected {
            Some(update) => tracing::info!(id = %update.id, "launching stored update"),
            None => tracing::info!("no stored update to launch"),
        }
        self.set_launched_update(selected.clone());
        selected
    }

    /// Record which update the host is running.
    pub fn set_launched_update(&self, update: Option<UpdateRecord>) {
        *self.launched.write().unwrap_or_else(PoisonError::into_inner) = update;
    }
}

#[async_trait]
impl UpdatesController for AppController {
    fn manifest_url(&self) -> &Url {
        &self.manifest_url
    }

    fn launched_update(&self) -> Option<UpdateRecord> {
        self.launched
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn acquire_database(&self) -> DatabaseLease {
        self.database.acquire().await
    }

    fn local_assets(&self) -> BTreeMap<String, PathBuf> {
        let Some(launched) = self.launched_update() else {
            return BTreeMap::new();
        };
        launched
            .assets
            .iter()
            .filter_map(|asset| {
                let key = asset.key.clone()?;
                Some((key, self.updates_directory.join(&asset.relative_path)))
            })
            .collect()
    }
}
