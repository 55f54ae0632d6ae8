use crate::controller::UpdatesController;
use crate::downloader::ManifestDownloader;
use crate::error::{Operation, Result, UpdatesError};
use crate::loader::RemoteLoader;
use crate::manifest::Manifest;
use crate::selection::{should_adopt, SelectionPolicy};
use crate::store::UpdateRecord;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of checking the remote manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Nothing is launched yet, so the verified manifest is offered as is.
    NoLaunchedUpdate(Manifest),
    /// The selection policy prefers the remote manifest over the launched update.
    NewerAvailable(Manifest),
    /// The launched update is at least as good as the remote one.
    NoNewerUpdate,
}

impl CheckOutcome {
    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            CheckOutcome::NoLaunchedUpdate(manifest) | CheckOutcome::NewerAvailable(manifest) => {
                Some(manifest)
            }
            CheckOutcome::NoNewerUpdate => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.manifest().is_some()
    }

    /// JSON shape handed to application code.
    pub fn to_json(&self) -> Value {
        match self.manifest() {
            Some(manifest) => json!({ "isAvailable": true, "manifest": manifest.raw() }),
            None => json!({ "isAvailable": false }),
        }
    }
}

/// Result of fetching the remote update.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The update was downloaded and stored.
    Fetched(UpdateRecord),
    /// The remote update was not selected; nothing was stored.
    NoNewerUpdate,
}

impl FetchOutcome {
    pub fn update(&self) -> Option<&UpdateRecord> {
        match self {
            FetchOutcome::Fetched(update) => Some(update),
            FetchOutcome::NoNewerUpdate => None,
        }
    }

    /// JSON shape handed to application code.
    pub fn to_json(&self) -> Value {
        match self.update() {
            Some(update) => json!({ "isNew": true, "manifest": update.metadata }),
            None => json!({ "isNew": false }),
        }
    }
}

/// Sequences download, verification and selection for the check and fetch operations.
pub struct UpdateOrchestrator {
    controller: Option<Arc<dyn UpdatesController>>,
    downloader: Arc<dyn ManifestDownloader>,
    loader: Arc<dyn RemoteLoader>,
    policy: Arc<dyn SelectionPolicy>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator with no controller; operations fail until one is set.
    pub fn new(
        downloader: Arc<dyn ManifestDownloader>,
        loader: Arc<dyn RemoteLoader>,
        policy: Arc<dyn SelectionPolicy>,
    ) -> Self {
        Self {
            controller: None,
            downloader,
            loader,
            policy,
        }
    }

    pub fn with_controller(mut self, controller: Arc<dyn UpdatesController>) -> Self {
        self.controller = Some(controller);
        self
    }

    fn controller(&self, operation: Operation) -> Result<&Arc<dyn UpdatesController>> {
        self.controller
            .as_ref()
            .ok_or(UpdatesError::Uninitialized { operation })
    }

    /// Download and verify the remote manifest and compare it with the launched update.
    pub async fn check_for_update(&self) -> Result<CheckOutcome> {
        let controller = self.controller(Operation::Check)?;

        let manifest = self
            .downloader
            .download_manifest(controller.manifest_url())
            .await
            .map_err(|cause| {
                tracing::error!("update check failed: {}", cause);
                UpdatesError::Check {
                    message: cause.message.clone(),
                    cause,
                }
            })?;

        let launched = controller.launched_update();
        if !should_adopt(
            self.policy.as_ref(),
            &manifest.update_record(),
            launched.as_ref(),
        ) {
            tracing::debug!(id = %manifest.id(), "remote manifest is not newer");
            return Ok(CheckOutcome::NoNewerUpdate);
        }

        Ok(match launched {
            None => CheckOutcome::NoLaunchedUpdate(manifest),
            Some(_) => CheckOutcome::NewerAvailable(manifest),
        })
    }

    /// Download the remote update into the store if the selection policy wants it.
    ///
    /// The store is held exclusively for the whole load and released on every
    /// path, including failures.
    pub async fn fetch_update(&self) -> Result<FetchOutcome> {
        let controller = self.controller(Operation::Fetch)?;
        let policy = self.policy.as_ref();
        let accept = |manifest: &Manifest| {
            should_adopt(
                policy,
                &manifest.update_record(),
                controller.launched_update().as_ref(),
            )
        };

        let mut database = controller.acquire_database().await;
        let loaded = self
            .loader
            .load(controller.manifest_url(), &mut *database, &accept)
            .await;
        drop(database);

        match loaded {
            Ok(Some(update)) => Ok(FetchOutcome::Fetched(update)),
            Ok(None) => Ok(FetchOutcome::NoNewerUpdate),
            Err(cause) => {
                tracing::error!("update fetch failed: {}", cause);
                Err(UpdatesError::Fetch { cause })
            }
        }
    }

    /// Files of the launched update keyed by asset key.
    pub fn local_assets(&self) -> BTreeMap<String, PathBuf> {
        self.controller
            .as_ref()
            .map(|controller| controller.local_assets())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::AppController;
    use crate::error::{DownloadError, ErrorCode, LoaderError};
    use crate::fetcher::HttpFetcher;
    use crate::loader::HttpRemoteLoader;
    use crate::selection::SelectionPolicyNewest;
    use crate::store::{DatabaseHolder, MemoryUpdateStore, UpdateStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use url::Url;

    const MANIFEST_ID: &str = "0eef8214-4833-4089-9dff-b4138a14f196";

    fn manifest(commit_time: &str) -> Manifest {
        Manifest::from_json(json!({
            "id": MANIFEST_ID,
            "commitTime": commit_time,
            "runtimeVersion": "1.0.0",
            "extra": { "channel": "production" }
        }))
        .unwrap()
    }

    fn launched(commit_time: &str) -> UpdateRecord {
        UpdateRecord {
            id: uuid::Uuid::new_v4(),
            commit_time: commit_time.parse().unwrap(),
            runtime_version: "1.0.0".into(),
            status: UpdateStatus::Ready,
            metadata: json!({}),
            assets: Vec::new(),
        }
    }

    /// Serves a fixed manifest, or a transport failure when none is set.
    struct FakeDownloader {
        manifest: Option<Manifest>,
        calls: AtomicUsize,
    }

    impl FakeDownloader {
        fn serving(manifest: Option<Manifest>) -> Arc<Self> {
            Arc::new(Self {
                manifest,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ManifestDownloader for FakeDownloader {
        async fn download_manifest(&self, _url: &Url) -> std::result::Result<Manifest, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.manifest.clone().ok_or_else(|| {
                DownloadError::network(
                    "Failed to download manifest",
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "offline"),
                )
            })
        }
    }

    struct FixedPolicy(bool);

    impl SelectionPolicy for FixedPolicy {
        fn should_load_new_update(&self, _: &UpdateRecord, _: &UpdateRecord) -> bool {
            self.0
        }

        fn select_update_to_launch<'a>(&self, updates: &'a [UpdateRecord]) -> Option<&'a UpdateRecord> {
            updates.first()
        }
    }

    struct Harness {
        orchestrator: UpdateOrchestrator,
        downloader: Arc<FakeDownloader>,
        controller: Arc<AppController>,
        _updates_dir: TempDir,
    }

    fn harness(manifest: Option<Manifest>, policy: Arc<dyn SelectionPolicy>) -> Harness {
        let downloader = FakeDownloader::serving(manifest);
        let updates_dir = tempdir().unwrap();
        let loader = HttpRemoteLoader::new(
            downloader.clone(),
            HttpFetcher::builder().build(),
            updates_dir.path(),
        );
        let controller = Arc::new(AppController::new(
            Url::parse("https://example.com/manifest").unwrap(),
            updates_dir.path(),
            DatabaseHolder::new(MemoryUpdateStore::new()),
        ));
        let orchestrator = UpdateOrchestrator::new(downloader.clone(), Arc::new(loader), policy)
            .with_controller(controller.clone());
        Harness {
            orchestrator,
            downloader,
            controller,
            _updates_dir: updates_dir,
        }
    }

    #[tokio::test]
    async fn uninitialized_operations_fail_without_network() {
        let downloader = FakeDownloader::serving(Some(manifest("2024-01-01T00:00:00Z")));
        let updates_dir = tempdir().unwrap();
        let loader = HttpRemoteLoader::new(
            downloader.clone(),
            HttpFetcher::builder().build(),
            updates_dir.path(),
        );
        let orchestrator = UpdateOrchestrator::new(
            downloader.clone(),
            Arc::new(loader),
            Arc::new(FixedPolicy(true)),
        );

        let check = orchestrator.check_for_update().await.unwrap_err();
        let fetch = orchestrator.fetch_update().await.unwrap_err();

        assert_eq!(check.code(), ErrorCode::Uninitialized);
        assert_eq!(fetch.code(), ErrorCode::Uninitialized);
        assert_eq!(downloader.calls(), 0);
        assert!(orchestrator.local_assets().is_empty());
    }

    #[tokio::test]
    async fn first_run_offers_any_verified_manifest() {
        let h = harness(
            Some(manifest("2000-01-01T00:00:00Z")),
            Arc::new(FixedPolicy(false)),
        );

        let outcome = h.orchestrator.check_for_update().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::NoLaunchedUpdate(_)));
        assert_eq!(outcome.to_json()["manifest"]["extra"]["channel"], "production");
    }

    #[tokio::test]
    async fn check_follows_selection_policy() {
        let h = harness(
            Some(manifest("2024-02-01T00:00:00Z")),
            Arc::new(SelectionPolicyNewest::new("1.0.0")),
        );

        h.controller
            .set_launched_update(Some(launched("2024-01-01T00:00:00Z")));
        let outcome = h.orchestrator.check_for_update().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::NewerAvailable(_)));

        h.controller
            .set_launched_update(Some(launched("2024-03-01T00:00:00Z")));
        let first = h.orchestrator.check_for_update().await.unwrap();
        let second = h.orchestrator.check_for_update().await.unwrap();
        assert_eq!(first, CheckOutcome::NoNewerUpdate);
        assert_eq!(first, second);
        assert_eq!(first.to_json(), json!({ "isAvailable": false }));
    }

    #[tokio::test]
    async fn check_surfaces_download_failures() {
        let h = harness(None, Arc::new(FixedPolicy(true)));

        let err = h.orchestrator.check_for_update().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpdateCheck);
        assert!(err.is_network_error());
        assert_eq!(err.to_string(), "Failed to download manifest");
    }

    #[tokio::test]
    async fn fetch_stores_selected_update_and_releases_store() {
        let h = harness(
            Some(manifest("2024-02-01T00:00:00Z")),
            Arc::new(SelectionPolicyNewest::new("1.0.0")),
        );
        h.controller
            .set_launched_update(Some(launched("2024-01-01T00:00:00Z")));

        let outcome = h.orchestrator.fetch_update().await.unwrap();
        let update = outcome.update().unwrap();
        assert_eq!(update.id.to_string(), MANIFEST_ID);
        assert!(!h.controller.database().is_held());

        let lease = h.controller.database().try_acquire().unwrap();
        assert_eq!(lease.all_updates().len(), 1);
    }

    #[tokio::test]
    async fn fetch_never_persists_rejected_candidates() {
        let h = harness(
            Some(manifest("2023-01-01T00:00:00Z")),
            Arc::new(SelectionPolicyNewest::new("1.0.0")),
        );
        h.controller
            .set_launched_update(Some(launched("2024-01-01T00:00:00Z")));

        let outcome = h.orchestrator.fetch_update().await.unwrap();
        assert_eq!(outcome, FetchOutcome::NoNewerUpdate);
        assert_eq!(outcome.to_json(), json!({ "isNew": false }));

        let lease = h.controller.database().try_acquire().unwrap();
        assert!(lease.all_updates().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_releases_store() {
        let h = harness(None, Arc::new(FixedPolicy(true)));

        let err = h.orchestrator.fetch_update().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpdateFetch);
        assert!(matches!(
            err,
            UpdatesError::Fetch {
                cause: LoaderError::Manifest(_)
            }
        ));
        assert!(!h.controller.database().is_held());
        assert_eq!(h.downloader.calls(), 1);

        // A later call is not blocked by the failed one.
        assert!(h.orchestrator.fetch_update().await.is_err());
        assert_eq!(h.downloader.calls(), 2);
    }
}
