use crate::config::UpdatesConfig;
use crate::controller::AppController;
use crate::crypto::SignatureVerifier;
use crate::downloader::HttpManifestDownloader;
use crate::error::ConfigError;
use crate::fetcher::{HttpFetcher, HttpKeySource};
use crate::loader::HttpRemoteLoader;
use crate::orchestrator::UpdateOrchestrator;
use crate::selection::{SelectionPolicy, SelectionPolicyNewest};
use crate::store::{DatabaseHolder, JsonFileStore};
use std::sync::Arc;

/// Fully wired update client built from an [`UpdatesConfig`].
pub struct UpdatesClient {
    pub orchestrator: UpdateOrchestrator,
    pub controller: Arc<AppController>,
    pub verifier: SignatureVerifier,
    pub policy: Arc<SelectionPolicyNewest>,
}

impl UpdatesClient {
    /// Wire the HTTP collaborators, open the store and launch the newest stored update.
    pub async fn from_config(config: &UpdatesConfig) -> Result<Self, ConfigError> {
        let manifest_url = config.manifest_url()?.clone();

        let mut fetcher = HttpFetcher::builder();
        if let Some(dir) = &config.cache_directory {
            fetcher = fetcher.cache_dir(dir);
        }
        let fetcher = fetcher.build();

        let keys = HttpKeySource::new(config.public_key_url.clone(), fetcher.clone());
        let verifier = SignatureVerifier::new(Arc::new(keys));
        let downloader = Arc::new(
            HttpManifestDownloader::new(fetcher.clone(), verifier.clone())
                .with_headers(config.header_map()?)
                .require_signature(config.require_signed_manifest),
        );
        let loader = HttpRemoteLoader::new(
            downloader.clone(),
            fetcher,
            config.updates_directory.clone(),
        );

        let store = JsonFileStore::open(&config.updates_directory)?;
        let controller = Arc::new(AppController::new(
            manifest_url,
            config.updates_directory.clone(),
            DatabaseHolder::new(store),
        ));
        let policy = Arc::new(SelectionPolicyNewest::new(config.runtime_version.clone()));
        controller.launch(policy.as_ref()).await;

        let selection: Arc<dyn SelectionPolicy> = policy.clone();
        let orchestrator = UpdateOrchestrator::new(downloader, Arc::new(loader), selection)
            .with_controller(controller.clone());

        Ok(Self {
            orchestrator,
            controller,
            verifier,
            policy,
        })
    }
}
