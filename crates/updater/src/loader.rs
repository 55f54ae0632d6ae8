use crate::downloader::ManifestDownloader;
use crate::error::LoaderError;
use crate::fetcher::HttpFetcher;
use crate::manifest::{AssetEntry, Manifest};
use crate::store::{AssetRecord, UpdateRecord, UpdateStore};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::task;
use url::Url;

/// Decides, before anything is written, whether a downloaded manifest is kept.
pub type ManifestPredicate<'a> = dyn Fn(&Manifest) -> bool + Send + Sync + 'a;

/// Loads a remote update (manifest and assets) into an [`UpdateStore`].
#[async_trait]
pub trait RemoteLoader: Send + Sync {
    /// Download the manifest at `manifest_url` and, if `accept` approves it,
    /// persist it and its assets.
    ///
    /// Returns `Ok(None)` when `accept` rejected the manifest; nothing is
    /// written to `store` in that case.
    async fn load(
        &self,
        manifest_url: &Url,
        store: &mut dyn UpdateStore,
        accept: &ManifestPredicate<'_>,
    ) -> Result<Option<UpdateRecord>, LoaderError>;
}

/// Loader that downloads assets over HTTP into the updates directory.
#[derive(Clone)]
pub struct HttpRemoteLoader {
    downloader: Arc<dyn ManifestDownloader>,
    fetcher: HttpFetcher,
    updates_directory: PathBuf,
}

impl HttpRemoteLoader {
    pub fn new(
        downloader: Arc<dyn ManifestDownloader>,
        fetcher: HttpFetcher,
        updates_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            fetcher,
            updates_directory: updates_directory.into(),
        }
    }

    async fn download_asset(
        &self,
        asset: &AssetEntry,
        is_launch_asset: bool,
    ) -> Result<AssetRecord, LoaderError> {
        let bytes = self
            .fetcher
            .fetch_bytes(&asset.url, &HeaderMap::new())
            .await
            .map_err(|source| LoaderError::AssetDownload {
                url: asset.url.to_string(),
                source,
            })?;

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let relative_path = asset_file_name(&sha256, &asset.url);
        let target = self.updates_directory.join(&relative_path);

        // Blocking filesystem work runs on a dedicated thread.
        task::spawn_blocking(move || write_asset(bytes, &target)).await??;

        Ok(AssetRecord {
            key: asset.key.clone(),
            url: asset.url.to_string(),
            relative_path,
            sha256,
            is_launch_asset,
        })
    }
}

#[async_trait]
impl RemoteLoader for HttpRemoteLoader {
    async fn load(
        &self,
        manifest_url: &Url,
        store: &mut dyn UpdateStore,
        accept: &ManifestPredicate<'_>,
    ) -> Result<Option<UpdateRecord>, LoaderError> {
        let manifest = self.downloader.download_manifest(manifest_url).await?;
        let id = manifest.id();

        if !accept(&manifest) {
            tracing::info!(%id, "downloaded manifest was not selected, skipping");
            return Ok(None);
        }

        match store.update(id) {
            Some(existing) if existing.is_ready() => {
                tracing::info!(%id, "update already downloaded");
                return Ok(Some(existing));
            }
            Some(_) => tracing::debug!(%id, "resuming partially downloaded update"),
            None => store.insert_update(manifest.update_record())?,
        }

        if let Some(asset) = manifest.launch_asset() {
            let record = self.download_asset(asset, true).await?;
            store.insert_asset(id, record)?;
        }
        for asset in manifest.assets() {
            let record = self.download_asset(asset, false).await?;
            store.insert_asset(id, record)?;
        }

        let update = store.mark_ready(id)?;
        tracing::info!(%id, assets = update.assets.len(), "update downloaded");
        Ok(Some(update))
    }
}

/// Content-addressed file name keeping the URL's extension.
fn asset_file_name(sha256: &str, url: &Url) -> String {
    match Path::new(url.path()).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{sha256}.{ext}"),
        None => sha256.to_owned(),
    }
}

/// Write the asset atomically; an existing file already holds the same bytes.
fn write_asset(bytes: Bytes, target: &Path) -> Result<(), LoaderError> {
    if target.exists() {
        return Ok(());
    }
    let io_err = |source: std::io::Error| LoaderError::AssetWrite {
        path: target.to_path_buf(),
        source,
    };

    let parent = target
        .parent()
        .ok_or_else(|| io_err(std::io::Error::other("asset path has no parent directory")))?;
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
    temp.write_all(&bytes).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(target).map_err(|err| io_err(err.error))?;
    Ok(())
}
