//! Over-the-air update client with signed manifests and rotating keys.
//!
//! Updates are described by manifests published at a fixed URL. Each manifest
//! is wrapped in an envelope carrying an RSA-SHA256 signature that is checked
//! against a public key served from a well-known URL. The key may be rotated
//! on the server at any time, so the cached copy of the key is tried first and
//! the origin is consulted once if that copy does not validate the signature.
//!
//! Verified manifests are compared against the currently launched update by a
//! [`SelectionPolicy`]; the [`UpdateOrchestrator`] exposes the resulting
//! check and fetch operations.
//!
//! ```ignore
//! use ota_updater::{CheckOutcome, UpdatesClient, UpdatesConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UpdatesConfig::from_file(std::path::Path::new("updates.json"))?;
//! let client = UpdatesClient::from_config(&config).await?;
//!
//! match client.orchestrator.check_for_update().await? {
//!     CheckOutcome::NoNewerUpdate => println!("already running the newest update"),
//!     outcome => {
//!         println!("update available: {}", outcome.to_json());
//!         client.orchestrator.fetch_update().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod controller;
mod crypto;
mod downloader;
mod error;
mod fetcher;
mod loader;
mod manifest;
mod orchestrator;
mod selection;
mod store;

pub use client::UpdatesClient;
pub use config::{UpdatesConfig, DEFAULT_PUBLIC_KEY_URL};
pub use controller::{AppController, UpdatesController};
pub use crypto::{parse_public_key, Attempt, SignatureVerifier, SignedPayload, VerificationOutcome};
pub use downloader::{HttpManifestDownloader, ManifestDownloader};
pub use error::{
    ConfigError, DownloadError, ErrorCode, FetchError, LoaderError, ManifestError, Operation,
    Result, StoreError, UpdatesError, VerifyError,
};
pub use fetcher::{CacheDirective, HttpFetcher, HttpFetcherBuilder, HttpKeySource, PublicKeySource};
pub use loader::{HttpRemoteLoader, ManifestPredicate, RemoteLoader};
pub use manifest::{AssetEntry, Manifest, SignedEnvelope};
pub use orchestrator::{CheckOutcome, FetchOutcome, UpdateOrchestrator};
pub use selection::{should_adopt, SelectionPolicy, SelectionPolicyNewest};
pub use store::{
    AssetRecord, DatabaseHolder, DatabaseLease, JsonFileStore, MemoryUpdateStore, UpdateRecord,
    UpdateStatus, UpdateStore,
};
