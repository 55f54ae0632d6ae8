use crate::crypto::{SignatureVerifier, VerificationOutcome};
use crate::error::DownloadError;
use crate::fetcher::HttpFetcher;
use crate::manifest::{Manifest, SignedEnvelope};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::Value;
use url::Url;

const MANIFEST_ACCEPT: &str = "application/expo+json,application/json";

/// Produces trusted manifests.
///
/// Implementations must verify the manifest signature before returning it;
/// callers treat every returned [`Manifest`] as authentic.
#[async_trait]
pub trait ManifestDownloader: Send + Sync {
    async fn download_manifest(&self, url: &Url) -> Result<Manifest, DownloadError>;
}

/// Downloads manifests over HTTP and checks signed envelopes.
#[derive(Clone)]
pub struct HttpManifestDownloader {
    fetcher: HttpFetcher,
    verifier: SignatureVerifier,
    headers: HeaderMap,
    require_signature: bool,
}

impl HttpManifestDownloader {
    pub fn new(fetcher: HttpFetcher, verifier: SignatureVerifier) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
        Self {
            fetcher,
            verifier,
            headers,
            require_signature: true,
        }
    }

    /// Extra headers sent with every manifest request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Whether bodies without a `manifestString`/`signature` envelope are refused.
    pub fn require_signature(mut self, required: bool) -> Self {
        self.require_signature = required;
        self
    }

    async fn verified_manifest(&self, envelope: SignedEnvelope) -> Result<Manifest, DownloadError> {
        match self.verifier.verify(envelope.payload()).await {
            VerificationOutcome::Valid => Manifest::parse(&envelope.manifest_string)
                .map_err(|err| DownloadError::with_cause("Failed to parse manifest", err)),
            VerificationOutcome::Invalid => Err(DownloadError::new(
                "Manifest signature is invalid; aborting",
            )),
            VerificationOutcome::Error {
                cause,
                is_network_error: true,
            } => Err(DownloadError::network(
                "Could not fetch the public key to validate the manifest signature",
                cause,
            )),
            VerificationOutcome::Error { cause, .. } => Err(DownloadError::with_cause(
                "Could not validate signed manifest",
                cause,
            )),
        }
    }
}

#[async_trait]
impl ManifestDownloader for HttpManifestDownloader {
    async fn download_manifest(&self, url: &Url) -> Result<Manifest, DownloadError> {
        let body = self
            .fetcher
            .fetch_bytes(url, &self.headers)
            .await
            .map_err(|err| {
                DownloadError::network(format!("Failed to download manifest from URL: {url}"), err)
            })?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|err| DownloadError::with_cause("Failed to parse manifest JSON", err))?;

        match SignedEnvelope::from_value(&value) {
            Some(envelope) => self.verified_manifest(envelope).await,
            None if self.require_signature => {
                Err(DownloadError::new("Manifest is not signed; aborting"))
            }
            None => {
                tracing::warn!(%url, "accepting unsigned manifest");
                Manifest::from_json(value)
                    .map_err(|err| DownloadError::with_cause("Failed to parse manifest", err))
            }
        }
    }
}
