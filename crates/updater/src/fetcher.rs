use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How a cacheable request may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    /// Answer from the local cache only, regardless of staleness.
    ForceCache,
    /// Always contact the origin and refresh the cache with the response.
    ForceNetwork,
}

/// Source of the PEM-encoded public key used to check manifest signatures.
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    /// Retrieve the raw key text honouring `directive`.
    ///
    /// A [`CacheDirective::ForceCache`] request with nothing cached yields an
    /// empty body rather than an error, the same way an HTTP cache answers an
    /// unsatisfiable only-if-cached request.
    async fn download_public_key(&self, directive: CacheDirective) -> Result<Bytes, FetchError>;
}

/// Builder for [`HttpFetcher`].
#[derive(Default)]
pub struct HttpFetcherBuilder {
    client: Option<Client>,
    headers: HeaderMap,
    cache_dir: Option<PathBuf>,
}

impl HttpFetcherBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Headers sent with every request.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Mirror cached responses into `dir` so they survive restarts.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Build the fetcher.
    pub fn build(self) -> HttpFetcher {
        HttpFetcher {
            client: self.client.unwrap_or_default(),
            headers: self.headers,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_dir: self.cache_dir,
        }
    }
}

/// HTTP transport with a small response cache for cacheable resources.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    headers: HeaderMap,
    cache: Arc<RwLock<HashMap<String, Bytes>>>,
    cache_dir: Option<PathBuf>,
}

impl HttpFetcher {
    /// Create a new builder.
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    /// Fetch `url` from the origin without touching the cache.
    pub async fn fetch_bytes(&self, url: &Url, headers: &HeaderMap) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .headers(headers.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    /// Fetch `url` honouring the cache `directive`.
    ///
    /// Under [`CacheDirective::ForceNetwork`] the origin's body is returned
    /// whatever the response status, so an error page reaches the caller as
    /// content. Only successful responses are cached. A cache entry on disk
    /// that exists but cannot be read is a [`FetchError::Cache`].
    pub async fn fetch_cached(
        &self,
        url: &Url,
        directive: CacheDirective,
    ) -> Result<Bytes, FetchError> {
        match directive {
            CacheDirective::ForceCache => Ok(self.cached(url).await?.unwrap_or_default()),
            CacheDirective::ForceNetwork => {
                let response = self
                    .client
                    .get(url.clone())
                    .headers(self.headers.clone())
                    .send()
                    .await?;
                let status = response.status();
                let body = response.bytes().await?;
                if status.is_success() {
                    self.store(url, body.clone()).await;
                } else {
                    tracing::warn!(%url, %status, "origin answered with an error status");
                }
                Ok(body)
            }
        }
    }

    async fn cached(&self, url: &Url) -> Result<Option<Bytes>, FetchError> {
        if let Some(body) = self.cache.read().await.get(url.as_str()) {
            return Ok(Some(body.clone()));
        }

        let Some(path) = self.cache_path(url) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let body = Bytes::from(raw);
                self.cache
                    .write()
                    .await
                    .insert(url.to_string(), body.clone());
                Ok(Some(body))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FetchError::Cache(err)),
        }
    }

    async fn store(&self, url: &Url, body: Bytes) {
        if let Some(path) = self.cache_path(url) {
            let written = match path.parent() {
                Some(parent) => match tokio::fs::create_dir_all(parent).await {
                    Ok(()) => tokio::fs::write(&path, &body).await,
                    Err(err) => Err(err),
                },
                None => tokio::fs::write(&path, &body).await,
            };
            if let Err(err) = written {
                tracing::warn!("failed to persist cache entry {:?}: {}", path, err);
            }
        }
        self.cache.write().await.insert(url.to_string(), body);
    }

    fn cache_path(&self, url: &Url) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
        Some(dir.join(digest))
    }
}

/// Public key published at a fixed, well-known URL.
#[derive(Clone)]
pub struct HttpKeySource {
    url: Url,
    fetcher: HttpFetcher,
}

impl HttpKeySource {
    pub fn new(url: Url, fetcher: HttpFetcher) -> Self {
        Self { url, fetcher }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PublicKeySource for HttpKeySource {
    async fn download_public_key(&self, directive: CacheDirective) -> Result<Bytes, FetchError> {
        tracing::debug!(url = %self.url, ?directive, "fetching manifest public key");
        self.fetcher.fetch_cached(&self.url, directive).await
    }
}
