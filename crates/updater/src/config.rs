use crate::error::ConfigError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Key used to sign manifests published by the update server.
pub const DEFAULT_PUBLIC_KEY_URL: &str = "https://exp.host/--/manifest-public-key";

/// Settings for the update client, usually read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdatesConfig {
    /// Where the remote manifest is published.
    pub manifest_url: Option<Url>,
    /// Where the manifest signing key is published.
    pub public_key_url: Url,
    /// Runtime version this build of the host can run.
    pub runtime_version: String,
    /// Directory holding downloaded assets and the update store.
    pub updates_directory: PathBuf,
    /// Directory mirroring cached HTTP responses such as the public key.
    pub cache_directory: Option<PathBuf>,
    /// Refuse manifests that are not wrapped in a signed envelope.
    pub require_signed_manifest: bool,
    /// Extra headers sent with manifest requests.
    pub request_headers: BTreeMap<String, String>,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            manifest_url: None,
            public_key_url: Url::parse(DEFAULT_PUBLIC_KEY_URL)
                .expect("default public key URL is valid"),
            runtime_version: "1.0.0".to_string(),
            updates_directory: PathBuf::from("target/ota-updates"),
            cache_directory: None,
            require_signed_manifest: true,
            request_headers: BTreeMap::new(),
        }
    }
}

impl UpdatesConfig {
    /// Read a config file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// The manifest URL, which has no sensible default.
    pub fn manifest_url(&self) -> Result<&Url, ConfigError> {
        self.manifest_url
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("manifest_url is not set".into()))
    }

    /// `request_headers` as an HTTP header map.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.request_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ConfigError::Invalid(format!("header name {name:?}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| ConfigError::Invalid(format!("header {name}: {err}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}
