use crate::crypto::SignedPayload;
use crate::error::ManifestError;
use crate::store::{UpdateRecord, UpdateStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// Response body carrying a manifest together with its detached signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    /// Manifest JSON exactly as it was signed.
    pub manifest_string: String,
    /// Base64 encoded RSA-SHA256 signature over `manifest_string`.
    pub signature: String,
}

impl SignedEnvelope {
    /// Extract the envelope from a response body, if the body is one.
    pub fn from_value(body: &Value) -> Option<Self> {
        let manifest_string = body.get("manifestString")?.as_str()?;
        let signature = body.get("signature")?.as_str()?;
        Some(Self {
            manifest_string: manifest_string.to_owned(),
            signature: signature.to_owned(),
        })
    }

    pub fn payload(&self) -> SignedPayload {
        SignedPayload::new(self.manifest_string.clone(), self.signature.clone())
    }
}

/// A file referenced by a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetEntry {
    pub url: Url,
    /// Lookup key the host application uses for this asset.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFields {
    id: Uuid,
    commit_time: DateTime<Utc>,
    #[serde(default)]
    runtime_version: Option<String>,
    #[serde(default)]
    sdk_version: Option<String>,
    #[serde(default)]
    bundle_url: Option<Url>,
    #[serde(default)]
    assets: Vec<AssetEntry>,
}

/// Candidate update described by a trusted manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    id: Uuid,
    commit_time: DateTime<Utc>,
    runtime_version: String,
    launch_asset: Option<AssetEntry>,
    assets: Vec<AssetEntry>,
    raw: Value,
}

impl Manifest {
    /// Read identity and ordering fields from a manifest body, keeping the body verbatim.
    pub fn from_json(raw: Value) -> Result<Self, ManifestError> {
        let fields: ManifestFields = serde_json::from_value(raw.clone())?;
        let runtime_version = fields
            .runtime_version
            .or(fields.sdk_version)
            .ok_or(ManifestError::MissingRuntimeVersion)?;

        let launch_asset = fields.bundle_url.map(|url| AssetEntry {
            url,
            key: Some("bundle".to_owned()),
            content_type: Some("application/javascript".to_owned()),
        });

        Ok(Self {
            id: fields.id,
            commit_time: fields.commit_time,
            runtime_version,
            launch_asset,
            assets: fields.assets,
            raw,
        })
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        Self::from_json(serde_json::from_str(text)?)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn commit_time(&self) -> DateTime<Utc> {
        self.commit_time
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn launch_asset(&self) -> Option<&AssetEntry> {
        self.launch_asset.as_ref()
    }

    pub fn assets(&self) -> &[AssetEntry] {
        &self.assets
    }

    /// Launch asset first, followed by the remaining assets.
    pub fn all_assets(&self) -> impl Iterator<Item = &AssetEntry> {
        self.launch_asset.iter().chain(self.assets.iter())
    }

    /// The manifest body as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The manifest body re-serialised for callers that want JSON text.
    pub fn raw_json(&self) -> String {
        self.raw.to_string()
    }

    /// Record describing this manifest, not yet backed by downloaded assets.
    pub fn update_record(&self) -> UpdateRecord {
        UpdateRecord {
            id: self.id,
            commit_time: self.commit_time,
            runtime_version: self.runtime_version.clone(),
            status: UpdateStatus::Pending,
            metadata: self.raw.clone(),
            assets: Vec::new(),
        }
    }
}
