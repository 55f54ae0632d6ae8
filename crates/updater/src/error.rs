use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Convenient result alias for update operations exposed to callers.
pub type Result<T> = std::result::Result<T, UpdatesError>;

/// Stable, caller-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    /// Checking the remote manifest failed.
    #[serde(rename = "ERR_UPDATES_CHECK")]
    UpdateCheck,
    /// Downloading and storing a new update failed.
    #[serde(rename = "ERR_UPDATES_FETCH")]
    UpdateFetch,
    /// The updates controller has not been initialized.
    #[serde(rename = "ERR_UPDATES_UNINITIALIZED")]
    Uninitialized,
}

impl ErrorCode {
    /// The code as it is reported to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UpdateCheck => "ERR_UPDATES_CHECK",
            ErrorCode::UpdateFetch => "ERR_UPDATES_FETCH",
            ErrorCode::Uninitialized => "ERR_UPDATES_UNINITIALIZED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which public operation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `check_for_update`.
    Check,
    /// `fetch_update`.
    Fetch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Check => f.write_str("check for"),
            Operation::Fetch => f.write_str("fetch"),
        }
    }
}

/// Errors surfaced by [`crate::UpdateOrchestrator`].
#[derive(thiserror::Error, Debug)]
pub enum UpdatesError {
    /// No controller was registered, nothing was attempted.
    #[error(
        "the updates controller has not been initialized, cannot {operation} updates; \
         make sure a controller is registered before calling this operation"
    )]
    Uninitialized { operation: Operation },
    /// The remote manifest could not be downloaded or verified.
    #[error("{message}")]
    Check {
        /// Caller-facing description, taken from the download failure.
        message: String,
        #[source]
        cause: DownloadError,
    },
    /// The remote update could not be loaded into the store.
    #[error("Failed to download new update")]
    Fetch {
        #[source]
        cause: LoaderError,
    },
}

impl UpdatesError {
    /// Stable code identifying the failure category.
    pub fn code(&self) -> ErrorCode {
        match self {
            UpdatesError::Uninitialized { .. } => ErrorCode::Uninitialized,
            UpdatesError::Check { .. } => ErrorCode::UpdateCheck,
            UpdatesError::Fetch { .. } => ErrorCode::UpdateFetch,
        }
    }

    /// Whether the underlying failure was a transport problem.
    pub fn is_network_error(&self) -> bool {
        match self {
            UpdatesError::Uninitialized { .. } => false,
            UpdatesError::Check { cause, .. } => cause.is_network_error(),
            UpdatesError::Fetch { cause } => cause.is_network_error(),
        }
    }
}

/// Transport failure while talking to a remote origin or the local response cache.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// The request could not be sent or its response could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A cached response exists on disk but could not be read.
    #[error("response cache I/O failed: {0}")]
    Cache(#[from] std::io::Error),
}

/// Reasons a signature could not be confirmed.
#[derive(thiserror::Error, Debug)]
pub enum VerifyError {
    /// The public key could not be retrieved.
    #[error("failed to fetch public key: {0}")]
    KeyFetch(#[from] FetchError),
    /// The fetched key text was empty or not a valid X.509 RSA public key.
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    /// The signature was not valid base64 or had the wrong shape for the key.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    /// The signature did not match the payload.
    #[error("signature does not match payload")]
    Mismatch,
}

/// Failure to produce a trusted manifest.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct DownloadError {
    /// Caller-facing description of what went wrong.
    pub message: String,
    is_network_error: bool,
    /// Lower-level failure, if any.
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DownloadError {
    /// A failure with no underlying cause, such as a rejected signature.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_network_error: false,
            cause: None,
        }
    }

    /// A transport failure worth retrying later.
    pub fn network(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            is_network_error: true,
            cause: Some(Box::new(cause)),
        }
    }

    /// A non-transport failure wrapping `cause`.
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            is_network_error: false,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn is_network_error(&self) -> bool {
        self.is_network_error
    }
}

/// A manifest body that lacks the fields needed for identity and ordering.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The body is not JSON or a required field is missing or malformed.
    #[error("manifest is not valid JSON or lacks required fields: {0}")]
    Decode(#[from] serde_json::Error),
    /// Neither `runtimeVersion` nor `sdkVersion` is present.
    #[error("manifest has neither runtimeVersion nor sdkVersion")]
    MissingRuntimeVersion,
}

/// Errors raised while loading a remote update into the store.
#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    /// The manifest could not be downloaded or verified.
    #[error("manifest download failed: {0}")]
    Manifest(#[from] DownloadError),
    /// An asset listed in the manifest could not be downloaded.
    #[error("asset download from {url} failed: {source}")]
    AssetDownload {
        url: String,
        #[source]
        source: FetchError,
    },
    /// A downloaded asset could not be written to the updates directory.
    #[error("failed to write asset to {path:?}: {source}")]
    AssetWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The update store rejected a write.
    #[error("update store failed: {0}")]
    Store(#[from] StoreError),
    /// The blocking file write task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl LoaderError {
    /// Whether the failure was a transport problem.
    pub fn is_network_error(&self) -> bool {
        match self {
            LoaderError::Manifest(err) => err.is_network_error(),
            LoaderError::AssetDownload { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised by [`crate::UpdateStore`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// No update with this id has been inserted.
    #[error("update {0} is not in the store")]
    UnknownUpdate(uuid::Uuid),
    /// An update with this id already exists.
    #[error("update {0} is already in the store")]
    DuplicateUpdate(uuid::Uuid),
    /// Reading or writing the store file failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The store file could not be encoded or decoded.
    #[error("store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors raised while loading [`crate::UpdatesConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`crate::UpdatesConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value parsed but is unusable, such as a missing manifest URL.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// The update store in the updates directory could not be opened.
    #[error("failed to open update store: {0}")]
    Store(#[from] StoreError),
}
