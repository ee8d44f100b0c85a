//! Backend selection
//!
//! The backend is chosen once, from configuration, and handed around as
//! `Arc<dyn StorageBackend>`; nothing downstream branches on the backend kind.

use crate::{LocalStorage, ObjectStorage, RemoteProvider, StorageBackend, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { root: PathBuf },
    S3(RemoteSettings),
    B2(RemoteSettings),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: default_local_root(),
        }
    }
}

impl StorageConfig {
    /// Tag used in logs (`local`, `s3`, `b2`)
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Local { .. } => "local",
            StorageConfig::S3(_) => "s3",
            StorageConfig::B2(_) => "b2",
        }
    }

    /// Fill missing remote credentials from the standard AWS environment variables
    pub fn with_env_credentials(self) -> Self {
        match self {
            StorageConfig::S3(settings) => StorageConfig::S3(settings.with_env_credentials()),
            StorageConfig::B2(settings) => StorageConfig::B2(settings.with_env_credentials()),
            local => local,
        }
    }
}

/// Connection settings for a bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint (MinIO, B2 region endpoint, ...)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl RemoteSettings {
    pub fn with_env_credentials(mut self) -> Self {
        if self.access_key.is_none() {
            self.access_key = std::env::var("AWS_ACCESS_KEY_ID").ok();
        }
        if self.secret_key.is_none() {
            self.secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        }
        self
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// `<data dir>/imagehoard/downloads`, or `./downloads` when no data dir is known
pub fn default_local_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("imagehoard"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("downloads")
}

/// Build the backend described by `config`.
///
/// Only a local root that cannot be created is an error here; a remote
/// backend without credentials is created and fails per operation.
pub fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::Local { root } => Arc::new(LocalStorage::new(root.clone())?),
        StorageConfig::S3(settings) => Arc::new(ObjectStorage::new(RemoteProvider::S3, settings)),
        StorageConfig::B2(settings) => Arc::new(ObjectStorage::new(RemoteProvider::B2, settings)),
    };
    tracing::info!(backend = backend.name(), "Storage backend ready");
    Ok(backend)
}
