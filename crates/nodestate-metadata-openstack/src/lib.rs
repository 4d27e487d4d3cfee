// # OpenStack Metadata Source
//
// This crate provides the platform metadata used to discover devices on
// OpenStack virtual machines.
//
// ## Sources
//
// Two copies of the same pair of documents are available to a VM:
// - The config drive, mounted locally (read by `read_cached`)
// - The metadata service at a link-local address (queried by `fetch`)
//
// Both expose `openstack/latest/meta_data.json` and
// `openstack/latest/network_data.json`.

use nodestate_core::traits::{
    MetadataSource, OpenStackMetaData, OpenStackNetworkData, PlatformMetadata,
};
use nodestate_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config drive mount point
pub const DEFAULT_CONFIG_DRIVE_DIR: &str = "/var/config";

/// Default metadata service endpoint
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

const META_DATA_PATH: &str = "openstack/latest/meta_data.json";
const NETWORK_DATA_PATH: &str = "openstack/latest/network_data.json";

/// Request timeout for the metadata service
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// OpenStack metadata from the config drive or the metadata service
pub struct OpenStackMetadataSource {
    /// Config drive mount point
    config_drive_dir: PathBuf,

    /// Metadata service base URL, without trailing slash
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl OpenStackMetadataSource {
    /// Create a new metadata source
    ///
    /// # Parameters
    ///
    /// - `config_drive_dir`: Where the config drive is mounted (e.g., "/var/config")
    /// - `base_url`: Metadata service URL (e.g., "http://169.254.169.254")
    pub fn new(config_drive_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            config_drive_dir: config_drive_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_file<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let file = self.config_drive_dir.join(path);
        let content = tokio::fs::read(&file).await.map_err(|e| {
            Error::metadata(format!("Failed to read {}: {}", file.display(), e))
        })?;

        serde_json::from_slice(&content)
            .map_err(|e| Error::metadata(format!("Failed to parse {}: {}", file.display(), e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::metadata(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::metadata(format!(
                "HTTP error from {}: {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::metadata(format!("Failed to parse response from {}: {}", url, e)))
    }

    /// Config drive mount point
    pub fn config_drive_dir(&self) -> &Path {
        &self.config_drive_dir
    }
}

impl Default for OpenStackMetadataSource {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DRIVE_DIR, DEFAULT_METADATA_URL)
    }
}

#[async_trait::async_trait]
impl MetadataSource for OpenStackMetadataSource {
    async fn read_cached(&self) -> Result<PlatformMetadata> {
        tracing::debug!(
            "Reading platform metadata from config drive {}",
            self.config_drive_dir.display()
        );

        let meta_data: OpenStackMetaData = self.read_file(META_DATA_PATH).await?;
        let network_data: OpenStackNetworkData = self.read_file(NETWORK_DATA_PATH).await?;

        Ok(PlatformMetadata {
            meta_data,
            network_data,
        })
    }

    async fn fetch(&self) -> Result<PlatformMetadata> {
        tracing::info!("Fetching platform metadata from {}", self.base_url);

        let meta_data: OpenStackMetaData = self.get_json(META_DATA_PATH).await?;
        let network_data: OpenStackNetworkData = self.get_json(NETWORK_DATA_PATH).await?;

        Ok(PlatformMetadata {
            meta_data,
            network_data,
        })
    }
}
