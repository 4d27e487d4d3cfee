// # Metadata Source Trait
//
// Defines the interface for obtaining platform metadata on virtualized
// platforms. On OpenStack this is the `meta_data.json` / `network_data.json`
// pair, available either from the config drive or from the metadata service.
//
// ## Implementations
//
// - OpenStack: `nodestate-metadata-openstack` crate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Platform metadata handed to the device source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMetadata {
    pub meta_data: OpenStackMetaData,
    pub network_data: OpenStackNetworkData,
}

impl PlatformMetadata {
    /// Find the metadata device entry for a PCI address
    pub fn device_by_address(&self, pci_address: &str) -> Option<&OpenStackDevice> {
        self.meta_data
            .devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(pci_address))
    }

    /// Resolve the OpenStack network id of the port with the given MAC
    ///
    /// MAC → link id → network → network id.
    pub fn network_id_for_mac(&self, mac: &str) -> Option<&str> {
        let link = self
            .network_data
            .links
            .iter()
            .find(|l| l.ethernet_mac_address.eq_ignore_ascii_case(mac))?;

        self.network_data
            .networks
            .iter()
            .find(|n| n.link == link.id)
            .map(|n| n.network_id.as_str())
    }
}

/// Contents of `openstack/latest/meta_data.json` relevant to device discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStackMetaData {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub devices: Vec<OpenStackDevice>,
}

/// A device entry from `meta_data.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStackDevice {
    #[serde(default)]
    pub vlan: Option<u32>,
    #[serde(default)]
    pub vf_trusted: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub bus: String,
    /// PCI address
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Contents of `openstack/latest/network_data.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStackNetworkData {
    #[serde(default)]
    pub links: Vec<OpenStackLink>,
    #[serde(default)]
    pub networks: Vec<OpenStackNetwork>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStackLink {
    pub id: String,
    #[serde(default)]
    pub vif_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub ethernet_mac_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStackNetwork {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub network_id: String,
}

/// Trait for platform metadata sources
///
/// The writer calls `read_cached()` first and falls back to `fetch()` when
/// the cached copy is unavailable. Neither method retries.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Read metadata from a local cached copy (e.g. the config drive)
    async fn read_cached(&self) -> Result<PlatformMetadata, crate::Error>;

    /// Fetch metadata from the platform's metadata service
    async fn fetch(&self) -> Result<PlatformMetadata, crate::Error>;
}
