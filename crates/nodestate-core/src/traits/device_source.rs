// # Device Source Trait
//
// Defines the interface for enumerating the SR-IOV capable network
// interfaces present on the node.
//
// ## Implementations
//
// - sysfs-based (Linux): `nodestate-device-sysfs` crate
//
// ## Usage
//
// ```rust,ignore
// use nodestate_core::{DeviceSource, PlatformKind};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* DeviceSource implementation */;
//
//     let interfaces = source.discover(PlatformKind::BareMetal, None).await?;
//     for iface in &interfaces {
//         println!("{} ({})", iface.pci_address, iface.name);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::traits::metadata_source::PlatformMetadata;

/// The kind of platform the node runs on
///
/// Virtualized platforms expose VFs passed through by the hypervisor and need
/// platform metadata to tell which network each device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Physical host with PFs visible
    #[default]
    BareMetal,
    /// OpenStack virtual machine
    VirtualOpenStack,
}

impl PlatformKind {
    /// Whether discovery on this platform needs platform metadata
    pub fn is_virtual(&self) -> bool {
        matches!(self, PlatformKind::VirtualOpenStack)
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baremetal" | "bare_metal" | "bare-metal" => Ok(PlatformKind::BareMetal),
            "openstack" | "virtual_openstack" | "virtual-openstack" => {
                Ok(PlatformKind::VirtualOpenStack)
            }
            other => Err(crate::Error::config(format!(
                "unknown platform kind '{}'",
                other
            ))),
        }
    }
}

/// A network interface as reported in the node state status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceExt {
    /// Kernel netdev name (may be empty if the device has no netdev)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// MAC address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    /// Bound kernel driver
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub driver: String,

    /// PCI address, e.g. `0000:3b:00.0`
    pub pci_address: String,

    /// PCI vendor id (hex, without `0x`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,

    /// PCI device id (hex, without `0x`)
    #[serde(default, rename = "deviceID", skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    /// MTU of the netdev
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    /// Number of VFs currently configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_vfs: Option<u32>,

    /// Human-readable link speed, e.g. `25000 Mb/s`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_speed: String,

    /// `ETH` or `IB`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_type: String,

    /// `legacy` or `switchdev`
    #[serde(default, rename = "eSwitchMode", skip_serializing_if = "String::is_empty")]
    pub e_switch_mode: String,

    /// Platform-specific network selector, e.g. `openstack/NetworkID:<uuid>`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub net_filter: String,

    /// Maximum number of VFs the device supports
    #[serde(default, rename = "totalvfs", skip_serializing_if = "Option::is_none")]
    pub total_vfs: Option<u32>,

    /// Virtual functions of this device
    #[serde(default, rename = "Vfs", skip_serializing_if = "Vec::is_empty")]
    pub vfs: Vec<VirtualFunction>,
}

impl InterfaceExt {
    /// Create a descriptor for the device at `pci_address`
    pub fn new(pci_address: impl Into<String>) -> Self {
        Self {
            pci_address: pci_address.into(),
            ..Default::default()
        }
    }

    /// Set the netdev name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the bound driver
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }
}

/// A virtual function of an SR-IOV device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFunction {
    /// VF index on its PF
    #[serde(rename = "vfID")]
    pub vf_id: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub driver: String,

    pub pci_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,

    #[serde(default, rename = "deviceID", skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u32>,
}

/// Trait for device enumeration
///
/// A device source is an **observer**: it reports what is on the node and
/// nothing else. It returns a full snapshot on every call; the writer never
/// diffs snapshots.
///
/// ## Forbidden Capabilities
/// - ❌ Configure devices (this system only reports)
/// - ❌ Talk to the remote store
/// - ❌ Retry or cache between calls (owned by `StatusWriter`)
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Enumerate the interfaces on this node
    ///
    /// # Parameters
    ///
    /// - `platform`: Platform the node runs on
    /// - `metadata`: Platform metadata, required by virtualized platforms
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<InterfaceExt>)`: Current snapshot, in discovery order
    /// - `Err(Error)`: Enumeration failed
    async fn discover(
        &self,
        platform: PlatformKind,
        metadata: Option<&PlatformMetadata>,
    ) -> Result<Vec<InterfaceExt>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_serializes_with_operator_field_names() {
        let iface = InterfaceExt {
            total_vfs: Some(64),
            device_id: "1015".to_string(),
            vfs: vec![VirtualFunction {
                vf_id: 0,
                pci_address: "0000:3b:02.0".to_string(),
                ..Default::default()
            }],
            ..InterfaceExt::new("0000:3b:00.0").with_name("eth0")
        };

        let json = serde_json::to_value(&iface).unwrap();
        assert_eq!(json["pciAddress"], "0000:3b:00.0");
        assert_eq!(json["deviceID"], "1015");
        assert_eq!(json["totalvfs"], 64);
        assert_eq!(json["Vfs"][0]["vfID"], 0);
        assert!(json.get("mac").is_none());
    }

    #[test]
    fn platform_kind_parses_env_spellings() {
        assert_eq!("baremetal".parse::<PlatformKind>().unwrap(), PlatformKind::BareMetal);
        assert_eq!(
            "OpenStack".parse::<PlatformKind>().unwrap(),
            PlatformKind::VirtualOpenStack
        );
        assert!("vmware".parse::<PlatformKind>().is_err());
    }
}
