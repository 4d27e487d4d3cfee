// # Sysfs Device Source
//
// This crate provides a sysfs-based DeviceSource for Linux systems.
//
// ## Layout
//
// Everything is read below a configurable root (`/sys` on a host):
//
// ```text
// <root>/bus/pci/devices/<pci>/class            0x020000 for network devices
// <root>/bus/pci/devices/<pci>/{vendor,device}
// <root>/bus/pci/devices/<pci>/driver           -> .../drivers/<name>
// <root>/bus/pci/devices/<pci>/sriov_{totalvfs,numvfs}
// <root>/bus/pci/devices/<pci>/virtfn<N>        -> ../<vf pci>
// <root>/bus/pci/devices/<pci>/physfn           present on VFs only
// <root>/bus/pci/devices/<pci>/net/<ifname>/{address,mtu,speed,type}
// ```
//
// ## Platform Support
//
// The layout is Linux-specific. Discovery itself only reads files, so tests
// run it against a synthetic tree.

use async_trait::async_trait;
use nodestate_core::traits::{
    DeviceSource, InterfaceExt, PlatformKind, PlatformMetadata, VirtualFunction,
};
use nodestate_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Default sysfs mount point
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// PCI class prefix of network controllers
const NETWORK_CLASS_PREFIX: &str = "0x02";

/// ARPHRD_ETHER
const LINK_TYPE_ETHER: u32 = 1;
/// ARPHRD_INFINIBAND
const LINK_TYPE_INFINIBAND: u32 = 32;

/// DeviceSource reading SR-IOV state from sysfs
#[derive(Debug, Clone)]
pub struct SysfsDeviceSource {
    root: PathBuf,
}

impl SysfsDeviceSource {
    /// Create a source reading below `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Sysfs root this source reads from
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pci_devices_dir(&self) -> PathBuf {
        self.root.join("bus").join("pci").join("devices")
    }

    /// PCI addresses of all network-class devices, sorted
    async fn network_devices(&self) -> Result<Vec<String>> {
        let dir = self.pci_devices_dir();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            Error::discovery(format!("Failed to list {}: {}", dir.display(), e))
        })?;

        let mut addresses = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let address = entry.file_name().to_string_lossy().into_owned();
            let class = read_trimmed(&entry.path().join("class")).await;
            if class.is_some_and(|c| c.starts_with(NETWORK_CLASS_PREFIX)) {
                addresses.push(address);
            }
        }

        addresses.sort();
        Ok(addresses)
    }

    async fn discover_bare_metal(&self) -> Result<Vec<InterfaceExt>> {
        let mut interfaces = Vec::new();

        for address in self.network_devices().await? {
            let device_dir = self.pci_devices_dir().join(&address);
            if fs::symlink_metadata(device_dir.join("physfn")).await.is_ok() {
                debug!("Skipping virtual function {}", address);
                continue;
            }

            let mut iface = self.read_interface(&address).await;
            iface.total_vfs = read_u32(&device_dir.join("sriov_totalvfs")).await;
            iface.num_vfs = read_u32(&device_dir.join("sriov_numvfs")).await;
            iface.vfs = self.read_vfs(&device_dir).await?;

            interfaces.push(iface);
        }

        Ok(interfaces)
    }

    async fn discover_virtual(&self, metadata: &PlatformMetadata) -> Result<Vec<InterfaceExt>> {
        let mut interfaces = Vec::new();

        for address in self.network_devices().await? {
            let Some(device) = metadata.device_by_address(&address) else {
                debug!("Skipping {}: not listed in platform metadata", address);
                continue;
            };

            let mut iface = self.read_interface(&address).await;
            if let Some(network_id) = metadata.network_id_for_mac(&iface.mac) {
                iface.net_filter = format!("openstack/NetworkID:{}", network_id);
            }
            iface.num_vfs = Some(1);
            iface.total_vfs = Some(1);
            iface.vfs = vec![VirtualFunction {
                vf_id: 0,
                name: iface.name.clone(),
                mac: iface.mac.clone(),
                driver: iface.driver.clone(),
                pci_address: iface.pci_address.clone(),
                vendor: iface.vendor.clone(),
                device_id: iface.device_id.clone(),
                mtu: iface.mtu,
                vlan: device.vlan,
            }];

            interfaces.push(iface);
        }

        Ok(interfaces)
    }

    /// PCI and netdev attributes of one device; missing attributes stay empty
    async fn read_interface(&self, address: &str) -> InterfaceExt {
        let device_dir = self.pci_devices_dir().join(address);

        let mut iface = InterfaceExt::new(address);
        iface.vendor = read_hex_id(&device_dir.join("vendor")).await;
        iface.device_id = read_hex_id(&device_dir.join("device")).await;
        iface.driver = read_link_name(&device_dir.join("driver"))
            .await
            .unwrap_or_default();

        if let Some(netdev) = first_netdev(&device_dir).await {
            let net_dir = device_dir.join("net").join(&netdev);
            iface.mac = read_trimmed(&net_dir.join("address"))
                .await
                .unwrap_or_default();
            iface.mtu = read_u32(&net_dir.join("mtu")).await;
            iface.link_speed = read_trimmed(&net_dir.join("speed"))
                .await
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|speed| *speed > 0)
                .map(|speed| format!("{} Mb/s", speed))
                .unwrap_or_default();
            iface.link_type = match read_u32(&net_dir.join("type")).await {
                Some(LINK_TYPE_ETHER) => "ETH".to_string(),
                Some(LINK_TYPE_INFINIBAND) => "IB".to_string(),
                _ => String::new(),
            };
            iface.name = netdev;
        } else {
            debug!("No netdev bound to {}", address);
        }

        iface
    }

    /// VFs of the physical function in `device_dir`, ordered by VF index
    async fn read_vfs(&self, device_dir: &Path) -> Result<Vec<VirtualFunction>> {
        let mut entries = fs::read_dir(device_dir).await?;
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(index) = name.strip_prefix("virtfn").and_then(|n| n.parse::<u32>().ok()) {
                links.push((index, entry.path()));
            }
        }
        links.sort_by_key(|(index, _)| *index);

        let mut vfs = Vec::with_capacity(links.len());
        for (vf_id, link) in links {
            let Some(address) = read_link_name(&link).await else {
                warn!("Unreadable VF link {}", link.display());
                continue;
            };

            let vf = self.read_interface(&address).await;
            vfs.push(VirtualFunction {
                vf_id,
                name: vf.name,
                mac: vf.mac,
                driver: vf.driver,
                pci_address: vf.pci_address,
                vendor: vf.vendor,
                device_id: vf.device_id,
                mtu: vf.mtu,
                vlan: None,
            });
        }

        Ok(vfs)
    }
}

#[async_trait]
impl DeviceSource for SysfsDeviceSource {
    async fn discover(
        &self,
        platform: PlatformKind,
        metadata: Option<&PlatformMetadata>,
    ) -> Result<Vec<InterfaceExt>> {
        match platform {
            PlatformKind::BareMetal => self.discover_bare_metal().await,
            PlatformKind::VirtualOpenStack => {
                let metadata = metadata.ok_or_else(|| {
                    Error::discovery("virtual platform discovery requires platform metadata")
                })?;
                self.discover_virtual(metadata).await
            }
        }
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

async fn read_u32(path: &Path) -> Option<u32> {
    read_trimmed(path).await.and_then(|s| s.parse().ok())
}

/// `0x15b3` -> `15b3`
async fn read_hex_id(path: &Path) -> String {
    read_trimmed(path)
        .await
        .map(|s| s.trim_start_matches("0x").to_string())
        .unwrap_or_default()
}

/// Final path component of a symlink's target
async fn read_link_name(path: &Path) -> Option<String> {
    let target = fs::read_link(path).await.ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// First network interface name bound to the device, by name order
async fn first_netdev(device_dir: &Path) -> Option<String> {
    let mut entries = fs::read_dir(device_dir.join("net")).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    names.into_iter().next()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nodestate_core::traits::{
        OpenStackDevice, OpenStackLink, OpenStackMetaData, OpenStackNetwork, OpenStackNetworkData,
    };
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// Synthetic sysfs tree builder
    struct FakeSysfs {
        root: TempDir,
    }

    impl FakeSysfs {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(root.path().join("bus/pci/devices")).unwrap();
            std::fs::create_dir_all(root.path().join("bus/pci/drivers/mlx5_core")).unwrap();
            Self { root }
        }

        fn device_dir(&self, pci: &str) -> PathBuf {
            self.root.path().join("bus/pci/devices").join(pci)
        }

        fn write(&self, pci: &str, file: &str, content: &str) {
            let path = self.device_dir(pci).join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn device(&self, pci: &str, class: &str) {
            std::fs::create_dir_all(self.device_dir(pci)).unwrap();
            self.write(pci, "class", &format!("{}\n", class));
            self.write(pci, "vendor", "0x15b3\n");
            self.write(pci, "device", "0x1017\n");
            symlink(
                self.root.path().join("bus/pci/drivers/mlx5_core"),
                self.device_dir(pci).join("driver"),
            )
            .unwrap();
        }

        fn netdev(&self, pci: &str, name: &str, mac: &str) {
            self.write(pci, &format!("net/{}/address", name), &format!("{}\n", mac));
            self.write(pci, &format!("net/{}/mtu", name), "1500\n");
            self.write(pci, &format!("net/{}/speed", name), "25000\n");
            self.write(pci, &format!("net/{}/type", name), "1\n");
        }

        fn vf(&self, pf: &str, index: u32, vf: &str) {
            self.device(vf, "0x020000");
            symlink(self.device_dir(pf), self.device_dir(vf).join("physfn")).unwrap();
            symlink(
                self.device_dir(vf),
                self.device_dir(pf).join(format!("virtfn{}", index)),
            )
            .unwrap();
        }

        fn source(&self) -> SysfsDeviceSource {
            SysfsDeviceSource::new(self.root.path())
        }
    }

    #[tokio::test]
    async fn bare_metal_reports_pf_with_ordered_vfs() {
        let sysfs = FakeSysfs::new();
        sysfs.device("0000:3b:00.0", "0x020000");
        sysfs.netdev("0000:3b:00.0", "ens1f0", "b8:59:9f:00:00:01");
        sysfs.write("0000:3b:00.0", "sriov_totalvfs", "8\n");
        sysfs.write("0000:3b:00.0", "sriov_numvfs", "2\n");
        sysfs.vf("0000:3b:00.0", 1, "0000:3b:00.3");
        sysfs.vf("0000:3b:00.0", 0, "0000:3b:00.2");
        sysfs.netdev("0000:3b:00.2", "ens1f0v0", "b8:59:9f:00:00:10");

        // Non-network device is ignored
        sysfs.device("0000:00:1f.2", "0x010601");

        let interfaces = sysfs
            .source()
            .discover(PlatformKind::BareMetal, None)
            .await
            .unwrap();

        assert_eq!(interfaces.len(), 1, "VFs are not reported as interfaces");
        let pf = &interfaces[0];
        assert_eq!(pf.pci_address, "0000:3b:00.0");
        assert_eq!(pf.name, "ens1f0");
        assert_eq!(pf.mac, "b8:59:9f:00:00:01");
        assert_eq!(pf.vendor, "15b3");
        assert_eq!(pf.device_id, "1017");
        assert_eq!(pf.driver, "mlx5_core");
        assert_eq!(pf.mtu, Some(1500));
        assert_eq!(pf.link_speed, "25000 Mb/s");
        assert_eq!(pf.link_type, "ETH");
        assert_eq!(pf.total_vfs, Some(8));
        assert_eq!(pf.num_vfs, Some(2));

        let vf_addresses: Vec<_> = pf.vfs.iter().map(|vf| vf.pci_address.as_str()).collect();
        assert_eq!(vf_addresses, vec!["0000:3b:00.2", "0000:3b:00.3"]);
        assert_eq!(pf.vfs[0].vf_id, 0);
        assert_eq!(pf.vfs[0].name, "ens1f0v0");
        assert_eq!(pf.vfs[1].name, "", "VF without netdev is still reported");
    }

    #[tokio::test]
    async fn device_without_netdev_is_reported() {
        let sysfs = FakeSysfs::new();
        sysfs.device("0000:5e:00.0", "0x020000");
        sysfs.write("0000:5e:00.0", "net/ib0/type", "32\n");
        sysfs.device("0000:5e:00.1", "0x020000");

        let interfaces = sysfs
            .source()
            .discover(PlatformKind::BareMetal, None)
            .await
            .unwrap();

        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].link_type, "IB");
        assert_eq!(interfaces[1].name, "");
        assert_eq!(interfaces[1].total_vfs, None);
    }

    #[tokio::test]
    async fn missing_pci_tree_is_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsDeviceSource::new(dir.path())
            .discover(PlatformKind::BareMetal, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Discovery(_)));
    }

    #[tokio::test]
    async fn virtual_platform_reports_metadata_devices_only() {
        let sysfs = FakeSysfs::new();
        sysfs.device("0000:00:04.0", "0x020000");
        sysfs.netdev("0000:00:04.0", "eth1", "fa:16:3e:aa:bb:cc");
        sysfs.device("0000:00:05.0", "0x020000");
        sysfs.netdev("0000:00:05.0", "eth2", "fa:16:3e:dd:ee:ff");

        let metadata = PlatformMetadata {
            meta_data: OpenStackMetaData {
                uuid: "instance".to_string(),
                devices: vec![OpenStackDevice {
                    vlan: Some(1100),
                    address: "0000:00:04.0".to_string(),
                    mac: "fa:16:3e:aa:bb:cc".to_string(),
                    ..Default::default()
                }],
            },
            network_data: OpenStackNetworkData {
                links: vec![OpenStackLink {
                    id: "tap1".to_string(),
                    ethernet_mac_address: "FA:16:3E:AA:BB:CC".to_string(),
                    ..Default::default()
                }],
                networks: vec![OpenStackNetwork {
                    id: "network0".to_string(),
                    link: "tap1".to_string(),
                    network_id: "3e5a-net".to_string(),
                    ..Default::default()
                }],
            },
        };

        let interfaces = sysfs
            .source()
            .discover(PlatformKind::VirtualOpenStack, Some(&metadata))
            .await
            .unwrap();

        assert_eq!(interfaces.len(), 1);
        let iface = &interfaces[0];
        assert_eq!(iface.name, "eth1");
        assert_eq!(iface.net_filter, "openstack/NetworkID:3e5a-net");
        assert_eq!(iface.num_vfs, Some(1));
        assert_eq!(iface.total_vfs, Some(1));
        assert_eq!(iface.vfs.len(), 1);
        assert_eq!(iface.vfs[0].pci_address, "0000:00:04.0");
        assert_eq!(iface.vfs[0].vlan, Some(1100));
    }

    #[tokio::test]
    async fn virtual_platform_requires_metadata() {
        let sysfs = FakeSysfs::new();
        let err = sysfs
            .source()
            .discover(PlatformKind::VirtualOpenStack, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Discovery(_)));
    }
}
