//! sysfs layout of NPU management and hwmon attributes

use std::io;
use std::path::{Path, PathBuf};

use crate::arch::Arch;
use crate::device::DeviceIdx;
use crate::error::{DeviceError, DeviceResult};

pub(crate) const DEVICE_TYPE: &str = "device_type";
pub(crate) const BUSNAME: &str = "busname";
pub(crate) const PCI_DEV: &str = "dev";
pub(crate) const DEVICE_SN: &str = "device_sn";
pub(crate) const DEVICE_UUID: &str = "device_uuid";
pub(crate) const FW_VERSION: &str = "fw_version";
pub(crate) const DRIVER_VERSION: &str = "version";
pub(crate) const ALIVE: &str = "alive";
pub(crate) const HEARTBEAT: &str = "heartbeat";
pub(crate) const NUMA_NODE: &str = "numa_node";

/// Path of a management attribute of one device
pub(crate) fn mgmt_path(sysfs: &Path, device_index: DeviceIdx, file: &str) -> PathBuf {
    sysfs
        .join("class/npu_mgmt")
        .join(format!("npu{}_mgmt", device_index))
        .join(file)
}

/// Read a management attribute, trimmed
pub(crate) fn read_mgmt(sysfs: &Path, device_index: DeviceIdx, file: &str) -> DeviceResult<String> {
    let path = mgmt_path(sysfs, device_index, file);
    std::fs::read_to_string(&path)
        .map(|contents| contents.trim().to_string())
        .map_err(|e| DeviceError::metadata(device_index, file, format!("{}: {}", path.display(), e)))
}

fn pci_device_path(sysfs: &Path, busname: &str) -> PathBuf {
    sysfs.join("bus/pci/devices").join(busname.trim())
}

/// Directory holding the hwmon instance of a PCI device
pub(crate) fn hwmon_root(sysfs: &Path, busname: &str) -> PathBuf {
    pci_device_path(sysfs, busname).join("hwmon")
}

/// NUMA node attribute of a PCI device
pub(crate) fn numa_node_path(sysfs: &Path, busname: &str) -> PathBuf {
    pci_device_path(sysfs, busname).join(NUMA_NODE)
}

/// Map the result of reading `device_type` into an architecture
pub(crate) fn parse_arch(device_index: DeviceIdx, contents: io::Result<String>) -> DeviceResult<Arch> {
    let contents = contents.map_err(|e| DeviceError::UnknownArchitecture {
        device_index,
        detail: format!("cannot read {}: {}", DEVICE_TYPE, e),
    })?;

    contents
        .parse()
        .map_err(|detail| DeviceError::UnknownArchitecture {
            device_index,
            detail,
        })
}
