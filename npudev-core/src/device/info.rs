//! Device metadata from the management sysfs directory
//!
//! Attributes are read on every call. Firmware state such as `alive` and
//! `heartbeat` changes while the device runs.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::{Device, DeviceIdx};
use crate::arch::Arch;
use crate::error::{DeviceError, DeviceResult};
use crate::sysfs;

/// NUMA node of the PCI lane a device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumaNode {
    /// The platform reports no affinity (`-1`)
    Unsupported,
    Id(usize),
}

impl fmt::Display for NumaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumaNode::Unsupported => write!(f, "unsupported"),
            NumaNode::Id(id) => write!(f, "{}", id),
        }
    }
}

fn parse_alive(value: &str) -> Option<bool> {
    match value.trim() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

fn parse_numa_node(value: &str) -> Option<NumaNode> {
    match value.trim().parse::<i64>().ok()? {
        -1 => Some(NumaNode::Unsupported),
        id => usize::try_from(id).ok().map(NumaNode::Id),
    }
}

fn unexpected(device_index: DeviceIdx, attribute: &str, value: &str) -> DeviceError {
    DeviceError::metadata(device_index, attribute, format!("unexpected value '{}'", value))
}

/// Snapshot of a device's metadata; attributes that could not be read are `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device: String,
    pub arch: Arch,
    pub busname: Option<String>,
    pub pci_dev: Option<String>,
    pub device_sn: Option<String>,
    pub device_uuid: Option<String>,
    pub firmware_version: Option<String>,
    pub driver_version: Option<String>,
    pub alive: Option<bool>,
    pub heartbeat: Option<u32>,
    pub numa_node: Option<NumaNode>,
}

impl Device {
    fn mgmt(&self, attribute: &str) -> DeviceResult<String> {
        sysfs::read_mgmt(self.sysfs(), self.device_index(), attribute)
    }

    /// PCI bus address (e.g. `0000:6d:00.0`)
    pub fn busname(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::BUSNAME)
    }

    /// Character device number (`major:minor`)
    pub fn pci_dev(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::PCI_DEV)
    }

    pub fn device_sn(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::DEVICE_SN)
    }

    pub fn device_uuid(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::DEVICE_UUID)
    }

    pub fn firmware_version(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::FW_VERSION)
    }

    /// Version of the kernel driver bound to the device
    pub fn driver_version(&self) -> DeviceResult<String> {
        self.mgmt(sysfs::DRIVER_VERSION)
    }

    /// Liveness reported by the firmware
    pub fn alive(&self) -> DeviceResult<bool> {
        let value = self.mgmt(sysfs::ALIVE)?;
        parse_alive(&value).ok_or_else(|| unexpected(self.device_index(), sysfs::ALIVE, &value))
    }

    /// Firmware heartbeat counter
    pub fn heartbeat(&self) -> DeviceResult<u32> {
        let value = self.mgmt(sysfs::HEARTBEAT)?;
        value
            .parse()
            .map_err(|_| unexpected(self.device_index(), sysfs::HEARTBEAT, &value))
    }

    pub fn numa_node(&self) -> DeviceResult<NumaNode> {
        let busname = self.busname()?;
        let path = sysfs::numa_node_path(self.sysfs(), &busname);
        let value = std::fs::read_to_string(&path).map_err(|e| {
            DeviceError::metadata(
                self.device_index(),
                sysfs::NUMA_NODE,
                format!("{}: {}", path.display(), e),
            )
        })?;
        parse_numa_node(&value)
            .ok_or_else(|| unexpected(self.device_index(), sysfs::NUMA_NODE, value.trim()))
    }

    /// Read every metadata attribute
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            device: self.name(),
            arch: self.arch(),
            busname: self.optional(self.busname()),
            pci_dev: self.optional(self.pci_dev()),
            device_sn: self.optional(self.device_sn()),
            device_uuid: self.optional(self.device_uuid()),
            firmware_version: self.optional(self.firmware_version()),
            driver_version: self.optional(self.driver_version()),
            alive: self.optional(self.alive()),
            heartbeat: self.optional(self.heartbeat()),
            numa_node: self.optional(self.numa_node()),
        }
    }

    fn optional<T>(&self, result: DeviceResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(device = %self, error = %e, "Metadata unavailable");
                None
            }
        }
    }
}
