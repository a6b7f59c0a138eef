//! Device interface trait
//!
//! Defines the async surface over an NPU device namespace and its sysfs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Device, DeviceFile, DeviceIdx, DeviceInfo, PeIdx};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::hwmon::TelemetrySnapshot;
use crate::process::{self, NpuProcess};
use crate::resolve::{self, ClaimedDeviceFile, PeStatus};
use crate::scan;

/// Device interface trait
///
/// Every call re-reads the namespace; implementations keep no topology cache.
#[async_trait]
pub trait NpuInterface: Send + Sync {
    /// List all identified devices, sorted by index
    async fn list_devices(&self) -> DeviceResult<Vec<Device>>;

    /// Claim device files matching `config`
    async fn find_device_files(
        &self,
        config: &DeviceConfig,
    ) -> DeviceResult<Vec<ClaimedDeviceFile>>;

    /// Claim one named device file (e.g. `npu0pe0-1`)
    async fn open_device_file(&self, name: &str) -> DeviceResult<ClaimedDeviceFile>;

    /// Occupancy of every PE of `device`
    async fn pe_status(&self, device: &Device) -> DeviceResult<BTreeMap<PeIdx, PeStatus>>;

    /// Processes holding device files, sorted by device file then pid
    async fn scan_processes(&self) -> DeviceResult<Vec<NpuProcess>>;

    async fn get_device(&self, device_index: DeviceIdx) -> DeviceResult<Device> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|d| d.device_index() == device_index)
            .ok_or_else(|| DeviceError::DeviceNotFound(format!("npu{}", device_index)))
    }

    /// Metadata of one named device file, without claiming it
    async fn get_device_file(&self, name: &str) -> DeviceResult<DeviceFile> {
        let devices = self.list_devices().await?;
        resolve::lookup(&devices, name).cloned()
    }

    /// Read all sensor categories of `device`
    async fn read_sensors(&self, device: &Device) -> DeviceResult<TelemetrySnapshot> {
        device.sensor_fetcher().snapshot().await
    }

    /// Management metadata of `device`
    async fn device_info(&self, device: &Device) -> DeviceResult<DeviceInfo> {
        let device = device.clone();
        Ok(tokio::task::spawn_blocking(move || device.info()).await?)
    }
}

/// Device namespace, sysfs and procfs roots of a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpuSystem {
    devfs: PathBuf,
    sysfs: PathBuf,
    procfs: PathBuf,
}

impl NpuSystem {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(devfs: P, sysfs: Q) -> Self {
        Self {
            devfs: devfs.into(),
            sysfs: sysfs.into(),
            procfs: PathBuf::from("/proc"),
        }
    }

    pub fn with_procfs<P: Into<PathBuf>>(mut self, procfs: P) -> Self {
        self.procfs = procfs.into();
        self
    }

    pub fn devfs(&self) -> &Path {
        &self.devfs
    }

    pub fn sysfs(&self) -> &Path {
        &self.sysfs
    }

    pub fn procfs(&self) -> &Path {
        &self.procfs
    }
}

impl Default for NpuSystem {
    fn default() -> Self {
        Self::new("/dev", "/sys")
    }
}

#[async_trait]
impl NpuInterface for NpuSystem {
    async fn list_devices(&self) -> DeviceResult<Vec<Device>> {
        scan::list_devices_with(&self.devfs, &self.sysfs).await
    }

    async fn find_device_files(
        &self,
        config: &DeviceConfig,
    ) -> DeviceResult<Vec<ClaimedDeviceFile>> {
        let devices = self.list_devices().await?;
        let config = config.clone();
        tokio::task::spawn_blocking(move || resolve::find_in(&config, &devices)).await?
    }

    async fn open_device_file(&self, name: &str) -> DeviceResult<ClaimedDeviceFile> {
        let devices = self.list_devices().await?;
        let name = name.to_string();
        tokio::task::spawn_blocking(move || resolve::open_in(&devices, &name)).await?
    }

    async fn pe_status(&self, device: &Device) -> DeviceResult<BTreeMap<PeIdx, PeStatus>> {
        let device = device.clone();
        tokio::task::spawn_blocking(move || resolve::pe_status(&device)).await?
    }

    async fn scan_processes(&self) -> DeviceResult<Vec<NpuProcess>> {
        let system = self.clone();
        tokio::task::spawn_blocking(move || system.scan_processes_blocking()).await?
    }
}

/// Shared interface over the given roots
pub fn create_interface(system: NpuSystem) -> Arc<dyn NpuInterface> {
    Arc::new(system)
}
