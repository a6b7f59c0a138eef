//! npudev core library
//!
//! Discovery and exclusive allocation of NPU device files, plus hwmon sensor
//! telemetry, device metadata and the processes holding device files.
//!
//! A device (`npu0`) exposes units as device nodes: the whole device
//! (`npu0`), single PEs (`npu0pe0`) and fused PE ranges (`npu0pe0-1`). Units
//! sharing a PE are mutually exclusive. Requests are expressed as a
//! [`DeviceConfig`] and resolved against live device state.
//!
//! ```no_run
//! use npudev_core::{find_device_files, DeviceConfig, DeviceResult};
//!
//! # async fn run() -> DeviceResult<()> {
//! let config = DeviceConfig::warboy().fused().count(1);
//! for file in find_device_files(&config).await? {
//!     println!("{}", file.path().display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod arch;
pub mod blocking;
pub mod config;
pub mod device;
mod error;
pub mod hwmon;
pub mod metrics;
pub mod process;
pub mod resolve;
pub mod scan;
mod sysfs;

#[cfg(test)]
mod testing;

// Re-export common types
pub use arch::Arch;
pub use config::{DeviceConfig, DeviceConfigBuilder, EnvBuilder};
pub use device::{
    create_interface, Device, DeviceFile, DeviceFileId, DeviceIdx, DeviceInfo, DeviceMode,
    NpuInterface, NpuSystem, NumaNode, PeId, PeIdx,
};
pub use error::{DeviceError, DeviceResult};
pub use hwmon::{SensorFetcher, SensorKind, SensorReading, TelemetrySnapshot};
pub use process::NpuProcess;
pub use resolve::{ClaimedDeviceFile, PeStatus};

/// List devices under `/dev` and `/sys`
pub async fn list_devices() -> DeviceResult<Vec<Device>> {
    NpuSystem::default().list_devices().await
}

/// Device with the given index
pub async fn get_device(device_index: DeviceIdx) -> DeviceResult<Device> {
    NpuSystem::default().get_device(device_index).await
}

/// Metadata of a named device file, without claiming it
pub async fn get_device_file(name: &str) -> DeviceResult<DeviceFile> {
    NpuSystem::default().get_device_file(name).await
}

/// Claim a named device file
pub async fn open_device_file(name: &str) -> DeviceResult<ClaimedDeviceFile> {
    NpuSystem::default().open_device_file(name).await
}

/// Processes holding device files under `/dev`, read from `/proc`
pub async fn scan_processes() -> DeviceResult<Vec<NpuProcess>> {
    NpuSystem::default().scan_processes().await
}

/// Claim device files matching `config`
pub async fn find_device_files(config: &DeviceConfig) -> DeviceResult<Vec<ClaimedDeviceFile>> {
    NpuSystem::default().find_device_files(config).await
}
