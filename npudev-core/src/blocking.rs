//! Blocking counterparts of the async API
//!
//! Same semantics and errors as the async calls; resolution is the shared
//! algorithm in [`crate::resolve`].

use std::collections::BTreeMap;
use std::path::Path;

use crate::arch::Arch;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceFile, DeviceIdx, NpuSystem, PeIdx};
use crate::error::{DeviceError, DeviceResult};
use crate::process::{self, NpuProcess};
use crate::resolve::{self, ClaimedDeviceFile, PeStatus};

/// Scan a device namespace, sorted by device index then PE unit
pub fn scan<P: AsRef<Path>>(devfs: P) -> DeviceResult<Vec<DeviceFile>> {
    crate::scan::scan_blocking(devfs.as_ref())
}

/// Read the architecture of one device from sysfs
pub fn identify<P: AsRef<Path>>(sysfs: P, device_index: DeviceIdx) -> DeviceResult<Arch> {
    crate::scan::identify_blocking(sysfs.as_ref(), device_index)
}

/// Scan `devfs` and build the topology against `sysfs`
pub fn list_devices_with<P, Q>(devfs: P, sysfs: Q) -> DeviceResult<Vec<Device>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    crate::scan::list_devices_blocking(devfs.as_ref(), sysfs.as_ref())
}

impl NpuSystem {
    pub fn list_devices_blocking(&self) -> DeviceResult<Vec<Device>> {
        list_devices_with(self.devfs(), self.sysfs())
    }

    pub fn get_device_blocking(&self, device_index: DeviceIdx) -> DeviceResult<Device> {
        self.list_devices_blocking()?
            .into_iter()
            .find(|d| d.device_index() == device_index)
            .ok_or_else(|| DeviceError::DeviceNotFound(format!("npu{}", device_index)))
    }

    pub fn get_device_file_blocking(&self, name: &str) -> DeviceResult<DeviceFile> {
        let devices = self.list_devices_blocking()?;
        resolve::lookup(&devices, name).cloned()
    }

    pub fn find_device_files_blocking(
        &self,
        config: &DeviceConfig,
    ) -> DeviceResult<Vec<ClaimedDeviceFile>> {
        let devices = self.list_devices_blocking()?;
        resolve::find_in(config, &devices)
    }

    pub fn open_device_file_blocking(&self, name: &str) -> DeviceResult<ClaimedDeviceFile> {
        let devices = self.list_devices_blocking()?;
        resolve::open_in(&devices, name)
    }

    pub fn scan_processes_blocking(&self) -> DeviceResult<Vec<NpuProcess>> {
        process::scan_processes_in(self.procfs(), self.devfs())
    }
}

/// List devices under `/dev` and `/sys`
pub fn list_devices() -> DeviceResult<Vec<Device>> {
    NpuSystem::default().list_devices_blocking()
}

pub fn get_device(device_index: DeviceIdx) -> DeviceResult<Device> {
    NpuSystem::default().get_device_blocking(device_index)
}

pub fn get_device_file(name: &str) -> DeviceResult<DeviceFile> {
    NpuSystem::default().get_device_file_blocking(name)
}

pub fn find_device_files(config: &DeviceConfig) -> DeviceResult<Vec<ClaimedDeviceFile>> {
    NpuSystem::default().find_device_files_blocking(config)
}

pub fn open_device_file(name: &str) -> DeviceResult<ClaimedDeviceFile> {
    NpuSystem::default().open_device_file_blocking(name)
}

pub fn pe_status(device: &Device) -> DeviceResult<BTreeMap<PeIdx, PeStatus>> {
    resolve::pe_status(device)
}

/// Processes holding device files under `/dev`, read from `/proc`
pub fn scan_processes() -> DeviceResult<Vec<NpuProcess>> {
    NpuSystem::default().scan_processes_blocking()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan as async_scan;
    use crate::testing::Fixture;

    fn system(fixture: &Fixture) -> NpuSystem {
        NpuSystem::new(fixture.devfs(), fixture.sysfs())
    }

    #[tokio::test]
    async fn test_blocking_matches_async_scan() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        fixture.add_node("npu0pe1-0");
        fixture.add_node("ttyS0");

        assert_eq!(scan(fixture.devfs())?, async_scan::scan(fixture.devfs()).await?);
        assert_eq!(
            list_devices_with(fixture.devfs(), fixture.sysfs())?,
            async_scan::list_devices_with(fixture.devfs(), fixture.sysfs()).await?
        );
        Ok(())
    }

    #[test]
    fn test_scan_missing_namespace() {
        assert!(matches!(
            scan("/nonexistent/devfs"),
            Err(DeviceError::Scan { .. })
        ));
    }

    #[test]
    fn test_blocking_find() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        let system = system(&fixture);

        let held = system.open_device_file_blocking("npu0pe0")?;
        let err = system
            .find_device_files_blocking(&"npu0pe0".parse()?)
            .unwrap_err();
        assert!(err.to_string().ends_with("found but still in use"));

        let found = system.find_device_files_blocking(&DeviceConfig::warboy().count(1))?;
        assert_eq!(found[0].name(), "npu0pe1");
        drop(held);
        Ok(())
    }

    #[test]
    fn test_blocking_lookups() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        let system = system(&fixture);

        assert_eq!(system.get_device_blocking(0)?.arch(), Arch::Warboy);
        assert_eq!(
            system.get_device_file_blocking("npu1pe1")?.filename(),
            "npu1pe1"
        );
        assert!(matches!(
            system.get_device_blocking(9),
            Err(DeviceError::DeviceNotFound(_))
        ));

        let device = system.get_device_blocking(1)?;
        assert_eq!(pe_status(&device)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_blocking_find_with_overlap_exclusive_nodes() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        fixture.link_node("npu0pe0-1", "npu0pe0");
        let system = system(&fixture);

        let found = system.find_device_files_blocking(&"npu0pe0".parse()?)?;
        assert_eq!(found[0].name(), "npu0pe0");
        drop(found);

        let found = system.find_device_files_blocking(&DeviceConfig::warboy().count(1))?;
        assert_eq!(found[0].name(), "npu0pe0");
        Ok(())
    }

    #[test]
    fn test_blocking_find_rejects_overlapping_names() {
        let fixture = Fixture::warboy_pair();
        let system = system(&fixture);

        let err = "npu0pe0,npu0pe0-1".parse::<DeviceConfig>().unwrap_err();
        assert!(matches!(err, DeviceError::InvalidSpecifier { .. }));
        assert!(system.find_device_files_blocking(&"npu0pe0".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_blocking_scan_processes() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        fixture.add_process(5150, &["infer", "--device", "npu0pe0-1"], &["npu0pe0-1"]);
        let system = system(&fixture).with_procfs(fixture.procfs());

        let processes = system.scan_processes_blocking()?;
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].cmdline(), "infer --device npu0pe0-1");
        Ok(())
    }
}
