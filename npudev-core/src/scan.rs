//! Device node scanner
//!
//! Enumerates the device namespace and keeps the nodes whose names follow the
//! device file grammar. Everything else in the namespace is ignored.
//!
//! The async functions run the same blocking scan on tokio's blocking pool,
//! so both calling conventions see identical results.

use std::fs::{self, FileType};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::arch::Arch;
use crate::device::{self, Device, DeviceFile, DeviceIdx};
use crate::error::{DeviceError, DeviceResult};
use crate::sysfs;

/// Regular files are accepted so fixture trees can stand in for `/dev`.
fn is_device_node(file_type: FileType) -> bool {
    file_type.is_char_device() || file_type.is_file()
}

/// Turn one namespace entry into a device file, if it is one
fn accept_entry(path: PathBuf, file_type: FileType) -> Option<DeviceFile> {
    if !is_device_node(file_type) {
        return None;
    }
    let file = DeviceFile::from_path(&path);
    if file.is_none() {
        trace!(path = ?path, "Skipping non-device node");
    }
    file
}

fn scan_error(devfs: &Path, source: std::io::Error) -> DeviceError {
    DeviceError::Scan {
        path: devfs.to_path_buf(),
        source,
    }
}

/// Distinct device indices of scanned files, ascending
fn device_indices(files: &[DeviceFile]) -> Vec<DeviceIdx> {
    let mut indices: Vec<DeviceIdx> = files.iter().map(|f| f.device_index()).collect();
    indices.dedup();
    indices
}

fn take_arch(
    archs: &mut Vec<(DeviceIdx, DeviceResult<Arch>)>,
    device_index: DeviceIdx,
) -> DeviceResult<Arch> {
    match archs.iter().position(|(idx, _)| *idx == device_index) {
        Some(pos) => archs.swap_remove(pos).1,
        None => Err(DeviceError::UnknownArchitecture {
            device_index,
            detail: "device was not identified".to_string(),
        }),
    }
}

pub(crate) fn scan_blocking(devfs: &Path) -> DeviceResult<Vec<DeviceFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(devfs).map_err(|e| scan_error(devfs, e))? {
        let entry = entry.map_err(|e| scan_error(devfs, e))?;
        // Entries can vanish between listing and stat
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                trace!(path = ?entry.path(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if let Some(file) = accept_entry(entry.path(), file_type) {
            files.push(file);
        }
    }

    files.sort();
    Ok(files)
}

pub(crate) fn identify_blocking(sysfs: &Path, device_index: DeviceIdx) -> DeviceResult<Arch> {
    let path = sysfs::mgmt_path(sysfs, device_index, sysfs::DEVICE_TYPE);
    sysfs::parse_arch(device_index, fs::read_to_string(path))
}

pub(crate) fn list_devices_blocking(devfs: &Path, sysfs: &Path) -> DeviceResult<Vec<Device>> {
    let files = scan_blocking(devfs)?;
    let mut archs: Vec<_> = device_indices(&files)
        .into_iter()
        .map(|idx| (idx, identify_blocking(sysfs, idx)))
        .collect();

    Ok(device::build(files, sysfs, |idx| take_arch(&mut archs, idx)))
}

/// Scan a device namespace, sorted by device index then PE unit
pub async fn scan<P: AsRef<Path>>(devfs: P) -> DeviceResult<Vec<DeviceFile>> {
    let devfs = devfs.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&devfs)).await?
}

/// Read the architecture of one device from sysfs
pub async fn identify<P: AsRef<Path>>(sysfs: P, device_index: DeviceIdx) -> DeviceResult<Arch> {
    let sysfs = sysfs.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || identify_blocking(&sysfs, device_index)).await?
}

/// Scan `devfs` and build the topology against `sysfs`
pub async fn list_devices_with<P, Q>(devfs: P, sysfs: Q) -> DeviceResult<Vec<Device>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let devfs = devfs.as_ref().to_path_buf();
    let sysfs = sysfs.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || list_devices_blocking(&devfs, &sysfs)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn test_scan_sorted_and_filtered() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        fixture.add_node("npu0_mgmt");
        fixture.add_node("tty0");
        fixture.add_node("npu0pe1-0");
        std::fs::create_dir(fixture.node_path("npu5")).unwrap();

        let files = scan(fixture.devfs()).await?;
        let names: Vec<String> = files.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec![
                "npu0", "npu0pe0", "npu0pe1", "npu0pe0-1", "npu1", "npu1pe0", "npu1pe1",
                "npu1pe0-1",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_missing_namespace() {
        let err = scan("/nonexistent/devfs").await.unwrap_err();
        assert!(matches!(err, DeviceError::Scan { .. }));
    }

    #[tokio::test]
    async fn test_identify() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        assert_eq!(identify(fixture.sysfs(), 0).await?, Arch::Warboy);
        assert!(matches!(
            identify(fixture.sysfs(), 7).await,
            Err(DeviceError::UnknownArchitecture { device_index: 7, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_devices_skips_unidentified() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        fixture.add_node("npu2pe0");

        let devices = list_devices_with(fixture.devfs(), fixture.sysfs()).await?;
        let names: Vec<String> = devices.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["npu0", "npu1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_devices_idempotent() -> DeviceResult<()> {
        let fixture = Fixture::warboy_pair();
        let first = list_devices_with(fixture.devfs(), fixture.sysfs()).await?;
        let second = list_devices_with(fixture.devfs(), fixture.sysfs()).await?;
        assert_eq!(first, second);
        Ok(())
    }
}
