//! Device topology model
//!
//! Groups scanned device files by device index into [`Device`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use super::file::{DeviceFile, DeviceFileId, DeviceIdx, DeviceMode, PeIdx};
use crate::arch::Arch;
use crate::error::DeviceResult;

/// A physical NPU device and the units it exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    device_index: DeviceIdx,
    arch: Arch,
    pes: Vec<PeIdx>,
    files: Vec<DeviceFile>,
    #[serde(skip)]
    sysfs: PathBuf,
}

impl Device {
    pub(crate) fn new(
        device_index: DeviceIdx,
        arch: Arch,
        mut files: Vec<DeviceFile>,
        sysfs: PathBuf,
    ) -> Self {
        files.sort();
        Self {
            device_index,
            arch,
            pes: arch.pe_indices(),
            files,
            sysfs,
        }
    }

    /// Device name (e.g. `npu0`)
    pub fn name(&self) -> String {
        format!("npu{}", self.device_index)
    }

    pub fn device_index(&self) -> DeviceIdx {
        self.device_index
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// PE indices physically present on this device
    pub fn pe_indices(&self) -> &[PeIdx] {
        &self.pes
    }

    /// All units of this device, sorted by PE unit
    pub fn list_device_files(&self) -> &[DeviceFile] {
        &self.files
    }

    pub fn files_with_mode(&self, mode: DeviceMode) -> impl Iterator<Item = &DeviceFile> + '_ {
        self.files.iter().filter(move |f| f.mode() == mode)
    }

    pub fn single_files(&self) -> impl Iterator<Item = &DeviceFile> + '_ {
        self.files_with_mode(DeviceMode::Single)
    }

    pub fn fused_files(&self) -> impl Iterator<Item = &DeviceFile> + '_ {
        self.files_with_mode(DeviceMode::Fusion)
    }

    pub fn whole_file(&self) -> Option<&DeviceFile> {
        self.files_with_mode(DeviceMode::Whole).next()
    }

    pub fn find_file(&self, id: &DeviceFileId) -> Option<&DeviceFile> {
        self.files.iter().find(|f| f.id() == *id)
    }

    /// Units other than `file` that contend for at least one of its PEs
    pub fn overlapping<'a>(
        &'a self,
        file: &'a DeviceFile,
    ) -> impl Iterator<Item = &'a DeviceFile> + 'a {
        self.files
            .iter()
            .filter(move |f| *f != file && f.overlaps(file))
    }

    pub(crate) fn sysfs(&self) -> &Path {
        &self.sysfs
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npu{}", self.device_index)
    }
}

/// Group scanned files into devices sorted by device index
///
/// `identify` is asked once per discovered device index. A device whose
/// architecture cannot be identified is excluded and the rest are still built.
pub fn build<F>(files: Vec<DeviceFile>, sysfs: &Path, mut identify: F) -> Vec<Device>
where
    F: FnMut(DeviceIdx) -> DeviceResult<Arch>,
{
    let mut grouped: BTreeMap<DeviceIdx, Vec<DeviceFile>> = BTreeMap::new();
    for file in files {
        grouped.entry(file.device_index()).or_default().push(file);
    }

    let mut devices = Vec::with_capacity(grouped.len());
    for (device_index, files) in grouped {
        let arch = match identify(device_index) {
            Ok(arch) => arch,
            Err(e) => {
                warn!(device = device_index, error = %e, "Excluding device");
                continue;
            }
        };

        let present = arch.pe_indices();
        let files: Vec<DeviceFile> = files
            .into_iter()
            .filter(|file| {
                let fits = file
                    .pe_indices(&present)
                    .iter()
                    .all(|pe| present.contains(pe));
                if !fits {
                    warn!(
                        file = %file,
                        arch = %arch,
                        "Ignoring device file with PEs outside the device"
                    );
                }
                fits
            })
            .collect();

        debug!(device = device_index, arch = %arch, files = files.len(), "Built device");
        devices.push(Device::new(device_index, arch, files, sysfs.to_path_buf()));
    }

    devices
}
