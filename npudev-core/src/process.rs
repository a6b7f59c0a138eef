//! Processes holding device files
//!
//! Walks `/proc/<pid>/fd` and keeps descriptors linking to a device node
//! under the device namespace root. A process that exits or denies access
//! while being walked is skipped.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::trace;

use crate::device::DeviceFileId;
use crate::error::{DeviceError, DeviceResult};

/// A process with an open descriptor on a device file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct NpuProcess {
    /// Device file name (e.g. `npu0pe0-1`)
    pub device_file: String,
    pub pid: u32,
    /// Arguments joined by spaces
    pub cmdline: String,
}

impl NpuProcess {
    pub fn device_file(&self) -> &str {
        &self.device_file
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }
}

fn read_cmdline(proc_dir: &Path) -> Option<String> {
    let raw = fs::read(proc_dir.join("cmdline")).ok()?;
    Some(String::from_utf8_lossy(&raw).replace('\0', " ").trim().to_string())
}

/// Name of the device file a descriptor link points at
fn device_file_of(link: &Path, devfs: &Path) -> Option<String> {
    if link.parent()? != devfs {
        return None;
    }
    let name = link.file_name()?.to_str()?;
    DeviceFileId::parse_node_name(name)?;
    Some(name.to_string())
}

/// Every (device file, process) pair, sorted by device file then pid
pub(crate) fn scan_processes_in(procfs: &Path, devfs: &Path) -> DeviceResult<Vec<NpuProcess>> {
    let entries = fs::read_dir(procfs).map_err(|source| DeviceError::Scan {
        path: procfs.to_path_buf(),
        source,
    })?;

    let mut processes = Vec::new();
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let proc_dir = entry.path();
        let fds = match fs::read_dir(proc_dir.join("fd")) {
            Ok(fds) => fds,
            Err(e) => {
                trace!(pid, error = %e, "Skipping process");
                continue;
            }
        };

        let mut held: Vec<String> = fds
            .flatten()
            .filter_map(|fd| fs::read_link(fd.path()).ok())
            .filter_map(|link| device_file_of(&link, devfs))
            .collect();
        if held.is_empty() {
            continue;
        }
        let Some(cmdline) = read_cmdline(&proc_dir) else {
            trace!(pid, "Process exited while scanning");
            continue;
        };

        held.sort();
        held.dedup();
        processes.extend(held.into_iter().map(|device_file| NpuProcess {
            device_file,
            pid,
            cmdline: cmdline.clone(),
        }));
    }

    processes.sort();
    Ok(processes)
}
