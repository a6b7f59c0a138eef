//! Availability resolver
//!
//! Claims device files with exclusive-access semantics. A claim is a single
//! open attempt that returns the handle, so probing and acquiring cannot race.
//!
//! A unit is usable only when it can be claimed and none of the units sharing
//! a PE with it (its fused ranges, its constituent PEs, the whole device) is
//! currently held by anyone.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Deref;
use std::os::unix::io::{AsRawFd, RawFd};

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::{expand, DeviceConfig, ResolutionPlan, ResolvePolicy, SelectorGroup};
use crate::device::{Device, DeviceFile, DeviceFileId, PeIdx};
use crate::error::{DeviceError, DeviceResult};
use crate::metrics::MetricsRegistry;

/// An exclusively held device file
///
/// The unit stays claimed until the handle is dropped.
#[derive(Debug)]
pub struct ClaimedDeviceFile {
    file: DeviceFile,
    handle: File,
}

impl ClaimedDeviceFile {
    pub fn file(&self) -> &DeviceFile {
        &self.file
    }

    /// Release the claim, keeping the metadata
    pub fn release(self) -> DeviceFile {
        self.file
    }
}

impl Deref for ClaimedDeviceFile {
    type Target = DeviceFile;

    fn deref(&self) -> &DeviceFile {
        &self.file
    }
}

impl AsRawFd for ClaimedDeviceFile {
    fn as_raw_fd(&self) -> RawFd {
        self.handle.as_raw_fd()
    }
}

impl fmt::Display for ClaimedDeviceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.file, f)
    }
}

fn is_busy(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EBUSY || code == libc::EWOULDBLOCK)
}

/// Try to claim one device file; `Ok(None)` means someone else holds it
///
/// The driver refuses a second open with `EBUSY`. An advisory `flock` on top
/// gives the same semantics on nodes without driver-side exclusivity.
pub fn try_claim(file: &DeviceFile) -> DeviceResult<Option<ClaimedDeviceFile>> {
    let handle = match OpenOptions::new().read(true).write(true).open(file.path()) {
        Ok(handle) => handle,
        Err(e) if is_busy(&e) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DeviceError::DeviceNotFound(file.name()))
        }
        Err(e) => return Err(e.into()),
    };

    // SAFETY: the descriptor is owned by `handle` and open for this call
    let rc = unsafe { libc::flock(handle.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let e = io::Error::last_os_error();
        if is_busy(&e) {
            return Ok(None);
        }
        return Err(e.into());
    }

    Ok(Some(ClaimedDeviceFile {
        file: file.clone(),
        handle,
    }))
}

/// Whether another holder currently has `file`
///
/// A node that vanished since enumeration holds nothing.
fn is_held(file: &DeviceFile) -> DeviceResult<bool> {
    match try_claim(file) {
        Ok(claim) => Ok(claim.is_none()),
        Err(DeviceError::DeviceNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

fn claim_candidate(
    candidate: &DeviceFile,
    devices: &[Device],
    claimed: &[ClaimedDeviceFile],
) -> DeviceResult<Option<ClaimedDeviceFile>> {
    if let Some(mine) = claimed.iter().find(|c| c.overlaps(candidate)) {
        trace!(candidate = %candidate, claimed = %mine, "Overlaps a unit claimed by this resolution");
        return Ok(None);
    }

    // Check overlapping units first; a held candidate makes overlapping nodes refuse opens
    let device = devices
        .iter()
        .find(|d| d.device_index() == candidate.device_index());
    for other in device.into_iter().flat_map(|d| d.overlapping(candidate)) {
        // Our own claims make their overlapping nodes refuse opens
        if claimed.iter().any(|c| c.overlaps(other)) {
            continue;
        }
        if is_held(other)? {
            debug!(candidate = %candidate, holder = %other, "Overlapping unit is busy");
            return Ok(None);
        }
    }

    match try_claim(candidate)? {
        Some(claim) => {
            trace!(candidate = %candidate, "Claimed");
            Ok(Some(claim))
        }
        None => {
            debug!(candidate = %candidate, "Candidate is busy");
            Ok(None)
        }
    }
}

fn claim_group(
    group: &SelectorGroup,
    devices: &[Device],
    claimed: &[ClaimedDeviceFile],
) -> DeviceResult<Option<ClaimedDeviceFile>> {
    for candidate in group.candidates() {
        if let Some(claim) = claim_candidate(candidate, devices, claimed)? {
            return Ok(Some(claim));
        }
    }
    Ok(None)
}

fn group_name(group: &SelectorGroup) -> String {
    match group.candidates() {
        [only] => only.name(),
        _ => "candidates".to_string(),
    }
}

/// Claim one unit per selector group, re-checking liveness of every candidate
///
/// Under [`ResolvePolicy::AllOrNothing`] a busy group fails the call. Under
/// [`ResolvePolicy::BestEffort`] busy groups are dropped and the call fails
/// only if all of them are busy. Claims taken before a failure are released.
///
/// Units overlapping a candidate are checked by claiming and immediately
/// releasing them. While such a check holds a unit, another process claiming that
/// unit (or anything overlapping it) can get a spurious
/// [`DeviceError::DeviceBusy`]. Callers polling for devices should treat
/// busy as retryable, see [`DeviceError::is_retryable`].
pub fn resolve(plan: &ResolutionPlan, devices: &[Device]) -> DeviceResult<Vec<ClaimedDeviceFile>> {
    let mut claimed: Vec<ClaimedDeviceFile> = Vec::with_capacity(plan.groups().len());
    let mut busy: Vec<String> = Vec::new();

    for group in plan.groups() {
        match claim_group(group, devices, &claimed)? {
            Some(claim) => claimed.push(claim),
            None => match plan.policy() {
                ResolvePolicy::AllOrNothing => {
                    debug!(config = %plan.config(), claimed = claimed.len(), "Group unsatisfiable, releasing");
                    return Err(DeviceError::device_busy(plan.config()));
                }
                ResolvePolicy::BestEffort => busy.push(group_name(group)),
            },
        }
    }

    if claimed.is_empty() {
        let name = if busy.is_empty() {
            plan.config().to_string()
        } else {
            busy.join(",")
        };
        return Err(DeviceError::device_busy(name));
    }
    if !busy.is_empty() {
        debug!(skipped = %busy.join(","), "Skipped busy device files");
    }

    Ok(claimed)
}

/// Expand and resolve `config` against `devices`, counting the outcome
pub(crate) fn find_in(config: &DeviceConfig, devices: &[Device]) -> DeviceResult<Vec<ClaimedDeviceFile>> {
    let result = expand(config, devices).and_then(|plan| resolve(&plan, devices));
    MetricsRegistry::new().observe_resolve(&result);
    result
}

/// Look up a named device file in `devices` without claiming it
pub(crate) fn lookup<'a>(devices: &'a [Device], name: &str) -> DeviceResult<&'a DeviceFile> {
    let id: DeviceFileId = name.trim().parse()?;
    devices
        .iter()
        .filter(|d| d.device_index() == id.device_index)
        .find_map(|d| d.find_file(&id))
        .ok_or_else(|| DeviceError::DeviceNotFound(id.to_string()))
}

/// Claim one named device file
pub(crate) fn open_in(devices: &[Device], name: &str) -> DeviceResult<ClaimedDeviceFile> {
    let id = lookup(devices, name)?.id();
    let mut claimed = find_in(&DeviceConfig::Explicit(vec![id]), devices)?;
    claimed
        .pop()
        .ok_or_else(|| DeviceError::device_busy(id))
}

/// Occupancy of one PE
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeStatus {
    Available,
    /// Held through the named device file
    Occupied(String),
}

impl fmt::Display for PeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeStatus::Available => write!(f, "available"),
            PeStatus::Occupied(name) => write!(f, "occupied by {}", name),
        }
    }
}

/// Test-claim every unit of `device` and report each PE's occupancy
pub fn pe_status(device: &Device) -> DeviceResult<BTreeMap<PeIdx, PeStatus>> {
    let mut status: BTreeMap<PeIdx, PeStatus> = device
        .pe_indices()
        .iter()
        .map(|pe| (*pe, PeStatus::Available))
        .collect();

    for file in device.list_device_files() {
        if !is_held(file)? {
            continue;
        }
        for pe in file.pe_indices(device.pe_indices()) {
            if let Some(entry) = status.get_mut(&pe) {
                if *entry == PeStatus::Available {
                    *entry = PeStatus::Occupied(file.filename());
                }
            }
        }
    }

    Ok(status)
}
