//! Device file naming and identity
//!
//! Device nodes follow a fixed grammar:
//! - `npu<N>`: the whole device
//! - `npu<N>pe<K>`: a single PE
//! - `npu<N>pe<A>-<B>`: PEs `A..=B` fused into one unit (`A < B`)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Index of a physical device (the `0` in `npu0`)
pub type DeviceIdx = u8;

/// Index of a processing element within one device
pub type PeIdx = u8;

static NODE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^npu(?P<device>0|[1-9]\d*)(?:pe(?P<start>0|[1-9]\d*)(?:-(?P<end>0|[1-9]\d*))?)?$",
    )
        .expect("node name pattern is valid")
});

/// Addressable PE unit of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawPeId")]
pub enum PeId {
    /// One PE
    Single(PeIdx),
    /// Contiguous PEs `start..=end`, `start < end`
    Fused { start: PeIdx, end: PeIdx },
}

/// Wire shape of [`PeId`], checked before it becomes one
#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawPeId {
    Single(PeIdx),
    Fused { start: PeIdx, end: PeIdx },
}

impl TryFrom<RawPeId> for PeId {
    type Error = String;

    fn try_from(raw: RawPeId) -> Result<Self, Self::Error> {
        match raw {
            RawPeId::Single(pe) => Ok(PeId::Single(pe)),
            RawPeId::Fused { start, end } => PeId::fused(start, end)
                .ok_or_else(|| format!("fused range {}-{} is not ascending", start, end)),
        }
    }
}

impl PeId {
    /// Build a fused range, `None` unless `start < end`
    pub fn fused(start: PeIdx, end: PeIdx) -> Option<Self> {
        (start < end).then_some(PeId::Fused { start, end })
    }

    /// Constituent PE indices, ascending
    pub fn indices(&self) -> Vec<PeIdx> {
        match *self {
            PeId::Single(pe) => vec![pe],
            PeId::Fused { start, end } => (start..=end).collect(),
        }
    }

    pub fn contains(&self, pe: PeIdx) -> bool {
        match *self {
            PeId::Single(idx) => idx == pe,
            PeId::Fused { start, end } => (start..=end).contains(&pe),
        }
    }

    /// Number of constituent PEs; a hand-built descending range has none
    pub fn len(&self) -> usize {
        match *self {
            PeId::Single(_) => 1,
            PeId::Fused { start, end } if start <= end => usize::from(end - start) + 1,
            PeId::Fused { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn last(&self) -> PeIdx {
        match *self {
            PeId::Single(pe) => pe,
            PeId::Fused { end, .. } => end,
        }
    }

    fn first(&self) -> PeIdx {
        match *self {
            PeId::Single(pe) => pe,
            PeId::Fused { start, .. } => start,
        }
    }

    /// Whether two units share at least one PE
    pub fn overlaps(&self, other: &PeId) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }
}

impl fmt::Display for PeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeId::Single(pe) => write!(f, "{}", pe),
            PeId::Fused { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

/// Topology mode of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Single-PE units
    Single,
    /// Fused multi-PE units
    Fusion,
    /// Whole-device units
    Whole,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Single => write!(f, "single"),
            DeviceMode::Fusion => write!(f, "fused"),
            DeviceMode::Whole => write!(f, "whole"),
        }
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(DeviceMode::Single),
            "fused" | "fusion" => Ok(DeviceMode::Fusion),
            "whole" => Ok(DeviceMode::Whole),
            other => Err(format!("unrecognized mode '{}'", other)),
        }
    }
}

/// Identity of a device file: device index plus optional PE unit
///
/// `pe == None` addresses the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceFileId {
    pub device_index: DeviceIdx,
    pub pe: Option<PeId>,
}

impl DeviceFileId {
    pub fn whole(device_index: DeviceIdx) -> Self {
        Self {
            device_index,
            pe: None,
        }
    }

    pub fn single(device_index: DeviceIdx, pe: PeIdx) -> Self {
        Self {
            device_index,
            pe: Some(PeId::Single(pe)),
        }
    }

    /// Parse a node name, `None` if it does not follow the grammar
    pub fn parse_node_name(name: &str) -> Option<Self> {
        let caps = NODE_NAME_PATTERN.captures(name)?;
        let device_index = caps.name("device")?.as_str().parse().ok()?;
        let start = match caps.name("start") {
            Some(m) => Some(m.as_str().parse::<PeIdx>().ok()?),
            None => None,
        };
        let end = match caps.name("end") {
            Some(m) => Some(m.as_str().parse::<PeIdx>().ok()?),
            None => None,
        };

        let pe = match (start, end) {
            (None, _) => None,
            (Some(pe), None) => Some(PeId::Single(pe)),
            (Some(start), Some(end)) => Some(PeId::fused(start, end)?),
        };

        Some(Self { device_index, pe })
    }

    pub fn mode(&self) -> DeviceMode {
        match self.pe {
            None => DeviceMode::Whole,
            Some(PeId::Single(_)) => DeviceMode::Single,
            Some(PeId::Fused { .. }) => DeviceMode::Fusion,
        }
    }

    /// Whether two units contend for at least one PE
    pub fn overlaps(&self, other: &DeviceFileId) -> bool {
        if self.device_index != other.device_index {
            return false;
        }
        match (&self.pe, &other.pe) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a.overlaps(b),
        }
    }
}

impl fmt::Display for DeviceFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pe {
            None => write!(f, "npu{}", self.device_index),
            Some(pe) => write!(f, "npu{}pe{}", self.device_index, pe),
        }
    }
}

impl FromStr for DeviceFileId {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_node_name(s).ok_or_else(|| {
            DeviceError::invalid_specifier(s, "expected npu<N>, npu<N>pe<K> or npu<N>pe<A>-<B>")
        })
    }
}

/// One addressable unit of a device, backed by a device node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceFile {
    id: DeviceFileId,
    path: PathBuf,
}

impl DeviceFile {
    pub(crate) fn new(id: DeviceFileId, path: PathBuf) -> Self {
        Self { id, path }
    }

    /// Build from a node path, `None` if the file name does not follow the grammar
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_str()?;
        let id = DeviceFileId::parse_node_name(name)?;
        Some(Self::new(id, path.to_path_buf()))
    }

    pub fn id(&self) -> DeviceFileId {
        self.id
    }

    pub fn device_index(&self) -> DeviceIdx {
        self.id.device_index
    }

    /// PE unit, `None` for the whole device
    pub fn pe(&self) -> Option<PeId> {
        self.id.pe
    }

    pub fn mode(&self) -> DeviceMode {
        self.id.mode()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Canonical name derived from the identity (e.g. `npu0pe0-1`)
    pub fn name(&self) -> String {
        self.id.to_string()
    }

    /// File name of the backing node
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name())
    }

    pub fn overlaps(&self, other: &DeviceFile) -> bool {
        self.id.overlaps(&other.id)
    }

    /// PEs covered by this unit given the PEs present on its device
    pub fn pe_indices(&self, device_pes: &[PeIdx]) -> Vec<PeIdx> {
        match &self.id.pe {
            None => device_pes.to_vec(),
            Some(pe) => pe.indices(),
        }
    }
}

impl fmt::Display for DeviceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
