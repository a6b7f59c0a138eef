//! Device resolution requests
//!
//! A [`DeviceConfig`] is either structured (architecture, mode and count) or
//! explicit (a list of named device files).
//!
//! # Textual representation
//!
//! ```text
//! npu0pe0                 one named device file
//! npu0pe0,npu1pe0-1       several named device files
//! 0:0, 0:0-1, 1           shorthand for npu0pe0, npu0pe0-1, npu1
//! warboy*2                two single-PE units on Warboy
//! warboy(fused)*1         one fused unit on Warboy
//! rngd(whole)*1           one whole RNGD device
//! ```

mod env;
mod expand;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

pub use env::EnvBuilder;
pub use expand::{expand, ResolutionPlan, ResolvePolicy, SelectorGroup};

use crate::arch::Arch;
use crate::device::{DeviceFileId, DeviceMode, PeId};
use crate::error::{DeviceError, DeviceResult};

static STRUCTURED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<arch>[A-Za-z]+)(?:\((?P<mode>[a-z]+)\))?\*(?P<count>\d+)$")
        .expect("structured pattern is valid")
});

static SHORTHAND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<device>\d+)(?::(?P<start>\d+)(?:-(?P<end>\d+))?)?$")
        .expect("shorthand pattern is valid")
});

/// A request for device files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConfig {
    /// `count` unused units of `mode` on devices of `arch`
    Structured {
        arch: Arch,
        mode: DeviceMode,
        count: u8,
    },
    /// Exactly these device files, in order
    Explicit(Vec<DeviceFileId>),
}

impl DeviceConfig {
    /// Builder for Warboy devices
    pub fn warboy() -> DeviceConfigBuilder {
        Self::builder(Arch::Warboy)
    }

    /// Builder for RNGD devices
    pub fn rngd() -> DeviceConfigBuilder {
        Self::builder(Arch::Rngd)
    }

    pub fn builder(arch: Arch) -> DeviceConfigBuilder {
        DeviceConfigBuilder {
            arch,
            mode: DeviceMode::Single,
        }
    }

    /// Explicit request from device file names (e.g. `npu0pe0`)
    pub fn explicit<I, S>(names: I) -> DeviceResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = names
            .into_iter()
            .map(|name| parse_selector(name.as_ref().trim()))
            .collect::<DeviceResult<Vec<_>>>()?;
        let config = DeviceConfig::Explicit(ids);
        config.validate()?;
        Ok(config)
    }

    /// Read the textual representation from an environment variable
    pub fn from_env<K: ToString>(key: K) -> EnvBuilder {
        EnvBuilder::from_env(key)
    }

    /// Check the invariants a config must hold before resolution
    pub fn validate(&self) -> DeviceResult<()> {
        match self {
            DeviceConfig::Structured { count, .. } => {
                if *count == 0 {
                    return Err(DeviceError::invalid_specifier(
                        self,
                        "count must be at least 1",
                    ));
                }
            }
            DeviceConfig::Explicit(ids) => {
                if ids.is_empty() {
                    return Err(DeviceError::invalid_specifier(
                        "",
                        "at least one device file must be named",
                    ));
                }
                let mut seen = HashSet::with_capacity(ids.len());
                for id in ids {
                    if !seen.insert(id) {
                        return Err(DeviceError::invalid_specifier(
                            self,
                            format!("{} is named more than once", id),
                        ));
                    }
                }
                // A later unit would always collide with the claim on an earlier one
                for (pos, id) in ids.iter().enumerate() {
                    if let Some(other) = ids[pos + 1..].iter().find(|other| id.overlaps(other)) {
                        return Err(DeviceError::invalid_specifier(
                            self,
                            format!("{} and {} share a PE", id, other),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of units requested
    pub fn count(&self) -> usize {
        match self {
            DeviceConfig::Structured { count, .. } => usize::from(*count),
            DeviceConfig::Explicit(ids) => ids.len(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::warboy().fused().count(1)
    }
}

/// Builder for structured configs
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfigBuilder {
    arch: Arch,
    mode: DeviceMode,
}

impl DeviceConfigBuilder {
    pub fn single(mut self) -> Self {
        self.mode = DeviceMode::Single;
        self
    }

    pub fn fused(mut self) -> Self {
        self.mode = DeviceMode::Fusion;
        self
    }

    pub fn whole(mut self) -> Self {
        self.mode = DeviceMode::Whole;
        self
    }

    pub fn count(self, count: u8) -> DeviceConfig {
        DeviceConfig::Structured {
            arch: self.arch,
            mode: self.mode,
            count,
        }
    }

    pub fn build(self) -> DeviceConfig {
        self.count(1)
    }
}

fn parse_structured(token: &str) -> Option<DeviceResult<DeviceConfig>> {
    let caps = STRUCTURED_PATTERN.captures(token)?;
    let mode = caps.name("mode").map(|m| m.as_str());
    Some(structured_from_parts(token, &caps["arch"], mode, &caps["count"]))
}

fn structured_from_parts(
    token: &str,
    arch: &str,
    mode: Option<&str>,
    count: &str,
) -> DeviceResult<DeviceConfig> {
    let arch: Arch = arch
        .parse()
        .map_err(|reason| DeviceError::invalid_specifier(token, reason))?;
    let mode = match mode {
        Some(mode) => mode
            .parse()
            .map_err(|reason| DeviceError::invalid_specifier(token, reason))?,
        None => DeviceMode::Single,
    };
    let count: u8 = count
        .parse()
        .map_err(|_| DeviceError::invalid_specifier(token, "count is out of range"))?;

    let config = DeviceConfig::Structured { arch, mode, count };
    config.validate()?;
    Ok(config)
}

fn parse_shorthand(token: &str) -> Option<DeviceFileId> {
    let caps = SHORTHAND_PATTERN.captures(token)?;
    let device_index = caps["device"].parse().ok()?;
    let start = match caps.name("start") {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    let end = match caps.name("end") {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    let pe = match (start, end) {
        (None, _) => None,
        (Some(pe), None) => Some(PeId::Single(pe)),
        (Some(start), Some(end)) => Some(PeId::fused(start, end)?),
    };
    Some(DeviceFileId { device_index, pe })
}

fn parse_selector(token: &str) -> DeviceResult<DeviceFileId> {
    if token.is_empty() {
        return Err(DeviceError::invalid_specifier(token, "empty selector"));
    }
    DeviceFileId::parse_node_name(token)
        .or_else(|| parse_shorthand(token))
        .ok_or_else(|| {
            let reason = if STRUCTURED_PATTERN.is_match(token) {
                "structured requests cannot be combined with other selectors"
            } else {
                "does not name a device file"
            };
            DeviceError::invalid_specifier(token, reason)
        })
}

impl FromStr for DeviceConfig {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DeviceError::invalid_specifier(s, "empty specifier"));
        }

        let tokens: Vec<&str> = s.split(',').map(str::trim).collect();
        if let [token] = tokens.as_slice() {
            if let Some(parsed) = parse_structured(token) {
                return parsed;
            }
        }

        let ids = tokens
            .into_iter()
            .map(parse_selector)
            .collect::<DeviceResult<Vec<_>>>()?;
        let config = DeviceConfig::Explicit(ids);
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&str> for DeviceConfig {
    type Error = DeviceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConfig::Structured { arch, mode, count } => {
                write!(f, "{}({})*{}", arch, mode, count)
            }
            DeviceConfig::Explicit(ids) => {
                let names: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}
