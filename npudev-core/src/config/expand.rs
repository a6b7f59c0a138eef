//! Expansion of a [`DeviceConfig`] into selector groups against a topology

use serde::Serialize;
use tracing::debug;

use super::DeviceConfig;
use crate::device::{Device, DeviceFile, DeviceMode, PeIdx};
use crate::error::{DeviceError, DeviceResult};

/// Candidates for one requested unit, in preference order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorGroup {
    candidates: Vec<DeviceFile>,
}

impl SelectorGroup {
    pub fn candidates(&self) -> &[DeviceFile] {
        &self.candidates
    }
}

/// How unsatisfiable groups are handled during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvePolicy {
    /// Any busy group fails the whole resolution
    AllOrNothing,
    /// Busy groups are dropped; fails only when every group is busy
    BestEffort,
}

/// Ordered selector groups plus the policy to resolve them with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionPlan {
    config: String,
    groups: Vec<SelectorGroup>,
    policy: ResolvePolicy,
}

impl ResolutionPlan {
    /// Canonical text of the config this plan came from
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn groups(&self) -> &[SelectorGroup] {
        &self.groups
    }

    pub fn policy(&self) -> ResolvePolicy {
        self.policy
    }
}

/// Expand `config` into one selector group per requested unit
///
/// Explicit names must exist in `devices`. A structured request must not ask
/// for more disjoint units than the topology has, busy or not.
pub fn expand(config: &DeviceConfig, devices: &[Device]) -> DeviceResult<ResolutionPlan> {
    config.validate()?;

    let plan = match config {
        DeviceConfig::Structured { arch, mode, count } => {
            let candidates: Vec<DeviceFile> = devices
                .iter()
                .filter(|d| d.arch() == *arch)
                .flat_map(|d| d.files_with_mode(*mode))
                .cloned()
                .collect();

            let available = max_disjoint(&candidates);
            if usize::from(*count) > available {
                return Err(DeviceError::InsufficientDevices {
                    config: config.to_string(),
                    requested: *count,
                    available,
                });
            }

            ResolutionPlan {
                config: config.to_string(),
                groups: vec![SelectorGroup { candidates }; usize::from(*count)],
                policy: ResolvePolicy::AllOrNothing,
            }
        }
        DeviceConfig::Explicit(ids) => {
            let groups = ids
                .iter()
                .map(|id| {
                    let device = devices
                        .iter()
                        .find(|d| d.device_index() == id.device_index)
                        .ok_or_else(|| {
                            DeviceError::invalid_specifier(
                                id,
                                format!("npu{} is not present", id.device_index),
                            )
                        })?;
                    let file = device.find_file(id).ok_or_else(|| {
                        DeviceError::invalid_specifier(id, "no such unit on this device")
                    })?;
                    Ok(SelectorGroup {
                        candidates: vec![file.clone()],
                    })
                })
                .collect::<DeviceResult<Vec<_>>>()?;

            ResolutionPlan {
                config: config.to_string(),
                groups,
                policy: ResolvePolicy::BestEffort,
            }
        }
    };

    debug!(
        config = %plan.config,
        groups = plan.groups.len(),
        policy = ?plan.policy,
        "Expanded device config"
    );
    Ok(plan)
}

/// Largest set of pairwise non-overlapping candidates
///
/// Greedy by interval end per device, which is optimal for intervals.
fn max_disjoint(candidates: &[DeviceFile]) -> usize {
    let mut sorted: Vec<&DeviceFile> = candidates.iter().collect();
    sorted.sort_by_key(|f| (f.device_index(), end_pe(f)));

    let mut chosen: Vec<&DeviceFile> = Vec::new();
    for file in sorted {
        if !chosen.iter().any(|c| c.overlaps(file)) {
            chosen.push(file);
        }
    }
    chosen.len()
}

fn end_pe(file: &DeviceFile) -> PeIdx {
    match file.mode() {
        DeviceMode::Whole => PeIdx::MAX,
        _ => file
            .pe()
            .and_then(|pe| pe.indices().last().copied())
            .unwrap_or(PeIdx::MAX),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::arch::Arch;
    use crate::device;

    fn topology(names: &[&str], arch: Arch) -> Vec<Device> {
        let files = names
            .iter()
            .map(|n| DeviceFile::from_path(format!("/dev/{}", n)).unwrap())
            .collect();
        device::build(files, Path::new("/sys"), |_| Ok(arch))
    }

    fn warboy_pair() -> Vec<Device> {
        topology(
            &[
                "npu0", "npu0pe0", "npu0pe1", "npu0pe0-1", "npu1", "npu1pe0", "npu1pe1",
                "npu1pe0-1",
            ],
            Arch::Warboy,
        )
    }

    fn names(group: &SelectorGroup) -> Vec<String> {
        group.candidates().iter().map(|f| f.name()).collect()
    }

    #[test]
    fn test_expand_structured_single() -> DeviceResult<()> {
        let plan = expand(&"warboy*2".parse()?, &warboy_pair())?;
        assert_eq!(plan.policy(), ResolvePolicy::AllOrNothing);
        assert_eq!(plan.groups().len(), 2);
        for group in plan.groups() {
            assert_eq!(names(group), vec!["npu0pe0", "npu0pe1", "npu1pe0", "npu1pe1"]);
        }
        Ok(())
    }

    #[test]
    fn test_expand_structured_fused_and_whole() -> DeviceResult<()> {
        let plan = expand(&DeviceConfig::warboy().fused().count(2), &warboy_pair())?;
        assert_eq!(names(&plan.groups()[0]), vec!["npu0pe0-1", "npu1pe0-1"]);

        let plan = expand(&DeviceConfig::warboy().whole().count(1), &warboy_pair())?;
        assert_eq!(names(&plan.groups()[0]), vec!["npu0", "npu1"]);
        Ok(())
    }

    #[test]
    fn test_expand_insufficient() {
        for config in [
            DeviceConfig::warboy().count(5),
            DeviceConfig::warboy().fused().count(3),
            DeviceConfig::rngd().count(1),
        ] {
            let err = expand(&config, &warboy_pair()).unwrap_err();
            assert!(
                matches!(err, DeviceError::InsufficientDevices { .. }),
                "{} should be insufficient, got {}",
                config,
                err
            );
        }
    }

    #[test]
    fn test_expand_explicit() -> DeviceResult<()> {
        let plan = expand(&"npu1pe0,npu0pe0-1".parse()?, &warboy_pair())?;
        assert_eq!(plan.policy(), ResolvePolicy::BestEffort);
        let groups: Vec<Vec<String>> = plan.groups().iter().map(names).collect();
        assert_eq!(groups, vec![vec!["npu1pe0"], vec!["npu0pe0-1"]]);
        assert_eq!(plan.config(), "npu1pe0,npu0pe0-1");
        Ok(())
    }

    #[test]
    fn test_expand_explicit_absent() -> DeviceResult<()> {
        for spec in ["npu7pe0", "npu0pe1-2", "npu0,npu3"] {
            let err = expand(&spec.parse()?, &warboy_pair()).unwrap_err();
            assert!(matches!(err, DeviceError::InvalidSpecifier { .. }));
        }
        Ok(())
    }

    #[test]
    fn test_max_disjoint() {
        let devices = topology(
            &["npu0pe0-1", "npu0pe1-2", "npu0pe2-3", "npu0pe4-7", "npu0pe0-3"],
            Arch::Rngd,
        );
        let fused: Vec<DeviceFile> = devices[0].fused_files().cloned().collect();
        assert_eq!(max_disjoint(&fused), 3);
    }
}
