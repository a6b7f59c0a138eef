//! NPU architecture tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::PeIdx;

/// NPU architecture generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// Warboy, two PEs per device
    Warboy,
    /// RNGD, eight PEs per device
    Rngd,
}

impl Arch {
    /// Number of processing elements physically present on one device
    pub fn pe_count(&self) -> u8 {
        match self {
            Arch::Warboy => 2,
            Arch::Rngd => 8,
        }
    }

    /// PE indices physically present on one device, ascending
    pub fn pe_indices(&self) -> Vec<PeIdx> {
        (0..self.pe_count()).collect()
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Warboy => write!(f, "warboy"),
            Arch::Rngd => write!(f, "rngd"),
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warboy" => Ok(Arch::Warboy),
            "rngd" | "renegade" => Ok(Arch::Rngd),
            other => Err(format!("unrecognized architecture '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_from_str() {
        assert_eq!("Warboy".parse::<Arch>().unwrap(), Arch::Warboy);
        assert_eq!("warboy\n".parse::<Arch>().unwrap(), Arch::Warboy);
        assert_eq!("RNGD".parse::<Arch>().unwrap(), Arch::Rngd);
        assert_eq!("renegade".parse::<Arch>().unwrap(), Arch::Rngd);
        assert!("u250".parse::<Arch>().is_err());
        assert!("".parse::<Arch>().is_err());
    }

    #[test]
    fn test_arch_display_round_trip() {
        for arch in [Arch::Warboy, Arch::Rngd] {
            assert_eq!(arch.to_string().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn test_pe_indices() {
        assert_eq!(Arch::Warboy.pe_indices(), vec![0, 1]);
        assert_eq!(Arch::Rngd.pe_indices().len(), 8);
    }
}
