//! Configuration module for npudev
//!
//! Handles loading and validating configuration from YAML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use npudev_core::{DeviceConfig, NpuSystem};
use serde::{Deserialize, Serialize};

/// Monitor loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between telemetry polls
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the monitor serves metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port to expose metrics on
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the device namespace
    #[serde(default = "default_devfs")]
    pub devfs: PathBuf,

    /// Root of sysfs
    #[serde(default = "default_sysfs")]
    pub sysfs: PathBuf,

    /// Root of procfs, walked to find processes holding device files
    #[serde(default = "default_procfs")]
    pub procfs: PathBuf,

    /// Specifier used by `find` when none is given and the env key is unset
    #[serde(default)]
    pub default_specifier: Option<String>,

    /// Environment variable holding a device specifier
    #[serde(default = "default_specifier_env")]
    pub specifier_env: String,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devfs: default_devfs(),
            sysfs: default_sysfs(),
            procfs: default_procfs(),
            default_specifier: None,
            specifier_env: default_specifier_env(),
            monitor: MonitorConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval.is_zero() {
            anyhow::bail!("monitor.interval must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be > 0 when metrics are enabled");
        }
        if self.specifier_env.is_empty() {
            anyhow::bail!("specifier_env must not be empty");
        }
        if let Some(spec) = &self.default_specifier {
            spec.parse::<DeviceConfig>()
                .context("default_specifier is not a valid device specifier")?;
        }
        Ok(())
    }

    /// Device roots this configuration points at
    pub fn system(&self) -> NpuSystem {
        NpuSystem::new(&self.devfs, &self.sysfs).with_procfs(&self.procfs)
    }

    /// Device config from an explicit specifier, the env key, then the default
    pub fn device_config(&self, specifier: Option<&str>) -> Result<DeviceConfig> {
        let config: DeviceConfig = match specifier {
            Some(spec) => spec.parse()?,
            None => DeviceConfig::from_env(&self.specifier_env)
                .or_try(self.default_specifier.as_deref())
                .build()
                .with_context(|| {
                    format!(
                        "No device specifier given; set {} or default_specifier",
                        self.specifier_env
                    )
                })?,
        };
        Ok(config)
    }
}

// Default value functions
fn default_devfs() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_sysfs() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_procfs() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_specifier_env() -> String {
    "NPU_DEVNAME".to_string()
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_metrics_port() -> u16 {
    9464
}

fn default_true() -> bool {
    true
}
