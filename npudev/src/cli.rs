//! CLI argument parsing for npudev

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// NPU device listing, allocation and telemetry monitoring
#[derive(Debug, Parser)]
#[command(name = "npudev")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/npudev/config.yaml")]
    pub config: PathBuf,

    /// Device namespace root (overrides config)
    #[arg(long, global = true)]
    pub devfs: Option<PathBuf>,

    /// sysfs root (overrides config)
    #[arg(long, global = true)]
    pub sysfs: Option<PathBuf>,

    /// procfs root (overrides config)
    #[arg(long, global = true)]
    pub procfs: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "NPUDEV_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, default_value = "false", env = "NPUDEV_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices, their architecture and units
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show per-PE availability and the processes holding device files
    Status,

    /// Show firmware, driver and PCI metadata of devices
    Info {
        /// Device indices; all devices if omitted
        indices: Vec<u8>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Resolve a device specifier and claim the matching device files
    Find {
        /// Specifier, e.g. `npu0pe0,npu0pe1`, `0:0-1` or `warboy(fused)*1`
        spec: Option<String>,

        /// Keep the files claimed for this long before releasing
        #[arg(long, value_parser = humantime::parse_duration)]
        hold: Option<Duration>,
    },

    /// Show metadata of one device file
    Get {
        /// Device file name, e.g. `npu0pe0-1`
        name: String,
    },

    /// Read hwmon sensors
    Hwmon {
        /// Device indices; all devices if omitted
        indices: Vec<u8>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Poll sensors and serve Prometheus metrics
    Monitor {
        /// Run a single poll and exit
        #[arg(long)]
        once: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
