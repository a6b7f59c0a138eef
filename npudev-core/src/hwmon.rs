//! Sensor telemetry from the hwmon interface
//!
//! Sensor files follow the `<type><n>_<item>` scheme of the kernel hwmon
//! sysfs interface. Channels are enumerated on every read; nothing is cached.
//! A channel that cannot be read is skipped, the rest of its category is still
//! returned.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::device::{Device, DeviceIdx};
use crate::error::{DeviceError, DeviceResult};
use crate::sysfs;

/// Sensor category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Milliamperes
    Current,
    /// Millivolts
    Voltage,
    /// Average power in microwatts
    Power,
    /// Millidegrees Celsius
    Temperature,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Current,
        SensorKind::Voltage,
        SensorKind::Power,
        SensorKind::Temperature,
    ];

    fn prefix(&self) -> &'static str {
        match self {
            SensorKind::Current => "curr",
            SensorKind::Voltage => "in",
            SensorKind::Power => "power",
            SensorKind::Temperature => "temp",
        }
    }

    /// Item holding the reported value
    fn value_item(&self) -> &'static str {
        match self {
            SensorKind::Power => "average",
            _ => "input",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Current => "current",
            SensorKind::Voltage => "voltage",
            SensorKind::Power => "power",
            SensorKind::Temperature => "temperature",
        }
    }

    /// Display unit and the divisor from the raw hwmon unit
    pub fn unit(&self) -> (&'static str, f64) {
        match self {
            SensorKind::Current => ("A", 1_000.0),
            SensorKind::Voltage => ("V", 1_000.0),
            SensorKind::Power => ("W", 1_000_000.0),
            SensorKind::Temperature => ("°C", 1_000.0),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        SensorKind::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One labelled channel value, in the raw hwmon unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorReading {
    pub label: String,
    pub value: i64,
}

impl SensorReading {
    /// Value converted to the display unit of `kind`
    pub fn scaled(&self, kind: SensorKind) -> f64 {
        self.value as f64 / kind.unit().1
    }
}

/// Readings of all four categories of one device at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub currents: Vec<SensorReading>,
    pub voltages: Vec<SensorReading>,
    pub powers: Vec<SensorReading>,
    pub temperatures: Vec<SensorReading>,
}

impl TelemetrySnapshot {
    /// Categories paired with their kind, in fixed order
    pub fn categories(&self) -> [(SensorKind, &[SensorReading]); 4] {
        [
            (SensorKind::Current, self.currents.as_slice()),
            (SensorKind::Voltage, self.voltages.as_slice()),
            (SensorKind::Power, self.powers.as_slice()),
            (SensorKind::Temperature, self.temperatures.as_slice()),
        ]
    }
}

/// Split `<type><n>_<item>` into its parts
fn parse_sensor_file(name: &str) -> Option<(SensorKind, u32, &str)> {
    let (channel, item) = name.split_once('_')?;
    let digits = channel.find(|c: char| c.is_ascii_digit())?;
    let (prefix, index) = channel.split_at(digits);
    let kind = SensorKind::from_prefix(prefix)?;
    let index = index.parse().ok()?;
    Some((kind, index, item))
}

#[derive(Debug, Default)]
struct Channel {
    value: Option<PathBuf>,
    label: Option<PathBuf>,
}

/// Channels of `kind` among directory entries, ordered by channel index
fn collect_channels<I>(kind: SensorKind, entries: I) -> BTreeMap<u32, Channel>
where
    I: IntoIterator<Item = (String, PathBuf)>,
{
    let mut channels: BTreeMap<u32, Channel> = BTreeMap::new();
    for (name, path) in entries {
        let Some((k, index, item)) = parse_sensor_file(&name) else {
            continue;
        };
        if k != kind {
            continue;
        }
        if item == kind.value_item() {
            channels.entry(index).or_default().value = Some(path);
        } else if item == "label" {
            channels.entry(index).or_default().label = Some(path);
        }
    }
    channels.retain(|_, c| c.value.is_some());
    channels
}

fn parse_value(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("unexpected value format '{}'", raw.trim()))
}

/// Unlabelled channels are named by index; repeated labels get an index suffix
fn push_reading(readings: &mut Vec<SensorReading>, index: u32, label: Option<String>, value: i64) {
    let mut label = label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| index.to_string());
    if readings.iter().any(|r| r.label == label) {
        label = format!("{}_{}", label, index);
    }
    readings.push(SensorReading { label, value });
}

/// Reads live sensor values of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorFetcher {
    device_index: DeviceIdx,
    sysfs: PathBuf,
}

impl Device {
    /// Telemetry fetcher for this device
    pub fn sensor_fetcher(&self) -> SensorFetcher {
        SensorFetcher::new(self)
    }
}

impl SensorFetcher {
    pub fn new(device: &Device) -> Self {
        Self {
            device_index: device.device_index(),
            sysfs: device.sysfs().to_path_buf(),
        }
    }

    pub fn device_index(&self) -> DeviceIdx {
        self.device_index
    }

    fn busname_path(&self) -> PathBuf {
        sysfs::mgmt_path(&self.sysfs, self.device_index, sysfs::BUSNAME)
    }

    fn hwmon_error<E: fmt::Display>(&self, path: &Path, e: E) -> DeviceError {
        DeviceError::hwmon(self.device_index, format!("{}: {}", path.display(), e))
    }

    fn skip_channel<E: fmt::Display>(&self, kind: SensorKind, index: u32, e: E) {
        warn!(
            device = self.device_index,
            kind = %kind,
            channel = index,
            error = %e,
            "Skipping unreadable sensor channel"
        );
    }

    fn hwmon_dir(&self) -> DeviceResult<PathBuf> {
        let busname_path = self.busname_path();
        let busname =
            fs::read_to_string(&busname_path).map_err(|e| self.hwmon_error(&busname_path, e))?;
        let root = sysfs::hwmon_root(&self.sysfs, &busname);

        let mut instances = fs::read_dir(&root)
            .map_err(|e| self.hwmon_error(&root, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| self.hwmon_error(&root, e))?;
        // One hwmon instance per device; pick deterministically if there are more
        instances.sort();
        instances
            .into_iter()
            .next()
            .ok_or_else(|| self.hwmon_error(&root, "no hwmon instance"))
    }

    /// Enumerate and read every channel of `kind`
    ///
    /// The single implementation behind both the async and blocking readers.
    fn read_kind_blocking(&self, kind: SensorKind) -> DeviceResult<Vec<SensorReading>> {
        let dir = self.hwmon_dir()?;
        let names = fs::read_dir(&dir)
            .map_err(|e| self.hwmon_error(&dir, e))?
            .map(|entry| entry.map(|e| (e.file_name().to_string_lossy().to_string(), e.path())))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| self.hwmon_error(&dir, e))?;

        let mut readings = Vec::new();
        for (index, channel) in collect_channels(kind, names) {
            let Some(value_path) = channel.value else {
                continue;
            };
            let value = fs::read_to_string(&value_path)
                .map_err(|e| e.to_string())
                .and_then(|raw| parse_value(&raw));
            match value {
                Ok(value) => {
                    let label = channel.label.and_then(|path| fs::read_to_string(path).ok());
                    push_reading(&mut readings, index, label, value);
                }
                Err(e) => self.skip_channel(kind, index, e),
            }
        }

        Ok(readings)
    }

    async fn read_kind(&self, kind: SensorKind) -> DeviceResult<Vec<SensorReading>> {
        let fetcher = self.clone();
        tokio::task::spawn_blocking(move || fetcher.read_kind_blocking(kind)).await?
    }

    fn snapshot_of(
        &self,
        currents: Vec<SensorReading>,
        voltages: Vec<SensorReading>,
        powers: Vec<SensorReading>,
        temperatures: Vec<SensorReading>,
    ) -> TelemetrySnapshot {
        TelemetrySnapshot {
            device: format!("npu{}", self.device_index),
            timestamp: Utc::now(),
            currents,
            voltages,
            powers,
            temperatures,
        }
    }

    /// Currents in mA
    pub async fn read_currents(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind(SensorKind::Current).await
    }

    /// Voltages in mV
    pub async fn read_voltages(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind(SensorKind::Voltage).await
    }

    /// Average powers in µW
    pub async fn read_powers_average(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind(SensorKind::Power).await
    }

    /// Temperatures in m°C
    pub async fn read_temperatures(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind(SensorKind::Temperature).await
    }

    /// Read all four categories concurrently
    pub async fn snapshot(&self) -> DeviceResult<TelemetrySnapshot> {
        let (currents, voltages, powers, temperatures) = futures::try_join!(
            self.read_currents(),
            self.read_voltages(),
            self.read_powers_average(),
            self.read_temperatures(),
        )?;
        Ok(self.snapshot_of(currents, voltages, powers, temperatures))
    }

    pub fn read_currents_blocking(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind_blocking(SensorKind::Current)
    }

    pub fn read_voltages_blocking(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind_blocking(SensorKind::Voltage)
    }

    pub fn read_powers_average_blocking(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind_blocking(SensorKind::Power)
    }

    pub fn read_temperatures_blocking(&self) -> DeviceResult<Vec<SensorReading>> {
        self.read_kind_blocking(SensorKind::Temperature)
    }

    pub fn snapshot_blocking(&self) -> DeviceResult<TelemetrySnapshot> {
        Ok(self.snapshot_of(
            self.read_currents_blocking()?,
            self.read_voltages_blocking()?,
            self.read_powers_average_blocking()?,
            self.read_temperatures_blocking()?,
        ))
    }
}
