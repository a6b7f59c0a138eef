//! Prometheus metrics for npudev

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_gauge_vec, register_int_counter_vec, register_int_gauge, GaugeVec,
    IntCounterVec, IntGauge,
};

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult};
use crate::hwmon::{SensorKind, SensorReading};

/// Number of NPU devices in the last enumeration
static DEVICE_COUNT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("npudev_device_count", "Number of NPU devices detected"))
        .expect("Failed to create device_count metric")
});

/// Last value read from each sensor channel, in the unit hwmon reports
static SENSOR_VALUE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!("npudev_sensor_value", "Last hwmon sensor reading"),
        &["device", "kind", "label"]
    )
    .expect("Failed to create sensor_value metric")
});

/// Device file resolutions by outcome
static RESOLVE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("npudev_resolve_total", "Total number of device file resolutions"),
        &["outcome"]
    )
    .expect("Failed to create resolve_total metric")
});

/// Metrics registry wrapper
pub struct MetricsRegistry;

impl MetricsRegistry {
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*DEVICE_COUNT;
        let _ = &*SENSOR_VALUE;
        let _ = &*RESOLVE_TOTAL;
        Self
    }

    pub fn set_device_count(&self, count: usize) {
        DEVICE_COUNT.set(count as i64);
    }

    /// Set the gauges of one sensor category of a device
    pub fn set_sensor_readings(&self, device: &Device, kind: SensorKind, readings: &[SensorReading]) {
        let name = device.name();
        for reading in readings {
            SENSOR_VALUE
                .with_label_values(&[&name, kind.as_str(), &reading.label])
                .set(reading.value as f64);
        }
    }

    /// Count one resolution by its outcome
    pub fn observe_resolve<T>(&self, result: &DeviceResult<T>) {
        RESOLVE_TOTAL
            .with_label_values(&[resolve_outcome(result)])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> String {
        prometheus::TextEncoder::new()
            .encode_to_string(&prometheus::gather())
            .unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome label of a resolution result
pub fn resolve_outcome<T>(result: &DeviceResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(DeviceError::DeviceBusy { .. }) => "busy",
        Err(DeviceError::InsufficientDevices { .. }) => "insufficient",
        Err(DeviceError::InvalidSpecifier { .. }) => "invalid",
        Err(_) => "error",
    }
}
