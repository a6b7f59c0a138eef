//! Telemetry monitor loop
//!
//! Polls every device's sensors on a fixed interval and mirrors the readings
//! into Prometheus gauges. Failures are logged and the next tick retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use npudev_core::metrics::MetricsRegistry;
use npudev_core::{DeviceResult, NpuInterface, TelemetrySnapshot};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct TelemetryMonitor {
    npu: Arc<dyn NpuInterface>,
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
}

impl TelemetryMonitor {
    pub fn new(npu: Arc<dyn NpuInterface>, metrics: Arc<MetricsRegistry>, interval: Duration) -> Self {
        Self {
            npu,
            metrics,
            interval,
        }
    }

    /// Poll until the shutdown channel flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Starting telemetry monitor");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        if e.is_retryable() {
                            warn!(error = %e, "Telemetry poll failed, retrying next tick");
                        } else {
                            error!(error = %e, "Telemetry poll failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping monitor");
                        break;
                    }
                }
            }
        }
    }

    /// Read every device once; a device whose sensors fail is skipped
    pub async fn poll_once(&self) -> DeviceResult<Vec<TelemetrySnapshot>> {
        let start = Instant::now();
        let devices = self.npu.list_devices().await?;
        self.metrics.set_device_count(devices.len());

        let mut snapshots = Vec::with_capacity(devices.len());
        for device in &devices {
            match self.npu.read_sensors(device).await {
                Ok(snapshot) => {
                    for (kind, readings) in snapshot.categories() {
                        self.metrics.set_sensor_readings(device, kind, readings);
                    }
                    snapshots.push(snapshot);
                }
                Err(e) => warn!(device = %device, error = %e, "Failed to read sensors"),
            }
        }

        debug!(
            devices = devices.len(),
            duration = ?start.elapsed(),
            "Telemetry poll complete"
        );
        Ok(snapshots)
    }
}
