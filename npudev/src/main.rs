//! npudev
//!
//! Lists NPU devices, claims device files by specifier, reports PE occupancy
//! and its holders, shows device metadata and exports hwmon sensor telemetry.

mod cli;
mod config;
mod monitor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use npudev_core::metrics::MetricsRegistry;
use npudev_core::{
    create_interface, Device, DeviceInfo, NpuInterface, NpuProcess, PeStatus, SensorKind,
    TelemetrySnapshot,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command};
use config::Config;
use monitor::TelemetryMonitor;

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Logs go to stderr so command output stays parseable
    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_devices(devices: &[Device], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
        return Ok(());
    }

    for device in devices {
        let units: Vec<String> = device
            .list_device_files()
            .iter()
            .map(|f| f.name())
            .collect();
        println!(
            "{:<6} {:<7} pes={:<2} {}",
            device.name(),
            device.arch(),
            device.pe_indices().len(),
            units.join(" ")
        );
    }
    Ok(())
}

fn holders(processes: &[NpuProcess], device_file: &str) -> String {
    processes
        .iter()
        .filter(|p| p.device_file() == device_file)
        .map(|p| format!("pid {} {}", p.pid(), p.cmdline()))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn print_status(npu: &dyn NpuInterface) -> Result<()> {
    // Holder lookup is best effort; other users' /proc entries may be unreadable
    let processes = npu.scan_processes().await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to scan processes");
        Vec::new()
    });

    for device in npu.list_devices().await? {
        let status = npu
            .pe_status(&device)
            .await
            .with_context(|| format!("Failed to read PE status of {}", device))?;
        for (pe, state) in status {
            match state {
                PeStatus::Available => println!("{}:{} available", device.name(), pe),
                PeStatus::Occupied(file) => {
                    let holders = holders(&processes, &file);
                    if holders.is_empty() {
                        println!("{}:{} occupied by {}", device.name(), pe, file)
                    } else {
                        println!("{}:{} occupied by {} ({})", device.name(), pe, file, holders)
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_info(info: &DeviceInfo) {
    fn field<T: std::fmt::Display>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    println!("-- {} ({}) --", info.device, info.arch);
    println!("  busname          {}", field(&info.busname));
    println!("  pci_dev          {}", field(&info.pci_dev));
    println!("  serial           {}", field(&info.device_sn));
    println!("  uuid             {}", field(&info.device_uuid));
    println!("  firmware         {}", field(&info.firmware_version));
    println!("  driver           {}", field(&info.driver_version));
    println!("  alive            {}", field(&info.alive));
    println!("  heartbeat        {}", field(&info.heartbeat));
    println!("  numa_node        {}", field(&info.numa_node));
}

/// The devices with the given indices, or all of them
async fn select_devices(npu: &dyn NpuInterface, indices: &[u8]) -> Result<Vec<Device>> {
    if indices.is_empty() {
        return Ok(npu.list_devices().await?);
    }
    let mut devices = Vec::with_capacity(indices.len());
    for idx in indices {
        devices.push(npu.get_device(*idx).await?);
    }
    Ok(devices)
}

async fn info(npu: &dyn NpuInterface, indices: &[u8], json: bool) -> Result<()> {
    let mut infos = Vec::new();
    for device in select_devices(npu, indices).await? {
        infos.push(npu.device_info(&device).await?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        for info in &infos {
            print_info(info);
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &TelemetrySnapshot) {
    println!("-- {} --", snapshot.device);
    for (kind, readings) in snapshot.categories() {
        let (unit, _) = kind.unit();
        println!("{}", title(kind));
        for reading in readings {
            println!("  {:16} {:9.2} {}", reading.label, reading.scaled(kind), unit);
        }
    }
}

fn title(kind: SensorKind) -> &'static str {
    match kind {
        SensorKind::Current => "Current",
        SensorKind::Voltage => "Voltage",
        SensorKind::Power => "Power",
        SensorKind::Temperature => "Temperature",
    }
}

async fn hwmon(npu: &dyn NpuInterface, indices: &[u8], json: bool) -> Result<()> {
    let devices = select_devices(npu, indices).await?;

    let mut snapshots = Vec::with_capacity(devices.len());
    for device in &devices {
        snapshots.push(
            npu.read_sensors(device)
                .await
                .with_context(|| format!("Failed to read sensors of {}", device))?,
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        for snapshot in &snapshots {
            print_snapshot(snapshot);
            println!();
        }
    }
    Ok(())
}

async fn find(
    npu: &dyn NpuInterface,
    config: &Config,
    spec: Option<&str>,
    hold: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let device_config = config.device_config(spec)?;
    info!(config = %device_config, "Resolving device files");

    let claimed = npu.find_device_files(&device_config).await?;
    for file in &claimed {
        println!("{}", file.path().display());
    }

    if let Some(hold) = hold {
        info!(duration = %humantime::format_duration(hold), "Holding device files");
        tokio::select! {
            _ = tokio::time::sleep(hold) => {}
            _ = shutdown.changed() => {
                info!("Shutdown signal received, releasing early");
            }
        }
    }

    drop(claimed);
    Ok(())
}

/// Start the Prometheus metrics HTTP server
async fn start_metrics_server(port: u16, metrics: Arc<MetricsRegistry>) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!(port = port, "Metrics server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let request = String::from_utf8_lossy(&buf);
            let response = if request.starts_with("GET /metrics") {
                let body = metrics.encode();
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                )
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
            };

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

async fn run_monitor(
    npu: Arc<dyn NpuInterface>,
    config: &Config,
    once: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let monitor = TelemetryMonitor::new(npu, metrics.clone(), config.monitor.interval);

    if once {
        info!("Running single telemetry poll (--once mode)");
        for snapshot in monitor.poll_once().await? {
            print_snapshot(&snapshot);
        }
        return Ok(());
    }

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, metrics).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    monitor.run(shutdown).await;
    info!("Monitor shutdown complete");
    Ok(())
}

/// Flip the returned channel to `true` on Ctrl+C or SIGTERM
fn shutdown_signal() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }

        let _ = shutdown_tx.send(true);
    });

    shutdown_rx
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    // Load configuration
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        info!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(devfs) = cli.devfs {
        config.devfs = devfs;
    }
    if let Some(sysfs) = cli.sysfs {
        config.sysfs = sysfs;
    }
    if let Some(procfs) = cli.procfs {
        config.procfs = procfs;
    }

    config.validate().context("Invalid configuration")?;

    let npu = create_interface(config.system());
    let shutdown = shutdown_signal();

    match cli.command {
        Command::List { json } => {
            let devices = npu.list_devices().await?;
            if devices.is_empty() {
                warn!(devfs = ?config.devfs, "No NPU devices found");
            }
            print_devices(&devices, json)?;
        }
        Command::Status => print_status(npu.as_ref()).await?,
        Command::Info { indices, json } => info(npu.as_ref(), &indices, json).await?,
        Command::Find { spec, hold } => {
            find(npu.as_ref(), &config, spec.as_deref(), hold, shutdown).await?
        }
        Command::Get { name } => {
            let file = npu.get_device_file(&name).await?;
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
        Command::Hwmon { indices, json } => hwmon(npu.as_ref(), &indices, json).await?,
        Command::Monitor { once } => run_monitor(npu, &config, once, shutdown).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(device_file: &str, pid: u32, cmdline: &str) -> NpuProcess {
        NpuProcess {
            device_file: device_file.to_string(),
            pid,
            cmdline: cmdline.to_string(),
        }
    }

    #[test]
    fn test_holders() {
        let processes = vec![
            process("npu0pe0", 10, "serve a"),
            process("npu0pe0", 11, "serve b"),
            process("npu0pe1", 12, "bench"),
        ];
        assert_eq!(
            holders(&processes, "npu0pe0"),
            "pid 10 serve a, pid 11 serve b"
        );
        assert_eq!(holders(&processes, "npu0pe1"), "pid 12 bench");
        assert_eq!(holders(&processes, "npu1"), "");
    }
}
