//! End-to-end tests of the public async and blocking APIs over a fixture host

use std::fs;
use std::path::PathBuf;

use npudev_core::{
    blocking, create_interface, Arch, DeviceConfig, DeviceError, DeviceMode, DeviceResult,
    NpuInterface, NpuSystem, NumaNode, PeStatus,
};
use tempfile::TempDir;

/// Host with one Warboy (npu0) and one RNGD (npu1) device
struct Host {
    dir: TempDir,
}

impl Host {
    fn new() -> Self {
        let host = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::create_dir_all(host.devfs()).unwrap();

        host.device(0, "Warboy", "0000:51:00.0", &["", "pe0", "pe1", "pe0-1"]);
        host.device(
            1,
            "RNGD",
            "0000:52:00.0",
            &["", "pe0", "pe1", "pe2", "pe3", "pe0-1", "pe2-3", "pe0-3"],
        );
        host
    }

    fn devfs(&self) -> PathBuf {
        self.dir.path().join("dev")
    }

    fn sysfs(&self) -> PathBuf {
        self.dir.path().join("sys")
    }

    fn system(&self) -> NpuSystem {
        NpuSystem::new(self.devfs(), self.sysfs())
    }

    fn device(&self, idx: u8, device_type: &str, busname: &str, nodes: &[&str]) {
        let mgmt = self.sysfs().join(format!("class/npu_mgmt/npu{}_mgmt", idx));
        fs::create_dir_all(&mgmt).unwrap();
        fs::write(mgmt.join("device_type"), device_type).unwrap();
        fs::write(mgmt.join("busname"), busname).unwrap();

        for node in nodes {
            fs::write(self.devfs().join(format!("npu{}{}", idx, node)), b"").unwrap();
        }

        let hwmon = self
            .sysfs()
            .join("bus/pci/devices")
            .join(busname)
            .join("hwmon/hwmon3");
        fs::create_dir_all(&hwmon).unwrap();
        for (file, contents) in [
            ("curr1_input", "1500"),
            ("curr1_label", "NPU Current"),
            ("in1_input", "850"),
            ("power1_average", "30000000"),
            ("power1_label", "NPU Power"),
            ("temp1_input", "41000"),
            ("temp1_label", "Ambient"),
            ("temp2_input", "52000"),
            ("temp2_label", "Peak"),
        ] {
            fs::write(hwmon.join(file), contents).unwrap();
        }
    }
}

#[tokio::test]
async fn test_topology() -> DeviceResult<()> {
    let host = Host::new();
    let npu = create_interface(host.system());

    let devices = npu.list_devices().await?;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].arch(), Arch::Warboy);
    assert_eq!(devices[1].arch(), Arch::Rngd);
    assert_eq!(devices[1].pe_indices().len(), 8);
    assert_eq!(devices[1].fused_files().count(), 3);
    assert!(devices[1]
        .list_device_files()
        .iter()
        .all(|f| f.device_index() == 1));

    let json = serde_json::to_value(&devices[0]).unwrap();
    assert_eq!(json["arch"], "warboy");
    Ok(())
}

#[tokio::test]
async fn test_structured_requests() -> DeviceResult<()> {
    let host = Host::new();
    let npu = create_interface(host.system());

    let fused = npu
        .find_device_files(&DeviceConfig::rngd().fused().count(2))
        .await?;
    let names: Vec<String> = fused.iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["npu1pe0-1", "npu1pe2-3"]);
    assert!(fused.iter().all(|f| f.mode() == DeviceMode::Fusion));

    // Both halves of npu1 are taken, so the 4-PE range cannot be claimed
    let err = npu
        .find_device_files(&"rngd(fused)*1".parse()?)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::DeviceBusy { .. }));

    let err = npu
        .find_device_files(&DeviceConfig::warboy().count(3))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::InsufficientDevices { .. }));
    Ok(())
}

#[tokio::test]
async fn test_explicit_requests() -> DeviceResult<()> {
    let host = Host::new();
    let npu = create_interface(host.system());

    let held = npu.open_device_file("npu1pe2").await?;
    let found = npu
        .find_device_files(&"1:2,npu1pe3,npu0".parse()?)
        .await?;
    let names: Vec<String> = found.iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["npu1pe3", "npu0"]);

    let device = npu.get_device(1).await?;
    let status = npu.pe_status(&device).await?;
    assert_eq!(status[&2], PeStatus::Occupied("npu1pe2".to_string()));
    assert_eq!(status[&3], PeStatus::Occupied("npu1pe3".to_string()));
    assert_eq!(status[&0], PeStatus::Available);

    drop(held);
    drop(found);
    let file = npu.open_device_file("npu1pe2").await?.release();
    assert_eq!(file.filename(), "npu1pe2");
    Ok(())
}

#[tokio::test]
async fn test_invalid_requests() -> DeviceResult<()> {
    let host = Host::new();
    let npu = create_interface(host.system());

    let err = npu
        .find_device_files(&"npu0pe3".parse()?)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidSpecifier { .. }));

    assert!(matches!(
        npu.open_device_file("npu2").await,
        Err(DeviceError::DeviceNotFound(_))
    ));

    // units sharing a PE can never be claimed together
    let err = "npu1pe0-3,npu1pe2".parse::<DeviceConfig>().unwrap_err();
    assert!(matches!(err, DeviceError::InvalidSpecifier { .. }));
    Ok(())
}

#[tokio::test]
async fn test_metadata_and_holders() -> DeviceResult<()> {
    let host = Host::new();
    let mgmt = host.sysfs().join("class/npu_mgmt/npu1_mgmt");
    fs::write(mgmt.join("fw_version"), "2.0.0, 1a2b3c4\n").unwrap();
    fs::write(mgmt.join("alive"), "1\n").unwrap();
    fs::write(
        host.sysfs().join("bus/pci/devices/0000:52:00.0/numa_node"),
        "-1\n",
    )
    .unwrap();

    let proc_dir = host.dir.path().join("proc/812");
    fs::create_dir_all(proc_dir.join("fd")).unwrap();
    fs::write(proc_dir.join("cmdline"), "llm-serve\0--port\08080\0").unwrap();
    std::os::unix::fs::symlink(host.devfs().join("npu1pe2-3"), proc_dir.join("fd/5")).unwrap();

    let npu = create_interface(host.system().with_procfs(host.dir.path().join("proc")));
    let device = npu.get_device(1).await?;
    assert_eq!(device.arch(), Arch::Rngd);
    assert_eq!(device.busname()?, "0000:52:00.0");

    let info = npu.device_info(&device).await?;
    assert_eq!(info.firmware_version.as_deref(), Some("2.0.0, 1a2b3c4"));
    assert_eq!(info.alive, Some(true));
    assert_eq!(info.numa_node, Some(NumaNode::Unsupported));
    assert_eq!(info.driver_version, None);

    let processes = npu.scan_processes().await?;
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].device_file(), "npu1pe2-3");
    assert_eq!(processes[0].cmdline(), "llm-serve --port 8080");
    Ok(())
}

#[tokio::test]
async fn test_sensors() -> DeviceResult<()> {
    let host = Host::new();
    let npu = create_interface(host.system());

    let device = npu.get_device(0).await?;
    let fetcher = device.sensor_fetcher();

    let currents = fetcher.read_currents().await?;
    assert_eq!(currents[0].label, "NPU Current");
    assert_eq!(currents[0].value, 1500);

    let voltages = fetcher.read_voltages().await?;
    assert_eq!(voltages[0].label, "1");

    let temperatures = fetcher.read_temperatures().await?;
    let labels: Vec<&str> = temperatures.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["Ambient", "Peak"]);

    let snapshot = npu.read_sensors(&device).await?;
    assert_eq!(snapshot.powers, fetcher.read_powers_average_blocking()?);
    Ok(())
}

#[test]
fn test_blocking_api() -> DeviceResult<()> {
    let host = Host::new();
    let system = host.system();

    let devices = system.list_devices_blocking()?;
    assert_eq!(
        devices,
        blocking::list_devices_with(host.devfs(), host.sysfs())?
    );

    let claimed = system.find_device_files_blocking(&DeviceConfig::warboy().whole().build())?;
    assert_eq!(claimed[0].name(), "npu0");

    // The whole device holds every PE of npu0
    let err = system
        .find_device_files_blocking(&DeviceConfig::warboy().single().count(1))
        .unwrap_err();
    assert!(err.to_string().ends_with("found but still in use"));

    let status = blocking::pe_status(&devices[0])?;
    assert!(status
        .values()
        .all(|s| *s == PeStatus::Occupied("npu0".to_string())));
    Ok(())
}

#[test]
fn test_config_from_env() -> DeviceResult<()> {
    std::env::set_var("NPUDEV_API_TEST_DEVNAME", "warboy(fused)*1");
    let config = DeviceConfig::from_env("NPUDEV_API_TEST_DEVNAME")
        .or_default()
        .build()?;

    let host = Host::new();
    let claimed = host.system().find_device_files_blocking(&config)?;
    assert_eq!(claimed[0].name(), "npu0pe0-1");
    Ok(())
}
