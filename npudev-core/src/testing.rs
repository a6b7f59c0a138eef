//! Fixture device namespaces for unit tests

use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::sysfs;

/// Temporary `dev` + `sys` tree; regular files stand in for device nodes
pub(crate) struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        fs::create_dir_all(dir.path().join("sys")).unwrap();
        Self { dir }
    }

    /// Two Warboy devices, each with whole, single and fused nodes and sensors
    pub(crate) fn warboy_pair() -> Self {
        let fixture = Self::new();
        for idx in 0..2u8 {
            let busname = format!("0000:6{}:00.0", idx);
            fixture.add_device(idx, "Warboy", &busname);
            for node in ["", "pe0", "pe1", "pe0-1"] {
                fixture.add_node(&format!("npu{}{}", idx, node));
            }
            fixture.add_default_sensors(&busname);
        }
        fixture
    }

    pub(crate) fn devfs(&self) -> PathBuf {
        self.dir.path().join("dev")
    }

    pub(crate) fn sysfs(&self) -> PathBuf {
        self.dir.path().join("sys")
    }

    pub(crate) fn node_path(&self, name: &str) -> PathBuf {
        self.devfs().join(name)
    }

    pub(crate) fn add_node(&self, name: &str) {
        fs::write(self.node_path(name), b"").unwrap();
    }

    /// Replace `alias` with a hard link to `target`, so both share one lock
    pub(crate) fn link_node(&self, alias: &str, target: &str) {
        let alias = self.node_path(alias);
        let _ = fs::remove_file(&alias);
        fs::hard_link(self.node_path(target), alias).unwrap();
    }

    pub(crate) fn add_device(&self, idx: u8, device_type: &str, busname: &str) {
        let sysfs = self.sysfs();
        let type_path = sysfs::mgmt_path(&sysfs, idx, sysfs::DEVICE_TYPE);
        fs::create_dir_all(type_path.parent().unwrap()).unwrap();
        fs::write(type_path, format!("{}\n", device_type)).unwrap();
        fs::write(
            sysfs::mgmt_path(&sysfs, idx, sysfs::BUSNAME),
            format!("{}\n", busname),
        )
        .unwrap();
    }

    pub(crate) fn set_mgmt(&self, idx: u8, file: &str, contents: &str) {
        fs::write(
            sysfs::mgmt_path(&self.sysfs(), idx, file),
            format!("{}\n", contents),
        )
        .unwrap();
    }

    /// Identity, firmware and NUMA attributes beyond what `add_device` writes
    pub(crate) fn add_metadata(&self, idx: u8, busname: &str) {
        for (file, contents) in [
            ("dev", "511:0"),
            ("device_sn", "WBYB0000000000000"),
            ("device_uuid", "00000000-0000-0000-0000-000000000000"),
            ("fw_version", "1.7.0, 0000000"),
            ("version", "1.9.2, 0000000"),
            ("alive", "1"),
            ("heartbeat", "42"),
        ] {
            self.set_mgmt(idx, file, contents);
        }
        let numa = sysfs::numa_node_path(&self.sysfs(), busname);
        fs::create_dir_all(numa.parent().unwrap()).unwrap();
        fs::write(numa, "0\n").unwrap();
    }

    pub(crate) fn procfs(&self) -> PathBuf {
        self.dir.path().join("proc")
    }

    /// A `/proc/<pid>` entry whose descriptors link to the given nodes
    pub(crate) fn add_process(&self, pid: u32, cmdline: &[&str], nodes: &[&str]) {
        let proc_dir = self.procfs().join(pid.to_string());
        let fd_dir = proc_dir.join("fd");
        fs::create_dir_all(&fd_dir).unwrap();

        let mut args = cmdline.join("\0");
        args.push('\0');
        fs::write(proc_dir.join("cmdline"), args).unwrap();

        // fds 0-2 point somewhere else, like a terminal would
        for fd in 0..3 {
            symlink(self.dir.path().join("pts0"), fd_dir.join(fd.to_string())).unwrap();
        }
        for (offset, node) in nodes.iter().enumerate() {
            symlink(self.node_path(node), fd_dir.join((offset + 3).to_string())).unwrap();
        }
    }

    pub(crate) fn hwmon_dir(&self, busname: &str) -> PathBuf {
        sysfs::hwmon_root(&self.sysfs(), busname).join("hwmon0")
    }

    pub(crate) fn add_sensor(&self, busname: &str, file: &str, contents: &str) {
        let dir = self.hwmon_dir(busname);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), format!("{}\n", contents)).unwrap();
    }

    pub(crate) fn add_default_sensors(&self, busname: &str) {
        for (file, contents) in [
            ("name", "npu"),
            ("curr1_input", "1000"),
            ("curr1_label", "Current1"),
            ("curr2_input", "2000"),
            ("curr2_label", "Current2"),
            ("in0_input", "1100"),
            ("in0_label", "Voltage0"),
            ("in1_input", "1200"),
            ("in1_label", "Voltage1"),
            ("power1_average", "1111"),
            ("power1_label", "Power1"),
            ("power2_average", "22222"),
            ("power2_label", "Power2"),
            ("temp1_input", "36000"),
            ("temp1_label", "Temp1"),
            ("temp2_input", "37000"),
            ("temp2_label", "Temp2"),
        ] {
            self.add_sensor(busname, file, contents);
        }
    }
}
