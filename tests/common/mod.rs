// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::fs;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use trustboot::config::{BootloaderConfig, RecoveryConfig, RecoveryMode};
use trustboot::exec::CommandRunner;
use trustboot::platform::Platform;
use trustboot::recovery::{PowerAction, PowerControl, RecoveryPolicy};
use trustboot::storage::Mounter;
use trustboot::trust::measure::PcrValue;
use trustboot::trust::{SoftTpm, SoftTpmOpener};

pub const MANIFEST: &str = r#"{
  "version": 1,
  "configs": [
    {
      "name": "test1",
      "kernel": "vmlinuz",
      "initramfs": "initramfs.cpio",
      "kernel_args": "console=ttyS0"
    },
    {
      "name": "test2",
      "kernel": "vmlinuz",
      "initramfs": "initramfs.cpio",
      "kernel_args": "console=ttyS0,115200 quiet",
      "devicetree": "board.dtb"
    }
  ]
}"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Payload files for [`MANIFEST`].
pub struct Payloads {
    pub manifest: PathBuf,
    pub kernels: Vec<PathBuf>,
    pub initrds: Vec<PathBuf>,
    pub device_trees: Vec<PathBuf>,
}

pub fn write_payloads(dir: &Path) -> Payloads {
    let write = |name: &str, data: &[u8]| {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    };
    Payloads {
        manifest: write("manifest.json", MANIFEST.as_bytes()),
        kernels: vec![write("vmlinuz", b"\x7fELF kernel image")],
        initrds: vec![write("initramfs.cpio", b"070701 initramfs")],
        device_trees: vec![write("board.dtb", b"\xd0\x0d\xfe\xed")],
    }
}

/// One recorded program invocation with the PCR bank at that moment.
#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub pcrs: (PcrValue, PcrValue),
}

/// Records invocations and snapshots PCRs 7 and 8 of a [`SoftTpm`].
pub struct SnapshotRunner {
    pub tpm: SoftTpm,
    pub calls: Mutex<Vec<Call>>,
}

impl SnapshotRunner {
    pub fn new(tpm: SoftTpm) -> Self {
        Self {
            tpm,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for SnapshotRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExitStatus> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            pcrs: (self.tpm.pcr(7).unwrap(), self.tpm.pcr(8).unwrap()),
        });
        Ok(ExitStatus::from_raw(0))
    }
}

/// Accepts every mount without touching the kernel.
#[derive(Default)]
pub struct BindMounter {
    pub log: Mutex<Vec<String>>,
}

impl BindMounter {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Mounter for BindMounter {
    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()> {
        self.log.lock().unwrap().push(format!(
            "mount {} {} {}",
            device.display(),
            target.display(),
            fstype
        ));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("umount {}", target.display()));
        Ok(())
    }
}

/// Records sync and power calls; power always fails so tests continue.
#[derive(Default)]
pub struct RecordingPower {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingPower {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PowerControl for RecordingPower {
    fn sync(&self) -> io::Result<()> {
        self.calls.lock().unwrap().push("sync".into());
        Ok(())
    }

    fn power(&self, action: PowerAction) -> io::Result<Infallible> {
        self.calls.lock().unwrap().push(action.to_string());
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }
}

/// A scratch boot disk: a device node stand-in, a mount base and the
/// archive already present below the mount point.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub device: PathBuf,
    pub config: BootloaderConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::TempDir::new().unwrap();
        let device = root.path().join("sda1");
        fs::write(&device, b"").unwrap();
        let mut config = BootloaderConfig::default();
        config.tmp_dir = root.path().join("tmp");
        config.storage.mount_base = root.path().join("mnt");
        config.storage.filesystems = vec!["ext4".into()];
        config.entropy.enabled = false;
        config.verification.public_key = root.path().join("public_key.pem");
        config.recovery = RecoveryConfig {
            mode: RecoveryMode::Secure,
            ..RecoveryConfig::default()
        };
        Self {
            root,
            device,
            config,
        }
    }

    pub fn device_id(&self) -> String {
        self.device.display().to_string()
    }

    /// Place `bytes` at `/boot/bc.zip` on the fake volume.
    pub fn install_archive(&self, bytes: &[u8]) -> PathBuf {
        let on_volume = self.config.storage.mount_base.join("sda1/boot");
        fs::create_dir_all(&on_volume).unwrap();
        fs::write(on_volume.join("bc.zip"), bytes).unwrap();
        PathBuf::from("/boot/bc.zip")
    }

    pub fn platform(
        &self,
        runner: Arc<SnapshotRunner>,
        mounter: Arc<BindMounter>,
        tpm: SoftTpm,
        power: Arc<RecordingPower>,
    ) -> Platform {
        let recovery = RecoveryPolicy::from_config(&self.config.recovery, power, runner.clone());
        Platform::new(
            self.config.clone(),
            runner,
            mounter,
            Box::new(SoftTpmOpener::new(tpm)),
            recovery,
        )
    }
}
