// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Runtime configuration for the boot loader.
//!
//! Every field has a default matching a stock LinuxBoot image, so an
//! empty or missing file yields a working configuration. The file path
//! comes from the command line or `TRUSTBOOT_CONFIG`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::booter::EntryPrecedence;
use crate::trust::measure;
use crate::trust::signature::SignatureScheme;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TRUSTBOOT_CONFIG";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootloaderConfig {
    /// Parent directory for archive extraction directories.
    pub tmp_dir: PathBuf,
    pub vpd: VpdConfig,
    pub verification: VerificationConfig,
    pub measurement: MeasurementConfig,
    pub tpm: TpmConfig,
    pub storage: StorageConfig,
    pub recovery: RecoveryConfig,
    pub entropy: EntropyConfig,
    pub programs: ProgramConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VpdConfig {
    pub dir: PathBuf,
    pub precedence: EntryPrecedence,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    pub public_key: PathBuf,
    pub scheme: SignatureScheme,
    /// Permit boot modes that skip signature verification.
    pub allow_unverified: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeasurementConfig {
    /// PCR receiving the raw archive bytes.
    pub archive_pcr: u32,
    /// PCR receiving the selected boot configuration fields.
    pub boot_config_pcr: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TpmConfig {
    pub device: PathBuf,
    pub sysfs_dir: PathBuf,
    /// `None` selects the well-known secret.
    pub owner_secret: Option<String>,
    pub srk_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub by_uuid_dir: PathBuf,
    pub mount_base: PathBuf,
    pub filesystems_file: PathBuf,
    /// Overrides `filesystems_file` when non-empty.
    pub filesystems: Vec<String>,
}

/// Which recovery policy the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    Permissive,
    Secure,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    pub mode: RecoveryMode,
    /// Reboot when true, power off otherwise.
    pub reboot: bool,
    pub sync: bool,
    pub debug: bool,
    pub debug_delay_secs: u64,
    /// Shell or command run by the permissive policy.
    pub shell: Option<PathBuf>,
}

impl RecoveryConfig {
    /// Delay applied before the terminal action, if debugging.
    pub fn debug_delay(&self) -> Option<Duration> {
        self.debug.then(|| Duration::from_secs(self.debug_delay_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntropyConfig {
    pub enabled: bool,
    pub hw_random_current: PathBuf,
    pub hw_random_available: PathBuf,
    pub entropy_avail: PathBuf,
    pub random_device: PathBuf,
    pub hw_random_device: PathBuf,
    pub block_size: usize,
    pub threshold: u64,
    pub feed_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgramConfig {
    pub kexec: String,
    pub netboot: String,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            vpd: VpdConfig::default(),
            verification: VerificationConfig::default(),
            measurement: MeasurementConfig::default(),
            tpm: TpmConfig::default(),
            storage: StorageConfig::default(),
            recovery: RecoveryConfig::default(),
            entropy: EntropyConfig::default(),
            programs: ProgramConfig::default(),
        }
    }
}

impl Default for VpdConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/sys/firmware/vpd"),
            precedence: EntryPrecedence::ReadWriteFirst,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            public_key: PathBuf::from("/etc/security/public_key.pem"),
            scheme: SignatureScheme::Ed25519,
            allow_unverified: false,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            archive_pcr: measure::BLOB_PCR,
            boot_config_pcr: measure::BOOT_CONFIG_PCR,
        }
    }
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/tpm0"),
            sysfs_dir: PathBuf::from("/sys/class/tpm/tpm0"),
            owner_secret: None,
            srk_secret: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            by_uuid_dir: PathBuf::from("/dev/disk/by-uuid"),
            mount_base: PathBuf::from("/mnt"),
            filesystems_file: PathBuf::from("/proc/filesystems"),
            filesystems: Vec::new(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::Secure,
            reboot: true,
            sync: true,
            debug: false,
            debug_delay_secs: 10,
            shell: None,
        }
    }
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hw_random_current: PathBuf::from("/sys/class/misc/hw_random/rng_current"),
            hw_random_available: PathBuf::from("/sys/class/misc/hw_random/rng_available"),
            entropy_avail: PathBuf::from("/proc/sys/kernel/random/entropy_avail"),
            random_device: PathBuf::from("/dev/random"),
            hw_random_device: PathBuf::from("/dev/hwrng"),
            block_size: 128,
            threshold: 3000,
            feed_interval_secs: 1,
        }
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            kexec: "kexec".into(),
            netboot: "netboot".into(),
        }
    }
}

impl BootloaderConfig {
    /// Load a TOML configuration file, rebasing relative paths on the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: BootloaderConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.rebase_paths(path);
        Ok(cfg)
    }

    /// Resolve the configuration from an explicit path, then
    /// `TRUSTBOOT_CONFIG`, then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    fn rebase_paths(&mut self, path: &Path) {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let rebase = |p: &mut PathBuf| *p = Self::join_base(base, p);
        rebase(&mut self.tmp_dir);
        rebase(&mut self.vpd.dir);
        rebase(&mut self.verification.public_key);
        if let Some(shell) = &mut self.recovery.shell {
            *shell = Self::join_base(base, shell);
        }
    }

    fn join_base(base: &Path, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    }
}
