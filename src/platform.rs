// CLASSIFICATION: COMMUNITY
// Filename: platform.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Collaborators shared by every boot attempt.
//!
//! A [`Platform`] bundles the configuration with the side-effecting
//! pieces the boot flow needs: the program runner, the mounter, the TPM
//! opener and the process-wide recovery policy. Production code builds
//! one with [`Platform::system`]; tests assemble fakes with
//! [`Platform::new`].

use std::sync::Arc;

use crate::config::BootloaderConfig;
use crate::exec::{CommandRunner, SystemRunner};
use crate::recovery::{RecoveryPolicy, SystemPower};
use crate::storage::{Mounter, SystemMounter};
use crate::trust::{LinuxTpmOpener, TpmOpener};

pub struct Platform {
    pub config: BootloaderConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub mounter: Arc<dyn Mounter>,
    pub tpm: Box<dyn TpmOpener>,
    pub recovery: RecoveryPolicy,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("config", &self.config)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl Platform {
    pub fn new(
        config: BootloaderConfig,
        runner: Arc<dyn CommandRunner>,
        mounter: Arc<dyn Mounter>,
        tpm: Box<dyn TpmOpener>,
        recovery: RecoveryPolicy,
    ) -> Self {
        Self {
            config,
            runner,
            mounter,
            tpm,
            recovery,
        }
    }

    /// Real processes, mounts, `/dev/tpm0` and reboot syscalls.
    pub fn system(config: BootloaderConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let recovery =
            RecoveryPolicy::from_config(&config.recovery, Arc::new(SystemPower), runner.clone());
        let tpm = LinuxTpmOpener {
            device: config.tpm.device.clone(),
            sysfs_dir: config.tpm.sysfs_dir.clone(),
        };
        Self::new(config, runner, Arc::new(SystemMounter), Box::new(tpm), recovery)
    }
}
