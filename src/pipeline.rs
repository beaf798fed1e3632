// CLASSIFICATION: COMMUNITY
// Filename: pipeline.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14
//
// ─────────────────────────────────────────────────────────────
// Measured Boot Pipeline
//
// Init → SeedEntropy → OpenTPM → SetupTPM → LocateDevice →
// MountDevice → ReadArchive → VerifyAndExtract → MeasureIntoPCR → Exec
//
// Linear and fail-stop: the first stage error ends the run with a
// `PipelineError` naming the stage. Every PCR extension happens before
// `kexec -e`, and the mount, extraction directory and TPM handle are
// released on every path out of `run`.
// ─────────────────────────────────────────────────────────────

use log::{debug, info, warn};
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::archive::{self, ArchiveError};
use crate::kexec::{self, BootError, KexecImage};
use crate::platform::Platform;
use crate::rng;
use crate::storage::{self, DeviceError};
use crate::trust::measure;
use crate::trust::{SignatureError, TpmError, Verification, VerificationKey};

/// Which protections a verified boot entry asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// Signature check only.
    Verified,
    /// PCR measurement only.
    Measured,
    #[default]
    Both,
}

impl BootMode {
    pub fn verifies(self) -> bool {
        matches!(self, BootMode::Verified | BootMode::Both)
    }

    pub fn measures(self) -> bool {
        matches!(self, BootMode::Measured | BootMode::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BootMode::Verified => "verified",
            BootMode::Measured => "measured",
            BootMode::Both => "both",
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SeedEntropy,
    OpenTpm,
    SetupTpm,
    LocateDevice,
    MountDevice,
    ReadArchive,
    VerifyAndExtract,
    MeasureIntoPcr,
    Exec,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::SeedEntropy => "seed entropy",
            Stage::OpenTpm => "open TPM",
            Stage::SetupTpm => "set up TPM",
            Stage::LocateDevice => "locate device",
            Stage::MountDevice => "mount device",
            Stage::ReadArchive => "read archive",
            Stage::VerifyAndExtract => "verify and extract",
            Stage::MeasureIntoPcr => "measure into PCR",
            Stage::Exec => "exec",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Tpm(#[from] TpmError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// A fatal stage failure.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: PipelineFault,
}

fn at<E: Into<PipelineFault>>(stage: Stage) -> impl FnOnce(E) -> PipelineError {
    move |e| PipelineError {
        stage,
        source: e.into(),
    }
}

/// What a verified boot entry asks the pipeline to boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRequest {
    /// Filesystem UUID or absolute device path.
    pub device: String,
    /// Absolute archive path on that device.
    pub bc_file: PathBuf,
    /// Configuration name; `None` boots the first one.
    pub bc_name: Option<String>,
    pub mode: BootMode,
}

pub struct MeasuredBootPipeline<'a> {
    platform: &'a Platform,
    request: BootRequest,
    history: Vec<Stage>,
}

impl<'a> MeasuredBootPipeline<'a> {
    pub fn new(platform: &'a Platform, request: BootRequest) -> Self {
        Self {
            platform,
            request,
            history: Vec::new(),
        }
    }

    /// Stages entered so far, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.history
    }

    fn enter(&mut self, stage: Stage) -> Stage {
        info!("Boot stage: {}", stage);
        self.history.push(stage);
        stage
    }

    /// Run every stage. Success never returns.
    pub fn run(&mut self) -> Result<Infallible, PipelineError> {
        let platform = self.platform;
        let config = &platform.config;
        let mode = self.request.mode;

        let stage = self.enter(Stage::Init);
        let verification = if mode.verifies() {
            let key = VerificationKey::load(
                &config.verification.public_key,
                config.verification.scheme,
            )
            .map_err(at(stage))?;
            Verification::Verified(key)
        } else if config.verification.allow_unverified {
            warn!("Boot mode {} skips signature verification", mode);
            Verification::Unverified
        } else {
            return Err(at(stage)(SignatureError::Required(format!(
                "boot mode {mode} skips verification and unverified boots are not allowed"
            ))));
        };

        self.enter(Stage::SeedEntropy);
        if config.entropy.enabled {
            match rng::spawn_seeder(&config.entropy) {
                Ok(_) => debug!("Entropy seeder started"),
                Err(e) => warn!("Entropy seeding unavailable: {}", e),
            }
        }

        let stage = self.enter(Stage::OpenTpm);
        let mut tpm = platform.tpm.open().map_err(at(stage))?;

        let stage = self.enter(Stage::SetupTpm);
        tpm.setup(
            config.tpm.owner_secret.as_deref(),
            config.tpm.srk_secret.as_deref(),
        )
        .map_err(at(stage))?;

        let stage = self.enter(Stage::LocateDevice);
        let device =
            storage::locate_device(&config.storage, &self.request.device).map_err(at(stage))?;

        let stage = self.enter(Stage::MountDevice);
        let filesystems = storage::supported_filesystems(&config.storage).map_err(at(stage))?;
        let target = storage::mount_point(&config.storage, &self.request.device);
        let mount = storage::mount(platform.mounter.as_ref(), &device, &target, &filesystems)
            .map_err(at(stage))?;

        let stage = self.enter(Stage::ReadArchive);
        let archive_path = mount.join(&self.request.bc_file);
        let bytes = fs::read(&archive_path).map_err(|source| PipelineError {
            stage,
            source: PipelineFault::Io {
                path: archive_path.clone(),
                source,
            },
        })?;
        drop(mount);
        info!("Read {} bytes from {}", bytes.len(), archive_path.display());

        let stage = self.enter(Stage::VerifyAndExtract);
        let (boot_config, extracted) = archive::select_boot_config(
            &bytes,
            &verification,
            self.request.bc_name.as_deref(),
            &config.tmp_dir,
        )
        .map_err(at(stage))?;

        let stage = self.enter(Stage::MeasureIntoPcr);
        if mode.measures() {
            // The entry as packed, not the per-boot rooted paths.
            let packed = extracted
                .manifest
                .select(self.request.bc_name.as_deref())
                .map_err(ArchiveError::from)
                .map_err(at(stage))?;
            let archive_pcr = config.measurement.archive_pcr;
            tpm.extend_pcr(archive_pcr, &bytes).map_err(at(stage))?;
            for m in measure::boot_config_measurements(packed) {
                debug!("Measuring {} into PCR[{}]", m.label, config.measurement.boot_config_pcr);
                tpm.extend_pcr(config.measurement.boot_config_pcr, &m.data)
                    .map_err(at(stage))?;
            }
            info!("Boot configuration {} measured", boot_config.name);
        } else {
            info!("Boot mode {} skips measurement", mode);
        }

        let stage = self.enter(Stage::Exec);
        let image = KexecImage::from_config(&boot_config).map_err(at(stage))?;
        kexec::load(platform.runner.as_ref(), &config.programs.kexec, &image).map_err(at(stage))?;
        drop(extracted);
        tpm.close();
        let never = kexec::execute(platform.runner.as_ref(), &config.programs.kexec)
            .map_err(at(stage))?;
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_mode_flags() {
        assert!(BootMode::Both.verifies() && BootMode::Both.measures());
        assert!(BootMode::Verified.verifies() && !BootMode::Verified.measures());
        assert!(!BootMode::Measured.verifies() && BootMode::Measured.measures());
        assert_eq!(BootMode::default(), BootMode::Both);
    }

    #[test]
    fn boot_mode_parses_lowercase() {
        let mode: BootMode = serde_json::from_str("\"measured\"").unwrap();
        assert_eq!(mode, BootMode::Measured);
        assert!(serde_json::from_str::<BootMode>("\"MEASURED\"").is_err());
    }

    #[test]
    fn error_names_stage() {
        let err = PipelineError {
            stage: Stage::SetupTpm,
            source: TpmError::Disabled.into(),
        };
        assert!(err.to_string().starts_with("set up TPM failed"));
    }
}
