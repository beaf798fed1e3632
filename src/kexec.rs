// CLASSIFICATION: COMMUNITY
// Filename: kexec.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! kexec load and execute through `kexec-tools`.

use log::{error, info};
use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::archive::BootConfig;
use crate::exec::CommandRunner;
use crate::pipeline::PipelineError;

/// Image type passed to `kexec --type` for multiboot kernels.
pub const MULTIBOOT_TYPE: &str = "multiboot-x86";

#[derive(Debug, Error)]
pub enum BootError {
    #[error("boot configuration {0} names neither a kernel nor a multiboot kernel")]
    NoKernel(String),
    #[error("boot payload {0} is missing")]
    MissingPayload(PathBuf),
    #[error("cannot run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
    #[error("kexec returned without replacing the running kernel")]
    ExecReturned,
    #[error("no boot entry could be booted")]
    NoBootableEntry,
    #[error("recovery failed: {0}")]
    Recovery(String),
    #[error(transparent)]
    Pipeline(Box<PipelineError>),
}

/// Everything `kexec -l` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexecImage {
    pub kernel: PathBuf,
    pub initrd: Option<PathBuf>,
    pub cmdline: Option<String>,
    pub dtb: Option<PathBuf>,
    pub multiboot: bool,
    pub modules: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl KexecImage {
    pub fn from_config(config: &BootConfig) -> Result<Self, BootError> {
        if let Some(kernel) = non_empty(&config.multiboot_kernel) {
            return Ok(Self {
                kernel: PathBuf::from(kernel),
                initrd: None,
                cmdline: non_empty(&config.multiboot_args).map(str::to_string),
                dtb: None,
                multiboot: true,
                modules: config.multiboot_modules.clone(),
            });
        }
        let kernel =
            non_empty(&config.kernel).ok_or_else(|| BootError::NoKernel(config.name.clone()))?;
        Ok(Self {
            kernel: PathBuf::from(kernel),
            initrd: non_empty(&config.initramfs).map(PathBuf::from),
            cmdline: non_empty(&config.kernel_args).map(str::to_string),
            dtb: non_empty(&config.devicetree).map(PathBuf::from),
            multiboot: false,
            modules: Vec::new(),
        })
    }

    /// Files that must exist before loading.
    pub fn payloads(&self) -> Vec<&Path> {
        let mut files = vec![self.kernel.as_path()];
        files.extend(self.initrd.as_deref());
        files.extend(self.dtb.as_deref());
        files.extend(
            self.modules
                .iter()
                .filter_map(|m| m.split_whitespace().next())
                .map(Path::new),
        );
        files
    }

    /// Arguments for `kexec -l`.
    pub fn load_args(&self) -> Vec<String> {
        let mut args = vec!["-l".to_string()];
        if self.multiboot {
            args.push(format!("--type={MULTIBOOT_TYPE}"));
        }
        args.push(self.kernel.display().to_string());
        match &self.cmdline {
            Some(cmdline) => args.push(format!("--command-line={cmdline}")),
            None if !self.multiboot => args.push("--reuse-cmdline".to_string()),
            None => {}
        }
        if let Some(initrd) = &self.initrd {
            args.push(format!("--initrd={}", initrd.display()));
        }
        if let Some(dtb) = &self.dtb {
            args.push(format!("--dtb={}", dtb.display()));
        }
        for module in &self.modules {
            args.push(format!("--module={module}"));
        }
        args
    }
}

/// Run `program` and map a non-zero exit to [`BootError::Failed`].
pub(crate) fn run(runner: &dyn CommandRunner, program: &str, args: &[String]) -> Result<(), BootError> {
    let status = runner.run(program, args).map_err(|source| BootError::Spawn {
        program: program.to_string(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(BootError::Failed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

/// Stage `image` for the next kexec.
pub fn load(runner: &dyn CommandRunner, program: &str, image: &KexecImage) -> Result<(), BootError> {
    for payload in image.payloads() {
        if !payload.is_file() {
            return Err(BootError::MissingPayload(payload.to_path_buf()));
        }
    }
    info!("Loading kernel {}", image.kernel.display());
    run(runner, program, &image.load_args())
}

/// Jump into the staged kernel. Only returns on failure.
pub fn execute(runner: &dyn CommandRunner, program: &str) -> Result<Infallible, BootError> {
    info!("Executing into new kernel");
    run(runner, program, &["-e".to_string()])?;
    error!("kexec -e returned");
    Err(BootError::ExecReturned)
}
