// CLASSIFICATION: COMMUNITY
// Filename: storage.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Block device lookup and read-only mounting.
//!
//! Enumeration of partitions and the filesystem drivers themselves live
//! in the kernel; this module only resolves a device identifier and
//! tries each supported filesystem until one mounts.

use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid device identifier {0:?}: expected a UUID or an absolute path")]
    InvalidIdentifier(String),
    #[error("device {path} not found: {source}")]
    NotFound { path: PathBuf, source: io::Error },
    #[error("cannot read supported filesystems from {path}: {source}")]
    Filesystems { path: PathBuf, source: io::Error },
    #[error("no supported filesystems")]
    NoFilesystems,
    #[error("cannot mount {device} at {target}: {reason}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        reason: String,
    },
}

/// Mount syscalls, injectable for tests.
pub trait Mounter: Send + Sync {
    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()>;
    fn unmount(&self, target: &Path) -> io::Result<()>;
}

/// Read-only mounts through `mount(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()> {
        use nix::mount::{mount, MsFlags};
        mount(
            Some(device),
            target,
            Some(fstype),
            MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(io::Error::from)
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        nix::mount::umount(target).map_err(io::Error::from)
    }
}

/// A mounted volume, unmounted on drop.
pub struct MountGuard<'a> {
    mounter: &'a dyn Mounter,
    path: PathBuf,
    fstype: String,
}

impl MountGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fstype(&self) -> &str {
        &self.fstype
    }

    /// Resolve an absolute path on the volume.
    pub fn join(&self, file: &Path) -> PathBuf {
        self.path.join(file.strip_prefix("/").unwrap_or(file))
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        match self.mounter.unmount(&self.path) {
            Ok(()) => debug!("Unmounted {}", self.path.display()),
            Err(e) => warn!("Failed to unmount {}: {}", self.path.display(), e),
        }
    }
}

/// Resolve a UUID (via `by_uuid_dir`) or an absolute device path.
pub fn locate_device(config: &StorageConfig, identifier: &str) -> Result<PathBuf, DeviceError> {
    let path = if uuid::Uuid::parse_str(identifier).is_ok() {
        config.by_uuid_dir.join(identifier)
    } else if Path::new(identifier).is_absolute() {
        PathBuf::from(identifier)
    } else {
        return Err(DeviceError::InvalidIdentifier(identifier.to_string()));
    };
    fs::metadata(&path).map_err(|source| DeviceError::NotFound {
        path: path.clone(),
        source,
    })?;
    info!("Located boot device {}", path.display());
    Ok(path)
}

/// Parse `/proc/filesystems`, skipping `nodev` pseudo filesystems.
pub fn parse_filesystems(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fs| !fs.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configured filesystem list, or the kernel's block filesystems.
pub fn supported_filesystems(config: &StorageConfig) -> Result<Vec<String>, DeviceError> {
    if !config.filesystems.is_empty() {
        return Ok(config.filesystems.clone());
    }
    let listing = fs::read_to_string(&config.filesystems_file).map_err(|source| {
        DeviceError::Filesystems {
            path: config.filesystems_file.clone(),
            source,
        }
    })?;
    Ok(parse_filesystems(&listing))
}

/// Mount point for `identifier` below `mount_base`.
pub fn mount_point(config: &StorageConfig, identifier: &str) -> PathBuf {
    let name = Path::new(identifier)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.replace('/', "_"));
    config.mount_base.join(name)
}

/// Mount `device` at `target` with the first filesystem that succeeds.
pub fn mount<'a>(
    mounter: &'a dyn Mounter,
    device: &Path,
    target: &Path,
    filesystems: &[String],
) -> Result<MountGuard<'a>, DeviceError> {
    let mount_error = |reason: String| DeviceError::Mount {
        device: device.to_path_buf(),
        target: target.to_path_buf(),
        reason,
    };
    if filesystems.is_empty() {
        return Err(DeviceError::NoFilesystems);
    }
    fs::create_dir_all(target).map_err(|e| mount_error(e.to_string()))?;
    let mut failures = Vec::new();
    for fstype in filesystems {
        match mounter.mount(device, target, fstype) {
            Ok(()) => {
                info!("Mounted {} at {} ({})", device.display(), target.display(), fstype);
                return Ok(MountGuard {
                    mounter,
                    path: target.to_path_buf(),
                    fstype: fstype.clone(),
                });
            }
            Err(e) => {
                debug!("mount {} as {} failed: {}", device.display(), fstype, e);
                failures.push(format!("{fstype}: {e}"));
            }
        }
    }
    Err(mount_error(failures.join(", ")))
}
