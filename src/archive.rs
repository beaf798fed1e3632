// CLASSIFICATION: COMMUNITY
// Filename: archive.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14
//
// ─────────────────────────────────────────────────────────────
// Signed Boot-Configuration Archives
//
// Layout of an archive:
//
//   manifest.json            {"version": 1, "configs": [...]}
//   kernel/<basename>        kernels and multiboot kernels
//   initrd/<basename>        initramfs images and multiboot modules
//   device-tree/<basename>   flattened device trees
//   [signature]              optional, appended after the ZIP
//
// The signature covers every byte before it. Nothing inside the
// archive is decoded until that signature has been checked.
// ─────────────────────────────────────────────────────────────

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::trust::signature::{SignatureError, SigningKey, Verification};

pub const MANIFEST_NAME: &str = "manifest.json";
pub const KERNEL_DIR: &str = "kernel";
pub const INITRD_DIR: &str = "initrd";
pub const DEVICE_TREE_DIR: &str = "device-tree";

/// The only manifest schema this loader accepts.
pub const MANIFEST_VERSION: u32 = 1;

const EXTRACT_PREFIX: &str = "bootconfig";

/// Upper bound on the DEFLATE expansion ratio.
const MAX_DEFLATE_RATIO: u64 = 1032;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u32),
    #[error("no manifest.json in archive")]
    Missing,
    #[error("manifest contains no boot configurations")]
    Empty,
    #[error("no matching configuration found: {0}")]
    NoMatchingConfig(String),
    #[error("configuration {0} must name exactly one of kernel and multiboot_kernel")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a valid ZIP archive: {0}")]
    Format(String),
    #[error("malformed archive entry: {0}")]
    MalformedEntry(String),
    #[error("duplicate archive entry {0}")]
    DuplicateEntry(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => ArchiveError::Io {
                path: PathBuf::new(),
                source,
            },
            other => ArchiveError::Format(other.to_string()),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One bootable configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initramfs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devicetree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiboot_kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiboot_args: Option<String>,
    /// `"<path> [args]"` per module.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multiboot_modules: Vec<String>,
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl BootConfig {
    /// Exactly one of a Linux kernel or a multiboot kernel is named.
    pub fn is_valid(&self) -> bool {
        is_set(&self.kernel) != is_set(&self.multiboot_kernel)
    }

    pub fn is_multiboot(&self) -> bool {
        is_set(&self.multiboot_kernel)
    }

    /// Rewrite relative payload paths to absolute paths below `root`.
    pub fn rooted_at(&self, root: &Path) -> BootConfig {
        let under = |sub: &str, value: &Option<String>| {
            value.as_deref().map(|v| root_path(root, sub, v))
        };
        BootConfig {
            name: self.name.clone(),
            kernel: under(KERNEL_DIR, &self.kernel),
            initramfs: under(INITRD_DIR, &self.initramfs),
            kernel_args: self.kernel_args.clone(),
            devicetree: under(DEVICE_TREE_DIR, &self.devicetree),
            multiboot_kernel: under(KERNEL_DIR, &self.multiboot_kernel),
            multiboot_args: self.multiboot_args.clone(),
            multiboot_modules: self
                .multiboot_modules
                .iter()
                .map(|module| match module.split_once(' ') {
                    Some((path, args)) => format!("{} {}", root_path(root, INITRD_DIR, path), args),
                    None => root_path(root, INITRD_DIR, module),
                })
                .collect(),
        }
    }
}

fn root_path(root: &Path, sub: &str, value: &str) -> String {
    if value.is_empty() || Path::new(value).is_absolute() {
        value.to_string()
    } else {
        root.join(sub).join(value).to_string_lossy().into_owned()
    }
}

/// Parsed `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootConfigManifest {
    pub version: u32,
    pub configs: Vec<BootConfig>,
}

impl BootConfigManifest {
    pub fn new(configs: Vec<BootConfig>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            configs,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: BootConfigManifest = serde_json::from_slice(bytes)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(manifest.version));
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Configuration called `name`, or the first one when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<&BootConfig, ManifestError> {
        let config = match name {
            Some(name) => self
                .configs
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| ManifestError::NoMatchingConfig(name.to_string()))?,
            None => self.configs.first().ok_or(ManifestError::Empty)?,
        };
        if !config.is_valid() {
            return Err(ManifestError::InvalidConfig(config.name.clone()));
        }
        Ok(config)
    }
}

#[derive(Debug)]
enum ExtractionDir {
    Temporary(TempDir),
    Persistent(PathBuf),
}

/// Verified archive contents on disk.
///
/// A temporary extraction directory is removed when this is dropped.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub manifest: BootConfigManifest,
    dir: ExtractionDir,
}

impl ExtractedArchive {
    pub fn dir(&self) -> &Path {
        match &self.dir {
            ExtractionDir::Temporary(dir) => dir.path(),
            ExtractionDir::Persistent(dir) => dir,
        }
    }
}

fn add_files(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    dir: &str,
    files: &[PathBuf],
) -> Result<(), ArchiveError> {
    zip.add_directory(format!("{dir}/"), options)?;
    let mut seen = HashSet::new();
    for file in files {
        let base = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::MalformedEntry(file.display().to_string()))?;
        let entry = format!("{dir}/{base}");
        if !seen.insert(base.to_string()) {
            return Err(ArchiveError::DuplicateEntry(entry));
        }
        let data = fs::read(file).map_err(io_error(file))?;
        zip.start_file(entry.as_str(), options)?;
        zip.write_all(&data).map_err(io_error(file))?;
        debug!("Packed {} as {}", file.display(), entry);
    }
    Ok(())
}

/// Build an archive from a manifest and payload files, signing it when
/// `signing` is given.
pub fn pack(
    manifest_path: &Path,
    kernels: &[PathBuf],
    initrds: &[PathBuf],
    device_trees: &[PathBuf],
    signing: Option<&SigningKey>,
) -> Result<Vec<u8>, ArchiveError> {
    let manifest = fs::read(manifest_path).map_err(io_error(manifest_path))?;
    let parsed = BootConfigManifest::from_slice(&manifest)?;
    if parsed.configs.is_empty() {
        return Err(ManifestError::Empty.into());
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(MANIFEST_NAME, options)?;
    zip.write_all(&manifest).map_err(io_error(manifest_path))?;
    add_files(&mut zip, options, KERNEL_DIR, kernels)?;
    add_files(&mut zip, options, INITRD_DIR, initrds)?;
    add_files(&mut zip, options, DEVICE_TREE_DIR, device_trees)?;
    let mut bytes = zip.finish()?.into_inner();

    match signing {
        Some(key) => {
            let signature = key.sign(&bytes)?;
            info!(
                "Signed boot configuration with {} ({} byte signature)",
                key.scheme(),
                signature.len()
            );
            bytes.extend_from_slice(&signature);
        }
        None => warn!("Boot configuration archive is not signed"),
    }
    Ok(bytes)
}

/// [`pack`] and write the result to `output`.
pub fn pack_to_file(
    output: &Path,
    manifest_path: &Path,
    kernels: &[PathBuf],
    initrds: &[PathBuf],
    device_trees: &[PathBuf],
    signing: Option<&SigningKey>,
) -> Result<(), ArchiveError> {
    let bytes = pack(manifest_path, kernels, initrds, device_trees, signing)?;
    fs::write(output, &bytes).map_err(io_error(output))?;
    info!("Wrote boot configuration {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

/// Authenticate `bytes` and return the ZIP body.
///
/// This is the only function that looks at archive bytes before they are
/// trusted; it never interprets them.
pub fn verified_body<'a>(
    bytes: &'a [u8],
    verification: &Verification,
) -> Result<&'a [u8], SignatureError> {
    match verification {
        Verification::Verified(key) => {
            let want = key.signature_len();
            if bytes.len() < want {
                return Err(SignatureError::Short {
                    want,
                    got: bytes.len(),
                });
            }
            let (body, signature) = bytes.split_at(bytes.len() - want);
            key.verify(body, signature)?;
            info!("Boot configuration signature verified ({})", key.scheme());
            Ok(body)
        }
        Verification::Unverified => {
            warn!("No public key specified, the archive will be unpacked without verification");
            Ok(bytes)
        }
    }
}

/// Reject entries whose central directory sizes cannot be backed by
/// `available` bytes of archive.
fn check_declared_size(
    name: &str,
    method: CompressionMethod,
    size: u64,
    compressed: u64,
    available: usize,
) -> Result<(), ArchiveError> {
    let ratio = if method == CompressionMethod::Stored {
        1
    } else {
        MAX_DEFLATE_RATIO
    };
    if compressed > available as u64 || size > compressed.saturating_mul(ratio) {
        return Err(ArchiveError::MalformedEntry(format!(
            "{name} declares {size} bytes ({compressed} compressed) in a {available} byte archive"
        )));
    }
    Ok(())
}

/// Unpack an authenticated ZIP body.
fn extract(body: &[u8], dir: ExtractionDir) -> Result<ExtractedArchive, ArchiveError> {
    let mut zip = ZipArchive::new(Cursor::new(body))?;
    let root = match &dir {
        ExtractionDir::Temporary(tmp) => tmp.path().to_path_buf(),
        ExtractionDir::Persistent(path) => path.clone(),
    };
    let mut manifest = None;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        if name.is_empty() {
            return Err(ArchiveError::MalformedEntry(format!("entry {i} has an empty name")));
        }
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ArchiveError::MalformedEntry(format!("{name} escapes the archive")))?;
        let destination = root.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(io_error(&destination))?;
            debug!("Extracted directory {}", name);
            continue;
        }
        check_declared_size(
            &name,
            entry.compression(),
            entry.size(),
            entry.compressed_size(),
            body.len(),
        )?;
        let mut data = Vec::with_capacity(entry.size().min(body.len() as u64) as usize);
        entry.read_to_end(&mut data).map_err(io_error(&destination))?;
        if name == MANIFEST_NAME {
            manifest = Some(BootConfigManifest::from_slice(&data)?);
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&destination, &data).map_err(io_error(&destination))?;
        debug!("Extracted file {} ({} bytes)", name, data.len());
    }
    let manifest = manifest.ok_or(ManifestError::Missing)?;
    info!("Unpacked boot configuration into {}", root.display());
    Ok(ExtractedArchive { manifest, dir })
}

/// Verify and unpack into a fresh temporary directory.
pub fn unpack(bytes: &[u8], verification: &Verification) -> Result<ExtractedArchive, ArchiveError> {
    unpack_in(bytes, verification, &std::env::temp_dir())
}

/// Verify and unpack into a fresh directory below `parent`.
pub fn unpack_in(
    bytes: &[u8],
    verification: &Verification,
    parent: &Path,
) -> Result<ExtractedArchive, ArchiveError> {
    // Checked first so a bad archive never creates a directory.
    let body = verified_body(bytes, verification)?;
    fs::create_dir_all(parent).map_err(io_error(parent))?;
    let tmp = tempfile::Builder::new()
        .prefix(EXTRACT_PREFIX)
        .tempdir_in(parent)
        .map_err(io_error(parent))?;
    extract(body, ExtractionDir::Temporary(tmp))
}

/// Verify and unpack into `dir`, which is kept afterwards.
pub fn unpack_into(
    bytes: &[u8],
    verification: &Verification,
    dir: &Path,
) -> Result<ExtractedArchive, ArchiveError> {
    let body = verified_body(bytes, verification)?;
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    extract(body, ExtractionDir::Persistent(dir.to_path_buf()))
}

/// Unpack and return the configuration called `name` with its payload
/// paths rooted in the extraction directory.
pub fn get_boot_config(
    bytes: &[u8],
    verification: &Verification,
    name: &str,
) -> Result<(BootConfig, ExtractedArchive), ArchiveError> {
    select_boot_config(bytes, verification, Some(name), &std::env::temp_dir())
}

/// Like [`get_boot_config`]; `None` selects the first configuration and
/// extraction happens below `parent`.
pub fn select_boot_config(
    bytes: &[u8],
    verification: &Verification,
    name: Option<&str>,
    parent: &Path,
) -> Result<(BootConfig, ExtractedArchive), ArchiveError> {
    let extracted = unpack_in(bytes, verification, parent)?;
    let config = extracted.manifest.select(name)?.rooted_at(extracted.dir());
    info!("Selected boot configuration {}", config.name);
    Ok((config, extracted))
}
