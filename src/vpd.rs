// CLASSIFICATION: COMMUNITY
// Filename: vpd.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Firmware variable store.
//!
//! Coreboot exposes its VPD partitions under `/sys/firmware/vpd/{ro,rw}`
//! with one file per key. Writes are not supported by the kernel
//! interface, so the store is read-only from the loader's point of view.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VarStoreError {
    #[error("variable {0} not found")]
    NotFound(String),
    #[error("cannot read variable {key}: {source}")]
    Io { key: String, source: io::Error },
}

/// Key/value byte store with read-only and read-write regions.
pub trait VariableStore {
    fn get(&self, key: &str, read_only: bool) -> Result<Vec<u8>, VarStoreError>;
}

/// VPD exposed through sysfs.
#[derive(Debug, Clone)]
pub struct VpdStore {
    root: PathBuf,
}

impl VpdStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn region(&self, read_only: bool) -> PathBuf {
        self.root.join(if read_only { "ro" } else { "rw" })
    }

    /// Every key in one region; an absent region is empty.
    pub fn get_all(&self, read_only: bool) -> Result<BTreeMap<String, Vec<u8>>, VarStoreError> {
        let dir = self.region(read_only);
        let mut vars = BTreeMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vars),
            Err(source) => {
                return Err(VarStoreError::Io {
                    key: dir.display().to_string(),
                    source,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| VarStoreError::Io {
                key: dir.display().to_string(),
                source,
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            let value = self.get(&key, read_only)?;
            vars.insert(key, value);
        }
        Ok(vars)
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains('/')
}

impl VariableStore for VpdStore {
    fn get(&self, key: &str, read_only: bool) -> Result<Vec<u8>, VarStoreError> {
        if !valid_key(key) {
            return Err(VarStoreError::NotFound(key.to_string()));
        }
        let path: PathBuf = self.region(read_only).join(key);
        read_var(&path, key)
    }
}

fn read_var(path: &Path, key: &str) -> Result<Vec<u8>, VarStoreError> {
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => VarStoreError::NotFound(key.to_string()),
        _ => VarStoreError::Io {
            key: key.to_string(),
            source,
        },
    })
}

/// In-memory store for tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub read_write: BTreeMap<String, Vec<u8>>,
    pub read_only: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn with(mut self, key: &str, value: &[u8], read_only: bool) -> Self {
        let region = if read_only {
            &mut self.read_only
        } else {
            &mut self.read_write
        };
        region.insert(key.to_string(), value.to_vec());
        self
    }
}

impl VariableStore for MemoryStore {
    fn get(&self, key: &str, read_only: bool) -> Result<Vec<u8>, VarStoreError> {
        let region = if read_only {
            &self.read_only
        } else {
            &self.read_write
        };
        region
            .get(key)
            .cloned()
            .ok_or_else(|| VarStoreError::NotFound(key.to_string()))
    }
}
