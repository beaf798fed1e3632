// CLASSIFICATION: COMMUNITY
// Filename: tpm.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! TPM handle and ownership state machine.
//!
//! A [`TrustAnchor`] is opened once per pipeline run by a [`TpmOpener`]
//! and passed by `&mut` to every stage that measures or changes
//! ownership. The capability flags come from sysfs and may be unknown
//! on a deactivated or disabled chip; only an explicit `0` is treated as
//! a negative answer.

use log::{debug, info, warn};
use sha1::{Digest, Sha1};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::measure::{self, PcrValue, PCR_SIZE};
use super::signature::{SignatureError, VerificationKey};
use super::tpm12::{self, Tpm12Device};

/// TPM specification this loader drives.
pub const SUPPORTED_SPEC: &str = "1.2";

/// Number of PCRs on a TPM 1.2.
pub const PCR_COUNT: u32 = 24;

const SPEC_PREFIX: &str = "TCG version: ";

/// 20-byte authorisation value.
pub type AuthValue = [u8; PCR_SIZE];

/// Derive an authorisation value from a secret; `None` or an empty
/// secret selects the well-known secret (20 zero bytes).
pub fn auth_value(secret: Option<&str>) -> AuthValue {
    match secret.filter(|s| !s.is_empty()) {
        Some(secret) => Sha1::digest(secret.as_bytes()).into(),
        None => [0u8; PCR_SIZE],
    }
}

/// Public endorsement key as reported by the chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubEk {
    pub modulus: Vec<u8>,
    pub exponent: u32,
}

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("cannot open TPM {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("TPM I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("TPM command {ordinal:#x} failed with code {code:#x}")]
    Command { ordinal: u32, code: u32 },
    #[error("malformed TPM response: {0}")]
    Malformed(String),
    #[error("TPM crypto failure: {0}")]
    Crypto(String),
    #[error("unsupported TPM specification {0}")]
    UnsupportedSpec(String),
    #[error("TPM is disabled")]
    Disabled,
    #[error("TPM is deactivated")]
    Deactivated,
    #[error("PCR index {0} out of range")]
    InvalidPcr(u32),
}

/// Raw TPM operations used by [`TrustAnchor`].
pub trait TpmDevice: Send {
    /// Extend `pcr` with a precomputed digest; returns the new value.
    fn extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<PcrValue, TpmError>;
    fn read_pcr(&mut self, pcr: u32) -> Result<PcrValue, TpmError>;
    /// Read the EK without authorisation (unowned chips only).
    fn read_pubek(&mut self) -> Result<PubEk, TpmError>;
    /// Read the EK as owner.
    fn owner_read_pubek(&mut self, owner_auth: &AuthValue) -> Result<PubEk, TpmError>;
    fn take_ownership(
        &mut self,
        owner_auth: &AuthValue,
        srk_auth: &AuthValue,
        pubek: &PubEk,
    ) -> Result<(), TpmError>;
    fn owner_clear(&mut self, owner_auth: &AuthValue) -> Result<(), TpmError>;
}

/// Capability state read from sysfs. `None` means the query failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmInfo {
    pub specification: Option<String>,
    pub owned: Option<bool>,
    pub active: Option<bool>,
    pub enabled: Option<bool>,
}

fn read_flag(path: &Path) -> Option<bool> {
    let text = fs::read_to_string(path).ok()?;
    match text.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        other => {
            debug!("unexpected TPM flag {:?} in {}", other, path.display());
            None
        }
    }
}

impl TpmInfo {
    /// Query `caps`, `owned`, `active` and `enabled` under `sysfs_dir`.
    pub fn read(sysfs_dir: &Path) -> Self {
        let specification = fs::read_to_string(sysfs_dir.join("caps"))
            .ok()
            .and_then(|caps| Self::parse_spec(&caps));
        Self {
            specification,
            owned: read_flag(&sysfs_dir.join("owned")),
            active: read_flag(&sysfs_dir.join("active")),
            enabled: read_flag(&sysfs_dir.join("enabled")),
        }
    }

    /// Extract the TCG version from a `caps` listing.
    pub fn parse_spec(caps: &str) -> Option<String> {
        caps.lines()
            .find_map(|line| line.trim().strip_prefix(SPEC_PREFIX))
            .map(|spec| spec.trim().to_string())
    }
}

/// Open TPM handle plus its capability state.
pub struct TrustAnchor {
    device: Box<dyn TpmDevice>,
    info: TpmInfo,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor").field("info", &self.info).finish()
    }
}

impl TrustAnchor {
    pub fn new(device: Box<dyn TpmDevice>, info: TpmInfo) -> Self {
        Self { device, info }
    }

    pub fn info(&self) -> &TpmInfo {
        &self.info
    }

    /// Bring the chip into an owned, usable state.
    ///
    /// Unowned chips are taken with the given secrets. A chip marked
    /// owned whose EK cannot be read with the owner secret is cleared
    /// and taken again.
    pub fn setup(&mut self, owner: Option<&str>, srk: Option<&str>) -> Result<(), TpmError> {
        match self.info.specification.as_deref() {
            Some(SUPPORTED_SPEC) => {}
            Some(other) => return Err(TpmError::UnsupportedSpec(other.to_string())),
            None => warn!("TPM specification unknown, assuming {}", SUPPORTED_SPEC),
        }
        if self.info.enabled == Some(false) {
            return Err(TpmError::Disabled);
        }
        if self.info.active == Some(false) {
            return Err(TpmError::Deactivated);
        }

        if self.info.owned != Some(true) {
            info!("TPM not owned, taking ownership");
            return self.take_ownership(owner, srk);
        }

        match self.device.owner_read_pubek(&auth_value(owner)) {
            Ok(_) => {
                info!("TPM already owned, endorsement key readable");
                Ok(())
            }
            Err(e) => {
                warn!("TPM owned but endorsement key unreadable ({e}), resetting ownership");
                self.clear_ownership(owner)?;
                self.take_ownership(owner, srk)
            }
        }
    }

    pub fn take_ownership(&mut self, owner: Option<&str>, srk: Option<&str>) -> Result<(), TpmError> {
        let pubek = self.device.read_pubek()?;
        self.device
            .take_ownership(&auth_value(owner), &auth_value(srk), &pubek)?;
        self.info.owned = Some(true);
        info!("TPM ownership taken");
        Ok(())
    }

    pub fn clear_ownership(&mut self, owner: Option<&str>) -> Result<(), TpmError> {
        self.device.owner_clear(&auth_value(owner))?;
        self.info.owned = Some(false);
        info!("TPM ownership cleared");
        Ok(())
    }

    /// Hash `data` and extend it into PCR `index`.
    pub fn extend_pcr(&mut self, index: u32, data: &[u8]) -> Result<PcrValue, TpmError> {
        if index >= PCR_COUNT {
            return Err(TpmError::InvalidPcr(index));
        }
        let digest = measure::digest(data);
        let value = self.device.extend(index, &digest)?;
        debug!("PCR[{index}] extended with {}", hex::encode(digest));
        Ok(value)
    }

    pub fn read_pcr(&mut self, index: u32) -> Result<PcrValue, TpmError> {
        if index >= PCR_COUNT {
            return Err(TpmError::InvalidPcr(index));
        }
        self.device.read_pcr(index)
    }

    /// Check `signature` over `data` with `key`.
    pub fn verify_signature(
        &self,
        key: &VerificationKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        key.verify(data, signature)
    }

    /// Release the device handle.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for TrustAnchor {
    fn drop(&mut self) {
        debug!("TPM handle closed");
    }
}

/// Produces the per-run [`TrustAnchor`].
pub trait TpmOpener: Send + Sync {
    fn open(&self) -> Result<TrustAnchor, TpmError>;
}

/// Opens the TPM 1.2 character device and reads sysfs state.
#[derive(Debug, Clone)]
pub struct LinuxTpmOpener {
    pub device: PathBuf,
    pub sysfs_dir: PathBuf,
}

impl TpmOpener for LinuxTpmOpener {
    fn open(&self) -> Result<TrustAnchor, TpmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .map_err(|source| TpmError::Open {
                path: self.device.clone(),
                source,
            })?;
        let info = TpmInfo::read(&self.sysfs_dir);
        info!("Opened TPM {} ({:?})", self.device.display(), info);
        Ok(TrustAnchor::new(Box::new(Tpm12Device::new(file)), info))
    }
}

#[derive(Debug)]
struct SoftTpmState {
    pcrs: Vec<PcrValue>,
    owner: Option<AuthValue>,
    ek_readable: bool,
    active: bool,
    enabled: bool,
}

/// In-memory TPM 1.2 model.
///
/// Clones share one PCR bank so a test can keep a handle while the
/// pipeline owns another.
#[derive(Debug, Clone)]
pub struct SoftTpm {
    state: Arc<Mutex<SoftTpmState>>,
}

impl Default for SoftTpm {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(SoftTpmState {
                pcrs: vec![[0u8; PCR_SIZE]; PCR_COUNT as usize],
                owner: None,
                ek_readable: true,
                active: true,
                enabled: true,
            })),
        }
    }
}

const SOFT_EK_MODULUS: [u8; 256] = [0xA5; 256];

impl SoftTpm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SoftTpmState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the chip owned with `owner`'s authorisation.
    pub fn with_owner(self, owner: Option<&str>) -> Self {
        self.lock().owner = Some(auth_value(owner));
        self
    }

    /// Simulate an owned chip whose EK can no longer be read.
    pub fn with_broken_ek(self) -> Self {
        self.lock().ek_readable = false;
        self
    }

    pub fn with_flags(self, active: bool, enabled: bool) -> Self {
        {
            let mut state = self.lock();
            state.active = active;
            state.enabled = enabled;
        }
        self
    }

    pub fn pcr(&self, index: u32) -> Result<PcrValue, TpmError> {
        let idx = Self::check_pcr(index)?;
        Ok(self.lock().pcrs[idx])
    }

    pub fn is_owned(&self) -> bool {
        self.lock().owner.is_some()
    }

    pub fn info(&self) -> TpmInfo {
        let state = self.lock();
        TpmInfo {
            specification: Some(SUPPORTED_SPEC.to_string()),
            owned: Some(state.owner.is_some()),
            active: Some(state.active),
            enabled: Some(state.enabled),
        }
    }

    fn check_pcr(pcr: u32) -> Result<usize, TpmError> {
        if pcr < PCR_COUNT {
            Ok(pcr as usize)
        } else {
            Err(TpmError::InvalidPcr(pcr))
        }
    }

    fn check_owner(state: &SoftTpmState, ordinal: u32, auth: &AuthValue) -> Result<(), TpmError> {
        match state.owner {
            Some(owner) if owner == *auth => Ok(()),
            _ => Err(TpmError::Command {
                ordinal,
                code: tpm12::TPM_AUTHFAIL,
            }),
        }
    }

    fn ek() -> PubEk {
        PubEk {
            modulus: SOFT_EK_MODULUS.to_vec(),
            exponent: 65537,
        }
    }
}

impl TpmDevice for SoftTpm {
    fn extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<PcrValue, TpmError> {
        let idx = Self::check_pcr(pcr)?;
        let mut state = self.lock();
        measure::extend_digest(&mut state.pcrs[idx], digest);
        Ok(state.pcrs[idx])
    }

    fn read_pcr(&mut self, pcr: u32) -> Result<PcrValue, TpmError> {
        let idx = Self::check_pcr(pcr)?;
        Ok(self.lock().pcrs[idx])
    }

    fn read_pubek(&mut self) -> Result<PubEk, TpmError> {
        if self.lock().owner.is_some() {
            return Err(TpmError::Command {
                ordinal: tpm12::ORD_READ_PUBEK,
                code: tpm12::TPM_DISABLED_CMD,
            });
        }
        Ok(Self::ek())
    }

    fn owner_read_pubek(&mut self, owner_auth: &AuthValue) -> Result<PubEk, TpmError> {
        let state = self.lock();
        Self::check_owner(&state, tpm12::ORD_OWNER_READ_INTERNAL_PUB, owner_auth)?;
        if !state.ek_readable {
            return Err(TpmError::Malformed("endorsement key unavailable".into()));
        }
        Ok(Self::ek())
    }

    fn take_ownership(
        &mut self,
        owner_auth: &AuthValue,
        _srk_auth: &AuthValue,
        pubek: &PubEk,
    ) -> Result<(), TpmError> {
        let mut state = self.lock();
        if state.owner.is_some() {
            return Err(TpmError::Command {
                ordinal: tpm12::ORD_TAKE_OWNERSHIP,
                code: tpm12::TPM_OWNER_SET,
            });
        }
        if *pubek != Self::ek() {
            return Err(TpmError::Crypto("foreign endorsement key".into()));
        }
        state.owner = Some(*owner_auth);
        state.ek_readable = true;
        Ok(())
    }

    fn owner_clear(&mut self, owner_auth: &AuthValue) -> Result<(), TpmError> {
        let mut state = self.lock();
        Self::check_owner(&state, tpm12::ORD_OWNER_CLEAR, owner_auth)?;
        state.owner = None;
        state.pcrs.iter_mut().for_each(|p| *p = [0u8; PCR_SIZE]);
        Ok(())
    }
}

/// Hands out [`TrustAnchor`]s backed by a shared [`SoftTpm`].
#[derive(Debug, Clone, Default)]
pub struct SoftTpmOpener {
    pub tpm: SoftTpm,
}

impl SoftTpmOpener {
    pub fn new(tpm: SoftTpm) -> Self {
        Self { tpm }
    }
}

impl TpmOpener for SoftTpmOpener {
    fn open(&self) -> Result<TrustAnchor, TpmError> {
        Ok(TrustAnchor::new(Box::new(self.tpm.clone()), self.tpm.info()))
    }
}
