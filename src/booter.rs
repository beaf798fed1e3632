// CLASSIFICATION: COMMUNITY
// Filename: booter.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14
//
// ─────────────────────────────────────────────────────────────
// Boot Entries & Booter Registry
//
// Boot entries live in the firmware variable store as JSON blobs
// under `Boot0000` .. `Boot9999`. Each blob is resolved to exactly one
// `Booter` by trying the registered parsers in order; anything no
// parser accepts becomes `Booter::Null`, so a bad entry can never stop
// the boot sequence.
// ─────────────────────────────────────────────────────────────

use log::{debug, info, warn};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::kexec::{self, BootError};
use crate::pipeline::{BootMode, BootRequest, MeasuredBootPipeline};
use crate::platform::Platform;
use crate::vpd::{VarStoreError, VariableStore};

/// Highest boot entry slot.
pub const MAX_SLOT: u16 = 9999;

pub const NULL_TYPE: &str = "null";
pub const NETBOOT_TYPE: &str = "netboot";
pub const VERIFIEDBOOT_TYPE: &str = "verifiedboot";

/// Userclass sent by the netboot client.
pub const NETBOOT_USERCLASS: &str = "linuxboot";

/// Variable store key for `slot`.
pub fn slot_key(slot: u16) -> String {
    format!("Boot{slot:04}")
}

/// Which region wins when a slot exists in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryPrecedence {
    #[default]
    ReadWriteFirst,
    ReadOnlyFirst,
}

impl EntryPrecedence {
    /// `read_only` flags in lookup order.
    fn regions(self) -> [bool; 2] {
        match self {
            EntryPrecedence::ReadWriteFirst => [false, true],
            EntryPrecedence::ReadOnlyFirst => [true, false],
        }
    }
}

/// Why a parser rejected an entry. Logged, never returned by the
/// registry.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("invalid entry JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entry type {found:?} is not {expected}")]
    WrongType { expected: &'static str, found: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigParseError {
    ConfigParseError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_type(expected: &'static str, found: &str) -> Result<(), ConfigParseError> {
    if found == expected {
        Ok(())
    } else {
        Err(ConfigParseError::WrongType {
            expected,
            found: found.to_string(),
        })
    }
}

/// Does nothing. Stands in for every unrecognised entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullBooter;

impl NullBooter {
    pub fn boot(&self) -> Result<(), BootError> {
        info!("Null booter does nothing");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetMethod {
    Dhcpv6,
    Slaac,
    Dhcpv4,
}

/// Network boot through the external `netboot` program.
///
/// ```json
/// {"type": "netboot", "method": "dhcpv6", "mac": "aa:bb:cc:dd:ee:ff",
///  "override_url": "http://[fe80::1]:8080/boot", "retries": 3}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetBooter {
    #[serde(rename = "type")]
    pub kind: String,
    pub method: NetMethod,
    #[serde(default)]
    pub mac: Option<String>,
    /// Replaces the boot file URL handed out by DHCP.
    #[serde(default)]
    pub override_url: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
}

impl NetBooter {
    pub fn parse(raw: &[u8]) -> Result<Self, ConfigParseError> {
        let booter: NetBooter = serde_json::from_slice(raw)?;
        check_type(NETBOOT_TYPE, &booter.kind)?;
        if booter.method == NetMethod::Slaac && booter.override_url.is_none() {
            return Err(invalid("override_url", "required with slaac"));
        }
        Ok(booter)
    }

    /// Arguments passed to the netboot program.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            "-userclass".to_string(),
            NETBOOT_USERCLASS.to_string(),
        ];
        if let Some(url) = &self.override_url {
            args.push("-netboot-url".into());
            args.push(url.clone());
        }
        if let Some(retries) = self.retries {
            args.push("-retries".into());
            args.push(retries.to_string());
        }
        args
    }

    pub fn boot(&self, platform: &Platform) -> Result<(), BootError> {
        kexec::run(
            platform.runner.as_ref(),
            &platform.config.programs.netboot,
            &self.args(),
        )
    }
}

/// Verified and/or measured boot from a signed archive on local storage.
///
/// ```json
/// {"type": "verifiedboot", "device": "597ca453-ddb4-499b-8385-aa1383133249",
///  "bc_file": "/boot/bc.zip", "bc_name": "linux", "boot_mode": "both"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifiedBooter {
    #[serde(rename = "type")]
    pub kind: String,
    /// Filesystem UUID or absolute device path.
    #[serde(alias = "device_uuid")]
    pub device: String,
    pub bc_file: PathBuf,
    #[serde(default)]
    pub bc_name: Option<String>,
    #[serde(default)]
    pub boot_mode: BootMode,
    #[serde(default)]
    pub debug: bool,
}

impl VerifiedBooter {
    pub fn parse(raw: &[u8]) -> Result<Self, ConfigParseError> {
        let booter: VerifiedBooter = serde_json::from_slice(raw)?;
        check_type(VERIFIEDBOOT_TYPE, &booter.kind)?;
        let device_ok = uuid::Uuid::parse_str(&booter.device).is_ok()
            || Path::new(&booter.device).is_absolute();
        if !device_ok {
            return Err(invalid("device", "expected a UUID or an absolute path"));
        }
        if !booter.bc_file.is_absolute() {
            return Err(invalid("bc_file", "must be an absolute path"));
        }
        Ok(booter)
    }

    pub fn request(&self) -> BootRequest {
        BootRequest {
            device: self.device.clone(),
            bc_file: self.bc_file.clone(),
            bc_name: self.bc_name.clone(),
            mode: self.boot_mode,
        }
    }

    /// Run the measured boot pipeline. Any failure goes to the recovery
    /// policy; a permissive policy lets the error come back here.
    pub fn boot(&self, platform: &Platform) -> Result<(), BootError> {
        let request = self.request();
        if self.debug {
            info!("Verified boot request: {:?}", request);
        }
        let mut pipeline = MeasuredBootPipeline::new(platform, request);
        let err = match pipeline.run() {
            Ok(never) => match never {},
            Err(e) => e,
        };
        if self.debug {
            info!("Stages reached: {:?}", pipeline.stages());
        }
        platform
            .recovery
            .recover(&format!("Verified boot failed: {err}"))
            .map_err(|e| BootError::Recovery(e.to_string()))?;
        Err(BootError::Pipeline(Box::new(err)))
    }
}

/// The resolved behaviour of one boot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Booter {
    Null(NullBooter),
    Net(NetBooter),
    Verified(VerifiedBooter),
}

impl Booter {
    pub fn type_name(&self) -> &str {
        match self {
            Booter::Null(_) => NULL_TYPE,
            Booter::Net(b) => &b.kind,
            Booter::Verified(b) => &b.kind,
        }
    }

    pub fn boot(&self, platform: &Platform) -> Result<(), BootError> {
        match self {
            Booter::Null(b) => b.boot(),
            Booter::Net(b) => b.boot(platform),
            Booter::Verified(b) => b.boot(platform),
        }
    }
}

/// Entry parser registered under a type discriminant.
pub type ParseFn = fn(&[u8]) -> Result<Booter, ConfigParseError>;

fn parse_netboot(raw: &[u8]) -> Result<Booter, ConfigParseError> {
    NetBooter::parse(raw).map(Booter::Net)
}

fn parse_verifiedboot(raw: &[u8]) -> Result<Booter, ConfigParseError> {
    VerifiedBooter::parse(raw).map(Booter::Verified)
}

/// Ordered `(discriminant, parser)` table.
#[derive(Debug, Clone)]
pub struct BooterRegistry {
    parsers: Vec<(&'static str, ParseFn)>,
}

impl Default for BooterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(NETBOOT_TYPE, parse_netboot);
        registry.register(VERIFIEDBOOT_TYPE, parse_verifiedboot);
        registry
    }
}

impl BooterRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Append a parser; earlier registrations are tried first.
    pub fn register(&mut self, discriminant: &'static str, parse: ParseFn) {
        self.parsers.push((discriminant, parse));
    }

    pub fn discriminants(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|(d, _)| *d).collect()
    }

    /// First parser that accepts `raw` with a matching type wins.
    pub fn resolve(&self, raw: &[u8]) -> Booter {
        for (discriminant, parse) in &self.parsers {
            match parse(raw) {
                Ok(booter) if booter.type_name() == *discriminant => return booter,
                Ok(booter) => debug!(
                    "Parser {} produced a {} booter, ignoring",
                    discriminant,
                    booter.type_name()
                ),
                Err(e) => debug!("Not a {} entry: {}", discriminant, e),
            }
        }
        debug!("No booter accepts entry, using null booter");
        Booter::Null(NullBooter)
    }
}

/// One slot of the variable store and its booter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub slot: u16,
    pub raw_config: Vec<u8>,
    pub booter: Booter,
}

impl BootEntry {
    pub fn name(&self) -> String {
        slot_key(self.slot)
    }
}

fn lookup(
    store: &dyn VariableStore,
    key: &str,
    precedence: EntryPrecedence,
) -> Option<Vec<u8>> {
    for read_only in precedence.regions() {
        match store.get(key, read_only) {
            Ok(value) => return Some(value),
            Err(VarStoreError::NotFound(_)) => {}
            Err(e) => warn!("Skipping {} ({}): {}", key, if read_only { "ro" } else { "rw" }, e),
        }
    }
    None
}

/// Scan every slot and resolve one entry per populated slot.
pub fn discover_entries(
    store: &dyn VariableStore,
    registry: &BooterRegistry,
    precedence: EntryPrecedence,
) -> Vec<BootEntry> {
    (0..=MAX_SLOT)
        .filter_map(|slot| {
            let raw_config = lookup(store, &slot_key(slot), precedence)?;
            let booter = registry.resolve(&raw_config);
            debug!("{} resolved to {}", slot_key(slot), booter.type_name());
            Some(BootEntry {
                slot,
                raw_config,
                booter,
            })
        })
        .collect()
}

/// Try every entry in order, pausing `interval` between attempts.
///
/// Only returns once every entry has been tried.
pub fn boot_sequence(
    platform: &Platform,
    entries: &[BootEntry],
    interval: Duration,
) -> Result<Infallible, BootError> {
    for entry in entries {
        info!(
            "Trying boot entry {} ({}): {}",
            entry.name(),
            entry.booter.type_name(),
            String::from_utf8_lossy(&entry.raw_config)
        );
        match entry.booter.boot(platform) {
            Ok(()) => info!("Boot entry {} returned", entry.name()),
            Err(e) => warn!("Boot entry {} failed: {}", entry.name(), e),
        }
        if !interval.is_zero() {
            debug!("Sleeping {:?} before next entry", interval);
            std::thread::sleep(interval);
        }
    }
    Err(BootError::NoBootableEntry)
}
