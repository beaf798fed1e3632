// CLASSIFICATION: COMMUNITY
// Filename: measure.rs · trustboot trust anchor
// Date Modified: 2026-10-14
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Measured‑boot helpers
//
// TPM 1.2 PCR arithmetic using SHA‑1 plus the fixed order in which
// a selected boot configuration is recorded. No TPM interaction is
// performed here; `TrustAnchor` forwards the digests to hardware.
//
// # Public API
// * [`extend_pcr`] – in‑place `PCR := SHA1(PCR || SHA1(data))`.
// * [`boot_config_measurements`] – labelled fields in measure order.
// ─────────────────────────────────────────────────────────────

#![forbid(unsafe_code)]

use sha1::{Digest, Sha1};

use crate::archive::BootConfig;

/// Width of a TPM 1.2 PCR.
pub const PCR_SIZE: usize = 20;

/// A PCR value or SHA‑1 digest.
pub type PcrValue = [u8; PCR_SIZE];

/// Raw boot artefacts and archives.
pub const BLOB_PCR: u32 = 7;
/// Selected boot configuration fields.
pub const BOOT_CONFIG_PCR: u32 = 8;
/// Configuration data read from firmware.
pub const CONFIG_DATA_PCR: u32 = 8;
/// Firmware variable contents.
pub const NVRAM_VARS_PCR: u32 = 9;

/// SHA‑1 of `data`.
pub fn digest(data: &[u8]) -> PcrValue {
    Sha1::digest(data).into()
}

/// Extend `pcr` with an already computed digest.
pub fn extend_digest(pcr: &mut PcrValue, digest: &PcrValue) {
    let mut hasher = Sha1::new();
    hasher.update(&pcr[..]);
    hasher.update(digest);
    *pcr = hasher.finalize().into();
}

/// Extend a 20‑byte PCR **in place** with the hash of `data`.
///
/// Pseudocode: `PCR := SHA1(PCR || SHA1(data))`
pub fn extend_pcr(pcr: &mut PcrValue, data: &[u8]) {
    extend_digest(pcr, &digest(data));
}

/// One labelled value destined for a PCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub label: String,
    pub data: Vec<u8>,
}

impl Measurement {
    fn field(label: &str, value: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            data: value.unwrap_or_default().as_bytes().to_vec(),
        }
    }
}

/// Fields of `config` in measurement order: name, kernel, initramfs,
/// kernel_args, device_tree, multiboot, multiboot_args, then each module.
///
/// Absent fields are measured as the empty string so the sequence length
/// only depends on the module count.
pub fn boot_config_measurements(config: &BootConfig) -> Vec<Measurement> {
    let mut out = vec![
        Measurement::field("name", Some(&config.name)),
        Measurement::field("kernel", config.kernel.as_deref()),
        Measurement::field("initramfs", config.initramfs.as_deref()),
        Measurement::field("kernel_args", config.kernel_args.as_deref()),
        Measurement::field("device_tree", config.devicetree.as_deref()),
        Measurement::field("multiboot", config.multiboot_kernel.as_deref()),
        Measurement::field("multiboot_args", config.multiboot_args.as_deref()),
    ];
    for (i, module) in config.multiboot_modules.iter().enumerate() {
        out.push(Measurement::field(&format!("module{i}"), Some(module)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcr_is_not_zero_after_extend() {
        let mut pcr = [0u8; PCR_SIZE];
        extend_pcr(&mut pcr, b"trustboot");
        assert!(pcr.iter().any(|&b| b != 0));
    }

    #[test]
    fn second_extend_changes_value() {
        let mut pcr = [0u8; PCR_SIZE];
        extend_pcr(&mut pcr, b"first");
        let first = pcr;
        extend_pcr(&mut pcr, b"second");
        assert_ne!(pcr, first);
    }

    #[test]
    fn extend_hashes_data_before_chaining() {
        let mut pcr = [0u8; PCR_SIZE];
        extend_pcr(&mut pcr, b"d1");
        extend_pcr(&mut pcr, b"d2");

        let mut expected = [0u8; PCR_SIZE];
        let mut h = Sha1::new();
        h.update(expected);
        h.update(Sha1::digest(b"d1"));
        expected = h.finalize().into();
        let mut h = Sha1::new();
        h.update(expected);
        h.update(Sha1::digest(b"d2"));
        expected = h.finalize().into();
        assert_eq!(pcr, expected);

        let mut swapped = [0u8; PCR_SIZE];
        extend_pcr(&mut swapped, b"d2");
        extend_pcr(&mut swapped, b"d1");
        assert_ne!(pcr, swapped);
    }

    #[test]
    fn boot_config_fields_follow_fixed_order() {
        let config = BootConfig {
            name: "test2".into(),
            kernel: Some("/x/kernel/vmlinuz".into()),
            kernel_args: Some("console=ttyS0".into()),
            multiboot_modules: vec!["a".into(), "b".into()],
            ..BootConfig::default()
        };
        let labels: Vec<_> = boot_config_measurements(&config)
            .into_iter()
            .map(|m| m.label)
            .collect();
        assert_eq!(
            labels,
            [
                "name",
                "kernel",
                "initramfs",
                "kernel_args",
                "device_tree",
                "multiboot",
                "multiboot_args",
                "module0",
                "module1"
            ]
        );
    }
}
