// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · trustboot trust anchor
// Date Modified: 2026-10-14
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Trust Anchor – Root Module
//
// Everything the loader relies on to decide whether a boot
// configuration may run, and to record what actually ran.
//
// ## Sub-modules
// * `signature` – ed25519 / RSA-PKCS1v15 keys and verification.
// * `measure`   – PCR extension arithmetic and the fixed
//                 boot-config measurement order.
// * `tpm`       – TPM handle, ownership state machine, soft TPM.
// * `tpm12`     – TPM 1.2 wire protocol over `/dev/tpm0`.
// ─────────────────────────────────────────────────────────────

pub mod measure;
pub mod signature;
pub mod tpm;
pub mod tpm12;

pub use signature::{SignatureError, SignatureScheme, SigningKey, Verification, VerificationKey};
pub use tpm::{LinuxTpmOpener, SoftTpm, SoftTpmOpener, TpmError, TpmInfo, TpmOpener, TrustAnchor};
