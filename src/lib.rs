// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Date Modified: 2026-10-14
// Author: Lukas Bower

//! Root library for the trustboot verified/measured boot loader.
//!
//! The boot flow is: discover entries in the firmware variable store,
//! resolve each entry to a [`booter::Booter`], and for verified entries
//! run the [`pipeline::MeasuredBootPipeline`] which authenticates a
//! signed boot-configuration archive, measures it into the TPM and
//! kexecs into the selected kernel. Every fatal error ends in the single
//! [`recovery::RecoveryPolicy`] held by the [`platform::Platform`].

/// Signed ZIP boot-configuration archives and their manifest.
pub mod archive;

/// Boot entries and the booter registry.
pub mod booter;

/// Command-line front-end.
pub mod cli;

/// Runtime configuration.
pub mod config;

/// External program execution.
pub mod exec;

/// kexec load/execute helpers.
pub mod kexec;

/// Measured boot pipeline.
pub mod pipeline;

/// Collaborators shared by every boot attempt.
pub mod platform;

/// Fail-stop recovery policies.
pub mod recovery;

/// Hardware RNG entropy seeding.
pub mod rng;

/// Block device lookup and mounting.
pub mod storage;

/// TPM handle, PCR measurement and signature verification.
pub mod trust;

/// Firmware variable store (VPD).
pub mod vpd;
