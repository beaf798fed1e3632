// CLASSIFICATION: COMMUNITY
// Filename: args.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::BootMode;
use crate::trust::SignatureScheme;

/// Command-line interface for `trustboot`.
#[derive(Parser, Debug)]
#[command(
    name = "trustboot",
    about = "Verified and measured LinuxBoot loader",
    version
)]
pub struct Cli {
    /// Configuration file; defaults to $TRUSTBOOT_CONFIG, then built-in defaults.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Try every boot entry in the variable store, then fail-stop.
    Uinit {
        /// Seconds to wait between entries.
        #[arg(short = 'I', long, default_value_t = 1)]
        interval: u64,
    },
    /// Boot one archive from local storage.
    Verifiedboot {
        /// Filesystem UUID or absolute device path.
        #[arg(short, long)]
        device: String,
        /// Absolute archive path on the device.
        #[arg(short = 'b', long)]
        bc_file: PathBuf,
        /// Configuration name; the first one when omitted.
        #[arg(short = 'n', long)]
        bc_name: Option<String>,
        #[arg(short, long, value_enum, default_value_t = BootMode::Both)]
        mode: BootMode,
        #[arg(short = 'D', long)]
        debug: bool,
    },
    /// List boot entries and the booter each resolves to.
    Entries,
    /// Generate a signing keypair.
    Genkeys {
        #[arg(long, value_enum, default_value_t = SignatureScheme::Ed25519)]
        scheme: SignatureScheme,
        /// Encrypt the private key with this passphrase.
        #[arg(long)]
        passphrase: Option<String>,
        #[arg(long, default_value = "private_key.pem")]
        private_key: PathBuf,
        #[arg(long, default_value = "public_key.pem")]
        public_key: PathBuf,
    },
    /// Build a boot configuration archive.
    Pack {
        #[arg(short, long)]
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long = "kernel")]
        kernels: Vec<PathBuf>,
        #[arg(long = "initrd")]
        initrds: Vec<PathBuf>,
        #[arg(long = "device-tree")]
        device_trees: Vec<PathBuf>,
        /// Private key; the archive is left unsigned without one.
        #[arg(long)]
        signing_key: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SignatureScheme::Ed25519)]
        scheme: SignatureScheme,
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Verify and extract an archive.
    Unpack {
        archive: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Overrides the configured verification key.
        #[arg(long)]
        public_key: Option<PathBuf>,
        #[arg(long, value_enum)]
        scheme: Option<SignatureScheme>,
        /// Skip signature verification.
        #[arg(long, conflicts_with = "public_key")]
        unverified: bool,
    },
    /// Check a detached signature over a file.
    Verify {
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long, value_enum, default_value_t = SignatureScheme::RsaPkcs1v15Sha256)]
        scheme: SignatureScheme,
        data: PathBuf,
        signature: PathBuf,
    },
}
