// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Command-line front-end. Parses arguments, loads configuration and
//! dispatches to the library. Boot subcommands end in the recovery
//! policy when they fail; tooling subcommands report errors normally.

pub mod args;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::archive;
use crate::booter::{self, BooterRegistry};
use crate::config::BootloaderConfig;
use crate::pipeline::{BootRequest, MeasuredBootPipeline};
use crate::platform::Platform;
use crate::recovery::fail_stop;
use crate::trust::signature;
use crate::trust::{SigningKey, Verification, VerificationKey};
use crate::vpd::VpdStore;
use args::{Cli, Commands};

/// Entry point used by the `trustboot` binary.
pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    let config =
        BootloaderConfig::resolve(cli.config.as_deref()).context("loading configuration")?;
    match cli.command {
        Commands::Uinit { interval } => uinit(config, Duration::from_secs(interval)),
        Commands::Verifiedboot {
            device,
            bc_file,
            bc_name,
            mode,
            debug,
        } => verifiedboot(
            config,
            BootRequest {
                device,
                bc_file,
                bc_name,
                mode,
            },
            debug,
        ),
        Commands::Entries => entries(&config),
        Commands::Genkeys {
            scheme,
            passphrase,
            private_key,
            public_key,
        } => {
            signature::generate_keypair(
                scheme,
                passphrase.as_deref().map(str::as_bytes),
                &private_key,
                &public_key,
            )
            .context("generating keypair")?;
            println!("{} / {}", private_key.display(), public_key.display());
            Ok(())
        }
        Commands::Pack {
            manifest,
            output,
            kernels,
            initrds,
            device_trees,
            signing_key,
            scheme,
            passphrase,
        } => {
            let signing = signing_key
                .map(|path| {
                    SigningKey::load(&path, scheme, passphrase.as_deref().map(str::as_bytes))
                })
                .transpose()
                .context("loading signing key")?;
            archive::pack_to_file(
                &output,
                &manifest,
                &kernels,
                &initrds,
                &device_trees,
                signing.as_ref(),
            )
            .with_context(|| format!("packing {}", output.display()))
        }
        Commands::Unpack {
            archive: path,
            output,
            public_key,
            scheme,
            unverified,
        } => {
            let verification = if unverified {
                Verification::Unverified
            } else {
                let key_path = public_key.unwrap_or_else(|| config.verification.public_key.clone());
                let scheme = scheme.unwrap_or(config.verification.scheme);
                Verification::Verified(
                    VerificationKey::load(&key_path, scheme).context("loading public key")?,
                )
            };
            unpack(&path, &output, &verification)
        }
        Commands::Verify {
            public_key,
            scheme,
            data,
            signature: sig,
        } => {
            signature::verify_detached(&public_key, scheme, &data, &sig)
                .with_context(|| format!("verifying {}", data.display()))?;
            println!("Signature OK");
            Ok(())
        }
    }
}

fn uinit(config: BootloaderConfig, interval: Duration) -> Result<()> {
    let platform = Platform::system(config);
    let store = VpdStore::new(&platform.config.vpd.dir);
    let entries = booter::discover_entries(
        &store,
        &BooterRegistry::default(),
        platform.config.vpd.precedence,
    );
    info!("Found {} boot entries", entries.len());
    for entry in &entries {
        info!("    {}) {}", entry.name(), String::from_utf8_lossy(&entry.raw_config));
    }
    match booter::boot_sequence(&platform, &entries, interval) {
        Ok(never) => match never {},
        Err(e) => fail_stop(&platform.recovery, &e.to_string()),
    }
}

fn verifiedboot(config: BootloaderConfig, request: BootRequest, debug: bool) -> Result<()> {
    let platform = Platform::system(config);
    if debug {
        info!("Verified boot request: {:?}", request);
    }
    let mut pipeline = MeasuredBootPipeline::new(&platform, request);
    match pipeline.run() {
        Ok(never) => match never {},
        Err(e) => {
            if debug {
                info!("Stages reached: {:?}", pipeline.stages());
            }
            fail_stop(&platform.recovery, &format!("Verified boot failed: {e}"))
        }
    }
}

fn entries(config: &BootloaderConfig) -> Result<()> {
    let store = VpdStore::new(&config.vpd.dir);
    let found = booter::discover_entries(&store, &BooterRegistry::default(), config.vpd.precedence);
    for entry in &found {
        println!(
            "{}\t{}\t{}",
            entry.name(),
            entry.booter.type_name(),
            String::from_utf8_lossy(&entry.raw_config)
        );
    }
    Ok(())
}

fn unpack(path: &Path, output: &Path, verification: &Verification) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let extracted = archive::unpack_into(&bytes, verification, output)
        .with_context(|| format!("unpacking {}", path.display()))?;
    for config in &extracted.manifest.configs {
        println!("{}", config.name);
    }
    Ok(())
}
