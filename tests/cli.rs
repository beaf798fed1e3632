// CLASSIFICATION: COMMUNITY
// Filename: cli.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

mod common;

use clap::Parser;
use serial_test::serial;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use trustboot::cli::args::Cli;
use trustboot::cli::run_with;
use trustboot::config::CONFIG_ENV;
use trustboot::trust::SigningKey;

fn run(args: &[&str]) -> anyhow::Result<()> {
    let mut argv = vec!["trustboot"];
    argv.extend_from_slice(args);
    run_with(Cli::parse_from(argv))
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
#[serial]
fn genkeys_pack_unpack_through_cli() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let p = common::write_payloads(dir.path());
    let private = dir.path().join("private_key.pem");
    let public = dir.path().join("public_key.pem");
    let output = dir.path().join("bc.zip");
    let unpacked = dir.path().join("unpacked");

    run(&["genkeys", "--private-key", s(&private), "--public-key", s(&public)]).unwrap();
    run(&[
        "pack",
        "-m",
        s(&p.manifest),
        "-o",
        s(&output),
        "--kernel",
        s(&p.kernels[0]),
        "--initrd",
        s(&p.initrds[0]),
        "--device-tree",
        s(&p.device_trees[0]),
        "--signing-key",
        s(&private),
    ])
    .unwrap();
    run(&[
        "unpack",
        s(&output),
        "-o",
        s(&unpacked),
        "--public-key",
        s(&public),
        "--scheme",
        "ed25519",
    ])
    .unwrap();
    assert!(unpacked.join("kernel/vmlinuz").is_file());
    assert!(unpacked.join("device-tree/board.dtb").is_file());
}

#[test]
#[serial]
fn unpack_uses_configured_key() {
    let dir = TempDir::new().unwrap();
    let p = common::write_payloads(dir.path());
    let output = dir.path().join("bc.zip");
    let signing = SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[5u8; 32]));
    trustboot::archive::pack_to_file(
        &output,
        &p.manifest,
        &p.kernels,
        &p.initrds,
        &p.device_trees,
        Some(&signing),
    )
    .unwrap();

    let wrong = SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[6u8; 32]));
    fs::write(
        dir.path().join("wrong.pem"),
        wrong.verification_key().to_pem().unwrap(),
    )
    .unwrap();
    fs::write(
        dir.path().join("right.pem"),
        signing.verification_key().to_pem().unwrap(),
    )
    .unwrap();
    let config = dir.path().join("trustboot.toml");
    fs::write(
        &config,
        "[verification]\npublic_key = \"wrong.pem\"\nscheme = \"ed25519\"\n",
    )
    .unwrap();

    std::env::set_var(CONFIG_ENV, &config);
    let rejected = run(&["unpack", s(&output), "-o", s(&dir.path().join("a"))]);
    std::env::remove_var(CONFIG_ENV);
    let err = rejected.unwrap_err();
    assert!(format!("{err:#}").contains("unpacking"));
    assert!(!dir.path().join("a").exists());

    fs::write(
        &config,
        "[verification]\npublic_key = \"right.pem\"\nscheme = \"ed25519\"\n",
    )
    .unwrap();
    run(&[
        "--config",
        s(&config),
        "unpack",
        s(&output),
        "-o",
        s(&dir.path().join("b")),
    ])
    .unwrap();
    assert!(dir.path().join("b/manifest.json").is_file());
}

#[test]
#[serial]
fn verify_detached_signature() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::generate_rsa(1024).unwrap();
    let public = dir.path().join("public_key.pem");
    let data = dir.path().join("blob");
    let sig = dir.path().join("blob.sig");
    fs::write(&public, key.verification_key().to_pem().unwrap()).unwrap();
    fs::write(&data, b"firmware blob").unwrap();
    fs::write(&sig, key.sign(b"firmware blob").unwrap()).unwrap();

    run(&["verify", "--public-key", s(&public), s(&data), s(&sig)]).unwrap();

    fs::write(&data, b"firmware blob!").unwrap();
    assert!(run(&["verify", "--public-key", s(&public), s(&data), s(&sig)]).is_err());
}

#[test]
#[serial]
fn missing_config_file_is_reported() {
    let err = run(&["--config", "/nonexistent/trustboot.toml", "entries"]).unwrap_err();
    assert!(format!("{err:#}").starts_with("loading configuration"));
}
