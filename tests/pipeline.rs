// CLASSIFICATION: COMMUNITY
// Filename: pipeline.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{BindMounter, Fixture, RecordingPower, SnapshotRunner};
use trustboot::archive::{self, BootConfigManifest};
use trustboot::booter::BooterRegistry;
use trustboot::kexec::BootError;
use trustboot::pipeline::{
    BootMode, BootRequest, MeasuredBootPipeline, PipelineFault, Stage,
};
use trustboot::trust::measure::{self, PcrValue, PCR_SIZE};
use trustboot::trust::{SignatureError, SigningKey, SoftTpm, TpmError};

const ZERO: PcrValue = [0u8; PCR_SIZE];

fn signing_key() -> SigningKey {
    SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[42u8; 32]))
}

/// Pack the shared manifest, sign it when `key` is given and install it
/// on the fixture volume.
fn install(fixture: &Fixture, key: Option<&SigningKey>) -> (Vec<u8>, PathBuf) {
    let payload_dir = fixture.root.path().join("payloads");
    fs::create_dir_all(&payload_dir).unwrap();
    let p = common::write_payloads(&payload_dir);
    let bytes = archive::pack(&p.manifest, &p.kernels, &p.initrds, &p.device_trees, key).unwrap();
    if let Some(key) = key {
        fs::write(
            &fixture.config.verification.public_key,
            key.verification_key().to_pem().unwrap(),
        )
        .unwrap();
    }
    let bc_file = fixture.install_archive(&bytes);
    (bytes, bc_file)
}

fn request(fixture: &Fixture, bc_file: PathBuf, mode: BootMode) -> BootRequest {
    BootRequest {
        device: fixture.device_id(),
        bc_file,
        bc_name: Some("test2".into()),
        mode,
    }
}

/// PCR values a verifier computes from the archive alone.
fn expected_pcrs(archive_bytes: &[u8]) -> (PcrValue, PcrValue) {
    let mut pcr7 = ZERO;
    measure::extend_pcr(&mut pcr7, archive_bytes);
    let manifest = BootConfigManifest::from_slice(common::MANIFEST.as_bytes()).unwrap();
    let config = manifest.select(Some("test2")).unwrap();
    let mut pcr8 = ZERO;
    for m in measure::boot_config_measurements(config) {
        measure::extend_pcr(&mut pcr8, &m.data);
    }
    (pcr7, pcr8)
}

struct Harness {
    tpm: SoftTpm,
    runner: Arc<SnapshotRunner>,
    mounter: Arc<BindMounter>,
    power: Arc<RecordingPower>,
}

impl Harness {
    fn new(tpm: SoftTpm) -> Self {
        Self {
            runner: Arc::new(SnapshotRunner::new(tpm.clone())),
            tpm,
            mounter: Arc::new(BindMounter::default()),
            power: Arc::new(RecordingPower::default()),
        }
    }

    fn platform(&self, fixture: &Fixture) -> trustboot::platform::Platform {
        fixture.platform(
            self.runner.clone(),
            self.mounter.clone(),
            self.tpm.clone(),
            self.power.clone(),
        )
    }
}

#[test]
fn measures_everything_before_kexec_execute() {
    common::init_logging();
    let fixture = Fixture::new();
    let key = signing_key();
    let (bytes, bc_file) = install(&fixture, Some(&key));
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Both));
    let err = match pipeline.run() {
        Ok(never) => match never {},
        Err(e) => e,
    };
    // The fake runner "returns" from kexec -e.
    assert_eq!(err.stage, Stage::Exec);
    assert!(matches!(
        err.source,
        PipelineFault::Boot(BootError::ExecReturned)
    ));
    assert_eq!(
        pipeline.stages(),
        [
            Stage::Init,
            Stage::SeedEntropy,
            Stage::OpenTpm,
            Stage::SetupTpm,
            Stage::LocateDevice,
            Stage::MountDevice,
            Stage::ReadArchive,
            Stage::VerifyAndExtract,
            Stage::MeasureIntoPcr,
            Stage::Exec,
        ]
    );

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 2);
    let load = &calls[0];
    assert_eq!(load.program, "kexec");
    assert_eq!(load.args[0], "-l");
    assert_eq!(calls[1].args, ["-e"]);

    let kernel = Path::new(&load.args[1]);
    let extraction_root = kernel.parent().and_then(Path::parent).unwrap();
    assert!(load.args.contains(&"--command-line=console=ttyS0,115200 quiet".to_string()));
    assert!(load
        .args
        .contains(&format!("--dtb={}", extraction_root.join("device-tree/board.dtb").display())));

    let expected = expected_pcrs(&bytes);
    assert_eq!(load.pcrs, expected, "measured before kexec -l");
    assert_eq!(calls[1].pcrs, expected, "measured before kexec -e");
    assert!(harness.tpm.is_owned());

    assert!(!extraction_root.exists(), "extraction dir released before exec");
    let log = harness.mounter.log();
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("mount ") && log[0].ends_with(" ext4"));
    assert!(log[1].starts_with("umount "));
    assert!(harness.power.calls().is_empty());
}

#[test]
fn tampered_archive_goes_to_recovery_without_kexec() {
    common::init_logging();
    let fixture = Fixture::new();
    let key = signing_key();
    let (mut bytes, bc_file) = install(&fixture, Some(&key));
    bytes[20] ^= 0xff;
    fixture.install_archive(&bytes);
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let entry = serde_json::json!({
        "type": "verifiedboot",
        "device": fixture.device_id(),
        "bc_file": bc_file,
        "bc_name": "test2",
    })
    .to_string();
    let booter = BooterRegistry::default().resolve(entry.as_bytes());
    assert_eq!(booter.type_name(), "verifiedboot");

    // Secure recovery only comes back because the fake reboot fails.
    let err = booter.boot(&platform).unwrap_err();
    assert!(matches!(err, BootError::Recovery(_)));
    assert_eq!(harness.power.calls(), ["sync", "reboot"]);
    assert!(harness.runner.calls().is_empty());
    assert_eq!(harness.tpm.pcr(7).unwrap(), ZERO);
    assert_eq!(harness.tpm.pcr(8).unwrap(), ZERO);
}

#[test]
fn verification_failure_names_stage() {
    let fixture = Fixture::new();
    let (mut bytes, bc_file) = install(&fixture, Some(&signing_key()));
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fixture.install_archive(&bytes);
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Both));
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.stage, Stage::VerifyAndExtract);
    assert_eq!(pipeline.stages().last(), Some(&Stage::VerifyAndExtract));
    assert!(err.to_string().starts_with("verify and extract failed"));
}

#[test]
fn measured_only_accepts_unsigned_archive_when_allowed() {
    let mut fixture = Fixture::new();
    fixture.config.verification.allow_unverified = true;
    let (bytes, bc_file) = install(&fixture, None);
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Measured));
    assert_eq!(pipeline.run().unwrap_err().stage, Stage::Exec);
    let calls = harness.runner.calls();
    let mut pcr7 = ZERO;
    measure::extend_pcr(&mut pcr7, &bytes);
    assert_eq!(calls[1].pcrs.0, pcr7);
}

#[test]
fn measured_only_is_refused_by_default() {
    let fixture = Fixture::new();
    let (_, bc_file) = install(&fixture, None);
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Measured));
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.stage, Stage::Init);
    assert!(matches!(
        err.source,
        PipelineFault::Signature(SignatureError::Required(_))
    ));
    assert_eq!(pipeline.stages(), [Stage::Init]);
    assert!(harness.mounter.log().is_empty());
    assert!(harness.runner.calls().is_empty());
}

#[test]
fn measurements_repeat_across_boots() {
    let fixture = Fixture::new();
    let (bytes, bc_file) = install(&fixture, Some(&signing_key()));
    let mut seen = Vec::new();
    for _ in 0..2 {
        let harness = Harness::new(SoftTpm::new());
        let platform = harness.platform(&fixture);
        let mut pipeline = MeasuredBootPipeline::new(
            &platform,
            request(&fixture, bc_file.clone(), BootMode::Both),
        );
        assert_eq!(pipeline.run().unwrap_err().stage, Stage::Exec);
        seen.push((harness.tpm.pcr(7).unwrap(), harness.tpm.pcr(8).unwrap()));
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0], expected_pcrs(&bytes));
}

#[test]
fn verified_only_skips_measurement() {
    let fixture = Fixture::new();
    let (_, bc_file) = install(&fixture, Some(&signing_key()));
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Verified));
    assert_eq!(pipeline.run().unwrap_err().stage, Stage::Exec);
    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].pcrs, (ZERO, ZERO));
}

#[test]
fn disabled_tpm_stops_before_mounting() {
    let fixture = Fixture::new();
    let (_, bc_file) = install(&fixture, Some(&signing_key()));
    let harness = Harness::new(SoftTpm::new().with_flags(true, false));
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Both));
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.stage, Stage::SetupTpm);
    assert!(matches!(err.source, PipelineFault::Tpm(TpmError::Disabled)));
    assert!(harness.mounter.log().is_empty());
    assert!(harness.runner.calls().is_empty());
}

#[test]
fn owned_tpm_with_unreadable_ek_is_reset() {
    let fixture = Fixture::new();
    let (_, bc_file) = install(&fixture, Some(&signing_key()));
    let tpm = SoftTpm::new().with_owner(None).with_broken_ek();
    let harness = Harness::new(tpm);
    let platform = harness.platform(&fixture);

    let mut pipeline =
        MeasuredBootPipeline::new(&platform, request(&fixture, bc_file, BootMode::Both));
    assert_eq!(pipeline.run().unwrap_err().stage, Stage::Exec);
    assert!(harness.tpm.is_owned());
    assert_ne!(harness.tpm.pcr(7).unwrap(), ZERO);
}

#[test]
fn missing_device_is_reported_at_locate_stage() {
    let mut fixture = Fixture::new();
    fixture.config.verification.allow_unverified = true;
    let harness = Harness::new(SoftTpm::new());
    let platform = harness.platform(&fixture);
    let mut pipeline = MeasuredBootPipeline::new(
        &platform,
        BootRequest {
            device: "0c2a4c1e-2f51-4b1f-9d7e-5d1d3f7c2b11".into(),
            bc_file: PathBuf::from("/boot/bc.zip"),
            bc_name: None,
            mode: BootMode::Measured,
        },
    );
    assert_eq!(pipeline.run().unwrap_err().stage, Stage::LocateDevice);
}
