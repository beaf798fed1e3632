// CLASSIFICATION: COMMUNITY
// Filename: signature.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Signing and verification keys for boot-configuration archives.
//!
//! Two schemes are supported: ed25519 (64-byte signatures) and
//! RSA-PKCS1v15 over SHA-256 (signatures as long as the modulus). Keys
//! are read from PEM (PKCS#1, PKCS#8/SPKI, optionally passphrase
//! encrypted) or, for ed25519, from raw 32-byte material in binary or
//! hex form.

use ed25519_dalek::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use log::info;
use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Length of an ed25519 signature.
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// Default RSA modulus size for generated keys.
pub const RSA_KEY_BITS: usize = 4096;

/// File permissions for written key material.
const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

/// Signature failures. None of these is ever downgraded to a warning.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature missing: {0}")]
    Missing(String),
    #[error("short signature: want {want} bytes, got {got}")]
    Short { want: usize, got: usize },
    #[error("invalid {0} signature")]
    Invalid(SignatureScheme),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("cannot load key {path}: {reason}")]
    Key { path: PathBuf, reason: String },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("signature verification required: {0}")]
    Required(String),
}

/// Signature algorithm used for archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
pub enum SignatureScheme {
    #[serde(rename = "ed25519")]
    #[value(name = "ed25519")]
    Ed25519,
    #[serde(rename = "rsa-pkcs1v15-sha256")]
    #[value(name = "rsa-pkcs1v15-sha256")]
    RsaPkcs1v15Sha256,
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureScheme::Ed25519 => f.write_str("ed25519"),
            SignatureScheme::RsaPkcs1v15Sha256 => f.write_str("rsa-pkcs1v15-sha256"),
        }
    }
}

/// Public key used to check archive signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Rsa(RsaPublicKey),
}

/// Whether an archive must be authenticated before it is opened.
///
/// The unverified path is explicit at every call site.
#[derive(Debug, Clone)]
pub enum Verification {
    Verified(VerificationKey),
    Unverified,
}

/// Private key used by the packing tool.
#[derive(Clone)]
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Rsa(Box<RsaPrivateKey>),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&self.scheme()).finish()
    }
}

fn key_error(path: &Path, reason: impl fmt::Display) -> SignatureError {
    SignatureError::Key {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn is_pem(bytes: &[u8]) -> bool {
    bytes.trim_ascii_start().starts_with(b"-----BEGIN")
}

/// Decode raw 32-byte ed25519 material given as binary or hex text.
fn raw_ed25519(bytes: &[u8]) -> Option<[u8; 32]> {
    if let Ok(raw) = <[u8; 32]>::try_from(bytes) {
        return Some(raw);
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let decoded = hex::decode(text.trim()).ok()?;
    decoded.try_into().ok()
}

impl VerificationKey {
    /// Load a public key file for `scheme`.
    pub fn load(path: &Path, scheme: SignatureScheme) -> Result<Self, SignatureError> {
        let bytes = fs::read(path).map_err(|e| key_error(path, e))?;
        Self::from_bytes(&bytes, scheme).map_err(|reason| key_error(path, reason))
    }

    /// Parse public key material for `scheme`.
    pub fn from_bytes(bytes: &[u8], scheme: SignatureScheme) -> Result<Self, String> {
        match scheme {
            SignatureScheme::Ed25519 => {
                if is_pem(bytes) {
                    let pem = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
                    ed25519_dalek::VerifyingKey::from_public_key_pem(pem)
                        .map(VerificationKey::Ed25519)
                        .map_err(|e| e.to_string())
                } else {
                    let raw = raw_ed25519(bytes)
                        .ok_or_else(|| "ed25519 public key must be 32 bytes".to_string())?;
                    ed25519_dalek::VerifyingKey::from_bytes(&raw)
                        .map(VerificationKey::Ed25519)
                        .map_err(|e| e.to_string())
                }
            }
            SignatureScheme::RsaPkcs1v15Sha256 => {
                let pem = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
                if pem.contains("BEGIN RSA PUBLIC KEY") {
                    RsaPublicKey::from_pkcs1_pem(pem)
                        .map(VerificationKey::Rsa)
                        .map_err(|e| e.to_string())
                } else {
                    <RsaPublicKey as pkcs8::DecodePublicKey>::from_public_key_pem(pem)
                        .map(VerificationKey::Rsa)
                        .map_err(|e| e.to_string())
                }
            }
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            VerificationKey::Ed25519(_) => SignatureScheme::Ed25519,
            VerificationKey::Rsa(_) => SignatureScheme::RsaPkcs1v15Sha256,
        }
    }

    /// Length of the signature block this key verifies.
    pub fn signature_len(&self) -> usize {
        match self {
            VerificationKey::Ed25519(_) => ED25519_SIGNATURE_LEN,
            VerificationKey::Rsa(key) => key.size(),
        }
    }

    /// Check `signature` over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let want = self.signature_len();
        if signature.len() != want {
            return Err(SignatureError::Short {
                want,
                got: signature.len(),
            });
        }
        match self {
            VerificationKey::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| SignatureError::Malformed(e.to_string()))?;
                key.verify_strict(data, &sig)
                    .map_err(|_| SignatureError::Invalid(self.scheme()))
            }
            VerificationKey::Rsa(key) => {
                let sig = pkcs1v15::Signature::try_from(signature)
                    .map_err(|e| SignatureError::Malformed(e.to_string()))?;
                pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(data, &sig)
                    .map_err(|_| SignatureError::Invalid(self.scheme()))
            }
        }
    }

    /// Encode as PEM (`PUBLIC KEY`, SPKI).
    pub fn to_pem(&self) -> Result<String, SignatureError> {
        let pem = match self {
            VerificationKey::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
            VerificationKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| SignatureError::Signing(e.to_string()))
    }
}

impl SigningKey {
    /// Load a private key file; `passphrase` decrypts PKCS#8-encrypted PEM.
    pub fn load(
        path: &Path,
        scheme: SignatureScheme,
        passphrase: Option<&[u8]>,
    ) -> Result<Self, SignatureError> {
        let bytes = fs::read(path).map_err(|e| key_error(path, e))?;
        Self::from_bytes(&bytes, scheme, passphrase).map_err(|reason| key_error(path, reason))
    }

    pub fn from_bytes(
        bytes: &[u8],
        scheme: SignatureScheme,
        passphrase: Option<&[u8]>,
    ) -> Result<Self, String> {
        if !is_pem(bytes) {
            if scheme != SignatureScheme::Ed25519 {
                return Err("RSA private keys must be PEM encoded".into());
            }
            let raw = raw_ed25519(bytes)
                .ok_or_else(|| "ed25519 private key must be 32 bytes".to_string())?;
            return Ok(SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&raw)));
        }
        let pem = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        let encrypted = pem.contains("BEGIN ENCRYPTED PRIVATE KEY");
        if encrypted && passphrase.is_none() {
            return Err("private key is encrypted but no passphrase was given".into());
        }
        match scheme {
            SignatureScheme::Ed25519 => {
                let key = match passphrase.filter(|_| encrypted) {
                    Some(pass) => ed25519_dalek::SigningKey::from_pkcs8_encrypted_pem(pem, pass),
                    None => ed25519_dalek::SigningKey::from_pkcs8_pem(pem),
                };
                key.map(SigningKey::Ed25519).map_err(|e| e.to_string())
            }
            SignatureScheme::RsaPkcs1v15Sha256 => {
                let key = if pem.contains("BEGIN RSA PRIVATE KEY") {
                    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| e.to_string())
                } else {
                    match passphrase.filter(|_| encrypted) {
                        Some(pass) => {
                            <RsaPrivateKey as pkcs8::DecodePrivateKey>::from_pkcs8_encrypted_pem(
                                pem, pass,
                            )
                        }
                        None => <RsaPrivateKey as pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem),
                    }
                    .map_err(|e| e.to_string())
                };
                key.map(|k| SigningKey::Rsa(Box::new(k)))
            }
        }
    }

    /// Generate a fresh key for `scheme`.
    pub fn generate(scheme: SignatureScheme) -> Result<Self, SignatureError> {
        match scheme {
            SignatureScheme::Ed25519 => Ok(SigningKey::Ed25519(
                ed25519_dalek::SigningKey::generate(&mut OsRng),
            )),
            SignatureScheme::RsaPkcs1v15Sha256 => Self::generate_rsa(RSA_KEY_BITS),
        }
    }

    pub fn generate_rsa(bits: usize) -> Result<Self, SignatureError> {
        RsaPrivateKey::new(&mut OsRng, bits)
            .map(|k| SigningKey::Rsa(Box::new(k)))
            .map_err(|e| SignatureError::Signing(e.to_string()))
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            SigningKey::Ed25519(_) => SignatureScheme::Ed25519,
            SigningKey::Rsa(_) => SignatureScheme::RsaPkcs1v15Sha256,
        }
    }

    pub fn verification_key(&self) -> VerificationKey {
        match self {
            SigningKey::Ed25519(key) => VerificationKey::Ed25519(key.verifying_key()),
            SigningKey::Rsa(key) => VerificationKey::Rsa(key.to_public_key()),
        }
    }

    /// Sign `data`, returning the raw signature block.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        match self {
            SigningKey::Ed25519(key) => Ok(key.sign(data).to_bytes().to_vec()),
            SigningKey::Rsa(key) => {
                let signer = pkcs1v15::SigningKey::<Sha256>::new((**key).clone());
                signer
                    .try_sign(data)
                    .map(|sig| sig.to_vec())
                    .map_err(|e| SignatureError::Signing(e.to_string()))
            }
        }
    }

    /// Encode as PKCS#8 PEM, encrypted when `passphrase` is given.
    pub fn to_pem(&self, passphrase: Option<&[u8]>) -> Result<String, SignatureError> {
        let pem = match (self, passphrase) {
            (SigningKey::Ed25519(key), Some(pass)) => {
                key.to_pkcs8_encrypted_pem(&mut OsRng, pass, LineEnding::LF)
            }
            (SigningKey::Ed25519(key), None) => key.to_pkcs8_pem(LineEnding::LF),
            (SigningKey::Rsa(key), Some(pass)) => {
                key.to_pkcs8_encrypted_pem(&mut OsRng, pass, LineEnding::LF)
            }
            (SigningKey::Rsa(key), None) => key.to_pkcs8_pem(LineEnding::LF),
        };
        pem.map(|p| p.as_str().to_owned())
            .map_err(|e| SignatureError::Signing(e.to_string()))
    }
}

fn write_key(path: &Path, contents: &str, mode: u32) -> Result<(), SignatureError> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, contents).map_err(|e| key_error(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| key_error(path, e))
}

/// Generate a keypair and write it as PEM files.
pub fn generate_keypair(
    scheme: SignatureScheme,
    passphrase: Option<&[u8]>,
    private_path: &Path,
    public_path: &Path,
) -> Result<SigningKey, SignatureError> {
    let key = SigningKey::generate(scheme)?;
    write_key(private_path, &key.to_pem(passphrase)?, PRIVATE_KEY_MODE)?;
    write_key(public_path, &key.verification_key().to_pem()?, PUBLIC_KEY_MODE)?;
    info!(
        "Generated {} keypair: {} / {}",
        scheme,
        private_path.display(),
        public_path.display()
    );
    Ok(key)
}

/// Verify a detached signature file over a data file.
pub fn verify_detached(
    key_path: &Path,
    scheme: SignatureScheme,
    data_path: &Path,
    signature_path: &Path,
) -> Result<(), SignatureError> {
    let key = VerificationKey::load(key_path, scheme)?;
    let data = fs::read(data_path).map_err(|e| key_error(data_path, e))?;
    let signature = fs::read(signature_path).map_err(|e| {
        SignatureError::Missing(format!("{}: {e}", signature_path.display()))
    })?;
    key.verify(&data, &signature)
}
