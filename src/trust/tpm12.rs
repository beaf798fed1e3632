// CLASSIFICATION: COMMUNITY
// Filename: tpm12.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! TPM 1.2 command transport.
//!
//! Implements the handful of TPM 1.2 ordinals the loader needs directly
//! over the character device: PCR extend and read, EK retrieval, OIAP
//! sessions, owner clear and take ownership. All integers on the wire are
//! big-endian; authorised commands carry a single OIAP session whose
//! HMAC-SHA1 is checked in both directions.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

use super::measure::{PcrValue, PCR_SIZE};
use super::tpm::{AuthValue, PubEk, TpmDevice, TpmError};

const TAG_RQU_COMMAND: u16 = 0x00C1;
const TAG_RQU_AUTH1_COMMAND: u16 = 0x00C2;
const TAG_RSP_COMMAND: u16 = 0x00C4;
const TAG_RSP_AUTH1_COMMAND: u16 = 0x00C5;

pub const ORD_OIAP: u32 = 0x0000_000A;
pub const ORD_TAKE_OWNERSHIP: u32 = 0x0000_000D;
pub const ORD_EXTEND: u32 = 0x0000_0014;
pub const ORD_PCR_READ: u32 = 0x0000_0015;
pub const ORD_OWNER_CLEAR: u32 = 0x0000_005B;
pub const ORD_READ_PUBEK: u32 = 0x0000_007C;
pub const ORD_OWNER_READ_INTERNAL_PUB: u32 = 0x0000_0081;

/// Return codes surfaced in diagnostics.
pub const TPM_AUTHFAIL: u32 = 0x01;
pub const TPM_DEACTIVATED: u32 = 0x06;
pub const TPM_DISABLED: u32 = 0x07;
pub const TPM_DISABLED_CMD: u32 = 0x08;
pub const TPM_OWNER_SET: u32 = 0x14;

const TPM_PID_OWNER: u16 = 0x0005;
const TPM_KH_EK: u32 = 0x4000_0006;
const TPM_ALG_RSA: u32 = 0x0000_0001;
const TPM_ES_RSAESOAEP_SHA1_MGF1: u16 = 0x0003;
const TPM_SS_NONE: u16 = 0x0001;
const TPM_KEY_STORAGE: u16 = 0x0011;
const TPM_AUTH_ALWAYS: u8 = 0x01;
const SRK_KEY_BITS: u32 = 2048;
const DEFAULT_EXPONENT: u32 = 65537;

const HEADER_LEN: usize = 10;
/// nonceEven + continueAuthSession + resAuth
const RESPONSE_AUTH_LEN: usize = PCR_SIZE + 1 + PCR_SIZE;
const MAX_RESPONSE: usize = 4096;

type Nonce = [u8; PCR_SIZE];

fn malformed(what: &str) -> TpmError {
    TpmError::Malformed(what.to_string())
}

/// Bounds-checked big-endian cursor over a response body.
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TpmError> {
        let end = self.pos.saturating_add(len);
        if end > self.data.len() {
            return Err(malformed("truncated response"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, TpmError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32, TpmError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn read_digest(&mut self) -> Result<PcrValue, TpmError> {
        let mut buf = [0u8; PCR_SIZE];
        buf.copy_from_slice(self.read_bytes(PCR_SIZE)?);
        Ok(buf)
    }

    fn consumed(&self) -> &'a [u8] {
        &self.data[..self.pos]
    }
}

/// Parse a `TPM_PUBKEY` holding an RSA key.
fn decode_pubkey(dec: &mut Decoder<'_>) -> Result<PubEk, TpmError> {
    let algorithm = dec.read_u32()?;
    if algorithm != TPM_ALG_RSA {
        return Err(TpmError::Malformed(format!(
            "unexpected key algorithm {algorithm:#x}"
        )));
    }
    let _enc_scheme = dec.read_u16()?;
    let _sig_scheme = dec.read_u16()?;
    let parm_size = dec.read_u32()? as usize;
    let mut parms = Decoder::new(dec.read_bytes(parm_size)?);
    let _key_bits = parms.read_u32()?;
    let _num_primes = parms.read_u32()?;
    let exp_size = parms.read_u32()? as usize;
    let exponent = match parms.read_bytes(exp_size)? {
        [] => DEFAULT_EXPONENT,
        bytes if bytes.len() <= 4 => bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
        _ => return Err(malformed("RSA exponent too large")),
    };
    let key_len = dec.read_u32()? as usize;
    let modulus = dec.read_bytes(key_len)?.to_vec();
    Ok(PubEk { modulus, exponent })
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// `TPM_KEY` template for a 2048-bit storage root key.
fn srk_template() -> Vec<u8> {
    let mut key = vec![0x01, 0x01, 0x00, 0x00];
    put_u16(&mut key, TPM_KEY_STORAGE);
    put_u32(&mut key, 0);
    key.push(TPM_AUTH_ALWAYS);
    put_u32(&mut key, TPM_ALG_RSA);
    put_u16(&mut key, TPM_ES_RSAESOAEP_SHA1_MGF1);
    put_u16(&mut key, TPM_SS_NONE);
    put_u32(&mut key, 12);
    put_u32(&mut key, SRK_KEY_BITS);
    put_u32(&mut key, 2);
    put_u32(&mut key, 0);
    put_u32(&mut key, 0); // PCRInfoSize
    put_u32(&mut key, 0); // pubKey.keyLength
    put_u32(&mut key, 0); // encSize
    key
}

/// HMAC-SHA1 over a session's rolling nonces.
pub(crate) fn session_hmac(
    key: &AuthValue,
    param_digest: &PcrValue,
    nonce_even: &Nonce,
    nonce_odd: &Nonce,
    continue_session: u8,
) -> Result<PcrValue, TpmError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|e| TpmError::Crypto(e.to_string()))?;
    mac.update(param_digest);
    mac.update(nonce_even);
    mac.update(nonce_odd);
    mac.update(&[continue_session]);
    Ok(mac.finalize().into_bytes().into())
}

struct Session {
    handle: u32,
    nonce_even: Nonce,
}

/// TPM 1.2 over any byte transport, typically `/dev/tpm0`.
pub struct Tpm12Device<T> {
    transport: T,
}

impl<T: Read + Write + Send> Tpm12Device<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send a command and return the response body after the header.
    fn transmit(&mut self, tag: u16, ordinal: u32, body: &[u8]) -> Result<Vec<u8>, TpmError> {
        let size = (HEADER_LEN + body.len()) as u32;
        let mut cmd = Vec::with_capacity(size as usize);
        put_u16(&mut cmd, tag);
        put_u32(&mut cmd, size);
        put_u32(&mut cmd, ordinal);
        cmd.extend_from_slice(body);
        self.transport.write_all(&cmd)?;
        self.transport.flush()?;

        let mut buf = vec![0u8; MAX_RESPONSE];
        let n = self.transport.read(&mut buf)?;
        buf.truncate(n);
        let mut dec = Decoder::new(&buf);
        let rsp_tag = dec.read_u16()?;
        let rsp_size = dec.read_u32()? as usize;
        let code = dec.read_u32()?;
        if rsp_size != n {
            return Err(TpmError::Malformed(format!(
                "response size {rsp_size} but read {n} bytes"
            )));
        }
        if code != 0 {
            return Err(TpmError::Command { ordinal, code });
        }
        let expected = if tag == TAG_RQU_AUTH1_COMMAND {
            TAG_RSP_AUTH1_COMMAND
        } else {
            TAG_RSP_COMMAND
        };
        if rsp_tag != expected {
            return Err(TpmError::Malformed(format!("unexpected tag {rsp_tag:#06x}")));
        }
        Ok(buf[HEADER_LEN..].to_vec())
    }

    fn oiap(&mut self) -> Result<Session, TpmError> {
        let body = self.transmit(TAG_RQU_COMMAND, ORD_OIAP, &[])?;
        let mut dec = Decoder::new(&body);
        Ok(Session {
            handle: dec.read_u32()?,
            nonce_even: dec.read_digest()?,
        })
    }

    /// Run an OIAP-authorised command and verify the response HMAC.
    ///
    /// `handles` are sent but excluded from the parameter digest unless
    /// repeated in `digest_params`.
    fn transmit_auth1(
        &mut self,
        ordinal: u32,
        handles: &[u8],
        params: &[u8],
        digest_params: &[u8],
        auth: &AuthValue,
    ) -> Result<Vec<u8>, TpmError> {
        let session = self.oiap()?;
        let mut nonce_odd = [0u8; PCR_SIZE];
        OsRng.fill_bytes(&mut nonce_odd);
        let continue_session = 0u8;

        let mut h = Sha1::new();
        h.update(ordinal.to_be_bytes());
        h.update(digest_params);
        let in_digest: PcrValue = h.finalize().into();
        let in_auth = session_hmac(
            auth,
            &in_digest,
            &session.nonce_even,
            &nonce_odd,
            continue_session,
        )?;

        let mut body = Vec::new();
        body.extend_from_slice(handles);
        body.extend_from_slice(params);
        put_u32(&mut body, session.handle);
        body.extend_from_slice(&nonce_odd);
        body.push(continue_session);
        body.extend_from_slice(&in_auth);

        let rsp = self.transmit(TAG_RQU_AUTH1_COMMAND, ordinal, &body)?;
        if rsp.len() < RESPONSE_AUTH_LEN {
            return Err(malformed("authorised response too short"));
        }
        let (out, trailer) = rsp.split_at(rsp.len() - RESPONSE_AUTH_LEN);
        let mut dec = Decoder::new(trailer);
        let nonce_even = dec.read_digest()?;
        let cont = dec.read_bytes(1)?[0];
        let res_auth = dec.read_digest()?;

        let mut h = Sha1::new();
        h.update(0u32.to_be_bytes());
        h.update(ordinal.to_be_bytes());
        h.update(out);
        let out_digest: PcrValue = h.finalize().into();
        let expected = session_hmac(auth, &out_digest, &nonce_even, &nonce_odd, cont)?;
        if expected != res_auth {
            return Err(TpmError::Crypto("response authorisation mismatch".into()));
        }
        Ok(out.to_vec())
    }

    pub(crate) fn read_pubek_with_nonce(&mut self, nonce: Nonce) -> Result<PubEk, TpmError> {
        let body = self.transmit(TAG_RQU_COMMAND, ORD_READ_PUBEK, &nonce)?;
        let mut dec = Decoder::new(&body);
        let pubek = decode_pubkey(&mut dec)?;
        let pubkey_bytes = dec.consumed();
        let checksum = dec.read_digest()?;
        let mut h = Sha1::new();
        h.update(pubkey_bytes);
        h.update(nonce);
        let expected: PcrValue = h.finalize().into();
        if expected != checksum {
            return Err(TpmError::Crypto("EK checksum mismatch".into()));
        }
        Ok(pubek)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: Read + Write + Send> TpmDevice for Tpm12Device<T> {
    fn extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<PcrValue, TpmError> {
        let mut body = Vec::with_capacity(4 + PCR_SIZE);
        put_u32(&mut body, pcr);
        body.extend_from_slice(digest);
        let rsp = self.transmit(TAG_RQU_COMMAND, ORD_EXTEND, &body)?;
        Decoder::new(&rsp).read_digest()
    }

    fn read_pcr(&mut self, pcr: u32) -> Result<PcrValue, TpmError> {
        let rsp = self.transmit(TAG_RQU_COMMAND, ORD_PCR_READ, &pcr.to_be_bytes())?;
        Decoder::new(&rsp).read_digest()
    }

    fn read_pubek(&mut self) -> Result<PubEk, TpmError> {
        let mut nonce = [0u8; PCR_SIZE];
        OsRng.fill_bytes(&mut nonce);
        self.read_pubek_with_nonce(nonce)
    }

    fn owner_read_pubek(&mut self, owner_auth: &AuthValue) -> Result<PubEk, TpmError> {
        let handle = TPM_KH_EK.to_be_bytes();
        let out = self.transmit_auth1(
            ORD_OWNER_READ_INTERNAL_PUB,
            &handle,
            &[],
            &handle,
            owner_auth,
        )?;
        decode_pubkey(&mut Decoder::new(&out))
    }

    fn take_ownership(
        &mut self,
        owner_auth: &AuthValue,
        srk_auth: &AuthValue,
        pubek: &PubEk,
    ) -> Result<(), TpmError> {
        let ek = RsaPublicKey::new(
            BigUint::from_bytes_be(&pubek.modulus),
            BigUint::from(pubek.exponent),
        )
        .map_err(|e| TpmError::Crypto(e.to_string()))?;
        let encrypt = |secret: &AuthValue| {
            ek.encrypt(&mut OsRng, Oaep::new_with_label::<Sha1, _>("TCPA"), secret)
                .map_err(|e| TpmError::Crypto(e.to_string()))
        };
        let enc_owner = encrypt(owner_auth)?;
        let enc_srk = encrypt(srk_auth)?;

        let mut params = Vec::new();
        put_u16(&mut params, TPM_PID_OWNER);
        put_u32(&mut params, enc_owner.len() as u32);
        params.extend_from_slice(&enc_owner);
        put_u32(&mut params, enc_srk.len() as u32);
        params.extend_from_slice(&enc_srk);
        params.extend_from_slice(&srk_template());

        self.transmit_auth1(ORD_TAKE_OWNERSHIP, &[], &params, &params, owner_auth)?;
        Ok(())
    }

    fn owner_clear(&mut self, owner_auth: &AuthValue) -> Result<(), TpmError> {
        self.transmit_auth1(ORD_OWNER_CLEAR, &[], &[], &[], owner_auth)?;
        Ok(())
    }
}
