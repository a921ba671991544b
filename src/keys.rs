//! Key derivation from the AKE shared secret.
//!
//! Given the shared secret `s`, let `secbytes` be its MPI encoding and
//! `h2(b) = SHA256(b || secbytes)`. Then:
//!
//! - `ssid = h2(0x00)[0..8]`
//! - `c || c' = h2(0x01)` (16 bytes each)
//! - `m1 = h2(0x02)`, `m2 = h2(0x03)`, `m1' = h2(0x04)`, `m2' = h2(0x05)`
//!
//! `{c, m1, m2}` protects the Reveal-Signature message and
//! `{c', m1', m2'}` the Signature message. The data-message key schedule
//! uses `h1(b) = SHA1(b || secbytes)` with the high/low role decided by
//! comparing public values.

use std::fmt;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wire::Encoder;

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// One AKE key bundle: an AES-128 key and two HMAC-SHA256 keys.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AkeKeys {
    /// AES-128 key encrypting the signature block.
    pub c: [u8; 16],
    /// HMAC key authenticating the signed bytestring `mb`.
    pub m1: [u8; 32],
    /// HMAC key authenticating the encrypted signature block.
    pub m2: [u8; 32],
}

impl fmt::Debug for AkeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AkeKeys").field("c", &"[REDACTED]").finish()
    }
}

impl AkeKeys {
    /// An all-zero bundle, the state before derivation and after wiping.
    pub fn empty() -> Self {
        Self {
            c: [0u8; 16],
            m1: [0u8; 32],
            m2: [0u8; 32],
        }
    }

    /// Returns whether this bundle holds no key material.
    pub fn is_empty(&self) -> bool {
        self.c == [0u8; 16] && self.m1 == [0u8; 32] && self.m2 == [0u8; 32]
    }

    /// Overwrites the bundle with zeros.
    pub fn wipe(&mut self) {
        self.zeroize();
    }
}

/// Derives `(ssid, reveal_key, sig_key)` from the DH shared secret.
pub fn calculate_ake_keys(s: &BigUint) -> ([u8; 8], AkeKeys, AkeKeys) {
    let secbytes = mpi_bytes(s);

    let h0 = h2(0x00, &secbytes);
    let mut ssid = [0u8; 8];
    ssid.copy_from_slice(&h0[..8]);

    let h1 = h2(0x01, &secbytes);
    let mut c = [0u8; 16];
    let mut cp = [0u8; 16];
    c.copy_from_slice(&h1[..16]);
    cp.copy_from_slice(&h1[16..]);

    let reveal = AkeKeys {
        c,
        m1: h2(0x02, &secbytes),
        m2: h2(0x03, &secbytes),
    };
    let sig = AkeKeys {
        c: cp,
        m1: h2(0x04, &secbytes),
        m2: h2(0x05, &secbytes),
    };
    (ssid, reveal, sig)
}

/// Keys protecting data messages in both directions.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKeys {
    /// AES-128 key for outbound data messages.
    pub send_aes: [u8; 16],
    /// SHA1-HMAC key for outbound data messages.
    pub send_mac: [u8; 20],
    /// AES-128 key for inbound data messages.
    pub recv_aes: [u8; 16],
    /// SHA1-HMAC key for inbound data messages.
    pub recv_mac: [u8; 20],
}

impl fmt::Debug for DataKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKeys").finish_non_exhaustive()
    }
}

/// Derives the data-message keys from the shared secret. The peer whose
/// public value is numerically greater takes the "high" sending role.
pub fn calculate_data_keys(our_public: &BigUint, their_public: &BigUint, s: &BigUint) -> DataKeys {
    let secbytes = mpi_bytes(s);
    let (send_byte, recv_byte) = if our_public > their_public {
        (0x01u8, 0x02u8)
    } else {
        (0x02u8, 0x01u8)
    };

    let mut send_aes = [0u8; 16];
    send_aes.copy_from_slice(&h1(send_byte, &secbytes)[..16]);
    let mut recv_aes = [0u8; 16];
    recv_aes.copy_from_slice(&h1(recv_byte, &secbytes)[..16]);

    DataKeys {
        send_aes,
        send_mac: sha1_digest(&send_aes),
        recv_aes,
        recv_mac: sha1_digest(&recv_aes),
    }
}

fn mpi_bytes(n: &BigUint) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_mpi(n);
    enc.into_vec()
}

fn h2(b: u8, secbytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([b]);
    hasher.update(secbytes);
    hasher.finalize().into()
}

fn h1(b: u8, secbytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update([b]);
    hasher.update(secbytes);
    hasher.finalize().into()
}

/// SHA-1 digest helper.
pub(crate) fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// SHA-256 digest helper.
pub(crate) fn sha256_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Full HMAC-SHA256 over `data`.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Leftmost 160 bits of the HMAC-SHA256 over `data`.
pub(crate) fn hmac_sha256_160(key: &[u8], data: &[u8]) -> [u8; 20] {
    let full = hmac_sha256(key, data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&full[..20]);
    out
}

/// SHA1-HMAC over `data`, used by the data-message layer.
pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC key");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// AES-128-CTR with a zero counter; the key is single-use.
pub(crate) fn aes_ctr_zero(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    aes_ctr(key, &[0u8; 8], data)
}

/// AES-128-CTR with the 8-byte counter in the high half of the block.
pub(crate) fn aes_ctr(key: &[u8; 16], top_half: &[u8; 8], data: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(top_half);
    let mut out = data.to_vec();
    let mut cipher = Aes128Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut out);
    out
}
