//! DSA signing material and its OTR wire form.
//!
//! OTR authenticates the handshake with DSA-1024/160 over a truncated
//! HMAC digest. The public key travels inside the encrypted signature
//! block as `SHORT(0x0000) || MPI(p) || MPI(q) || MPI(g) || MPI(y)`;
//! signatures are the fixed 40-byte `r || s` form.

use std::fmt;

use dsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use dsa::{Components, KeySize, SigningKey, VerifyingKey};
use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use crate::error::{OtrError, Result};
use crate::wire::{Decoder, Encoder};

/// Byte length of each DSA signature component (the subgroup order `q`).
pub const SIGNATURE_PARAMETER_BYTES: usize = 20;

/// Byte length of a serialized DSA signature.
pub const SIGNATURE_BYTES: usize = 2 * SIGNATURE_PARAMETER_BYTES;

/// The OTR public-key type tag for DSA.
const KEY_TYPE_DSA: u16 = 0x0000;

/// A long-term DSA signing keypair supplied by the host.
#[derive(Clone)]
pub struct PrivateKey {
    signing: SigningKey,
    public: PublicKey,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

impl PrivateKey {
    /// Generates a fresh DSA-1024/160 keypair.
    ///
    /// Key generation is a host-setup concern; it draws from the process
    /// RNG rather than the conversation's entropy source.
    #[allow(deprecated)]
    pub fn generate() -> Self {
        let mut rng = dsa::signature::rand_core::OsRng;
        let components = Components::generate(&mut rng, KeySize::DSA_1024_160);
        let signing = SigningKey::generate(&mut rng, components);
        let public = PublicKey {
            verifying: signing.verifying_key().clone(),
        };
        Self { signing, public }
    }

    /// Returns the public half of this keypair.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Signs `digest` (the leading [`SIGNATURE_PARAMETER_BYTES`] bytes are
    /// the prehash) and returns the 40-byte `r || s` signature.
    pub fn sign(&self, digest: &[u8]) -> Result<[u8; SIGNATURE_BYTES]> {
        let prehash = &digest[..SIGNATURE_PARAMETER_BYTES.min(digest.len())];
        let signature = self
            .signing
            .sign_prehash(prehash)
            .map_err(|_| OtrError::BadSignature)?;
        let mut out = [0u8; SIGNATURE_BYTES];
        write_component(&mut out[..SIGNATURE_PARAMETER_BYTES], signature.r());
        write_component(&mut out[SIGNATURE_PARAMETER_BYTES..], signature.s());
        Ok(out)
    }
}

/// A peer's DSA public key, learned during the AKE.
#[derive(Clone)]
pub struct PublicKey {
    verifying: VerifyingKey,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &hex_short(&self.fingerprint()))
            .finish()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.serialize() == other.serialize()
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    /// Serializes this key in its OTR wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let components = self.verifying.components();
        let mut enc = Encoder::new();
        enc.write_short(KEY_TYPE_DSA);
        enc.write_mpi(components.p());
        enc.write_mpi(components.q());
        enc.write_mpi(components.g());
        enc.write_mpi(self.verifying.y());
        enc.into_vec()
    }

    /// Parses a public key from the decoder, leaving any following bytes
    /// unread.
    pub fn parse(dec: &mut Decoder<'_>) -> Result<Self> {
        let key_type = dec.read_short()?;
        if key_type != KEY_TYPE_DSA {
            return Err(OtrError::CorruptMessage("unsupported public key type"));
        }
        let p = dec.read_mpi()?;
        let q = dec.read_mpi()?;
        let g = dec.read_mpi()?;
        let y = dec.read_mpi()?;
        Self::from_components(p, q, g, y)
    }

    /// Rebuilds a public key from its raw components.
    pub fn from_components(p: BigUint, q: BigUint, g: BigUint, y: BigUint) -> Result<Self> {
        if q.bits() != SIGNATURE_PARAMETER_BYTES * 8 {
            return Err(OtrError::CorruptMessage("DSA subgroup order is not 160 bits"));
        }
        let components = Components::from_components(p, q, g)
            .map_err(|_| OtrError::CorruptMessage("invalid DSA parameters"))?;
        let verifying = VerifyingKey::from_components(components, y)
            .map_err(|_| OtrError::CorruptMessage("invalid DSA public key"))?;
        Ok(Self { verifying })
    }

    /// Verifies a 40-byte `r || s` signature over `digest` (prehash form).
    pub fn verify(&self, digest: &[u8], signature: &[u8; SIGNATURE_BYTES]) -> Result<()> {
        let r = BigUint::from_bytes_be(&signature[..SIGNATURE_PARAMETER_BYTES]);
        let s = BigUint::from_bytes_be(&signature[SIGNATURE_PARAMETER_BYTES..]);
        let signature =
            dsa::Signature::from_components(r, s).map_err(|_| OtrError::BadSignature)?;
        let prehash = &digest[..SIGNATURE_PARAMETER_BYTES.min(digest.len())];
        self.verifying
            .verify_prehash(prehash, &signature)
            .map_err(|_| OtrError::BadSignature)
    }

    /// Returns the 20-byte key fingerprint: SHA-1 over the wire form with
    /// the two leading type bytes omitted.
    pub fn fingerprint(&self) -> [u8; 20] {
        let serialized = self.serialize();
        let digest = Sha1::digest(&serialized[2..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }
}

/// Writes a signature component left-padded into a fixed-width slot.
fn write_component(out: &mut [u8], value: &BigUint) {
    let bytes = value.to_bytes_be();
    let offset = out.len().saturating_sub(bytes.len());
    let start = bytes.len().saturating_sub(out.len());
    out[offset..].copy_from_slice(&bytes[start..]);
}

fn hex_short(bytes: &[u8]) -> String {
    bytes[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    // DSA parameter generation is expensive; share one key across tests.
    static KEY: Lazy<PrivateKey> = Lazy::new(PrivateKey::generate);

    #[test]
    fn test_sign_verify_roundtrip() {
        let digest = [0x5au8; 32];
        let sig = KEY.sign(&digest).unwrap();
        KEY.public_key().verify(&digest, &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_digest() {
        let sig = KEY.sign(&[0x5au8; 32]).unwrap();
        let err = KEY.public_key().verify(&[0xa5u8; 32], &sig).unwrap_err();
        assert_eq!(err, OtrError::BadSignature);
    }

    #[test]
    fn test_public_key_wire_roundtrip() {
        let serialized = KEY.public_key().serialize();
        let mut dec = Decoder::new(&serialized);
        let parsed = PublicKey::parse(&mut dec).unwrap();
        assert!(dec.is_empty());
        assert_eq!(&parsed, KEY.public_key());
        assert_eq!(parsed.fingerprint(), KEY.public_key().fingerprint());
    }

    #[test]
    fn test_parse_rejects_unknown_key_type() {
        let mut serialized = KEY.public_key().serialize();
        serialized[1] = 0x01;
        let mut dec = Decoder::new(&serialized);
        assert!(PublicKey::parse(&mut dec).is_err());
    }
}
