//! Diffie-Hellman arithmetic over the fixed OTR 1536-bit MODP group.
//!
//! All AKE and SMP exponentiations happen in this group. The generator is
//! `2` and the modulus is the RFC 3526 1536-bit prime. Zero-knowledge
//! blinding values are reduced modulo the prime order `q = (p - 1) / 2`.
//!
//! Secret exponents are wiped in place when a keypair is dropped or when
//! the conversation ends.

use std::fmt;

use num_bigint::{BigUint, ModInverse};
use once_cell::sync::Lazy;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{OtrError, Result};

/// Bytes drawn for an AKE secret exponent (320-bit minimum per protocol).
pub const EXPONENT_BYTES: usize = 40;

/// The group generator `g = 2`.
static GENERATOR: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u8));

/// The 1536-bit MODP modulus `p`.
static MODULUS: Lazy<BigUint> = Lazy::new(|| {
    BigUint::from_bytes_be(&[
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2,
        0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67,
        0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E,
        0x34, 0x04, 0xDD, 0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D,
        0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5,
        0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF,
        0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED, 0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE,
        0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6, 0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D,
        0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05, 0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3,
        0x9A, 0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F, 0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3,
        0xAD, 0x96, 0x1C, 0x62, 0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB, 0x9E, 0xD5, 0x29, 0x07, 0x70,
        0x96, 0x96, 0x6D, 0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04, 0xF1, 0x74, 0x6C, 0x08,
        0xCA, 0x23, 0x73, 0x27, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    ])
});

static MODULUS_MINUS_TWO: Lazy<BigUint> = Lazy::new(|| &*MODULUS - BigUint::from(2u8));

/// Prime order `q = (p - 1) / 2`; D values in zero-knowledge proofs are
/// calculated modulo `q`.
static ORDER: Lazy<BigUint> = Lazy::new(|| (&*MODULUS - BigUint::from(1u8)) / BigUint::from(2u8));

/// Returns the group generator `g`.
pub fn generator() -> &'static BigUint {
    &GENERATOR
}

/// Returns the group modulus `p`.
pub fn modulus() -> &'static BigUint {
    &MODULUS
}

/// Returns the prime order `q = (p - 1) / 2`.
pub fn q() -> &'static BigUint {
    &ORDER
}

/// Returns whether `value` is a usable group element, i.e. `2 <= value <= p - 2`.
pub fn is_group_element(value: &BigUint) -> bool {
    value >= &*GENERATOR && value <= &*MODULUS_MINUS_TWO
}

/// Computes `g^exponent mod p`.
pub fn mod_exp_base(exponent: &BigUint) -> BigUint {
    GENERATOR.modpow(exponent, &MODULUS)
}

/// Computes `base^exponent mod p`.
pub fn mod_exp(base: &BigUint, exponent: &BigUint) -> BigUint {
    base.modpow(exponent, &MODULUS)
}

/// Computes `a * b mod p`.
pub fn mul_mod(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % &*MODULUS
}

/// Computes the inverse of `value` modulo `p`.
pub fn mod_inv(value: &BigUint) -> BigUint {
    // The modulus is prime, so the inverse exists for any nonzero value.
    value
        .mod_inverse(&*MODULUS)
        .and_then(|v| v.to_biguint())
        .unwrap_or_else(|| BigUint::from(0u8))
}

/// Computes `(a - b) mod q` without leaving the unsigned domain.
pub fn sub_mod_q(a: &BigUint, b: &BigUint) -> BigUint {
    let q = &*ORDER;
    ((a % q) + q - (b % q)) % q
}

/// Draws `len` random bytes from the host entropy source and interprets
/// them as a big-endian unsigned integer.
pub(crate) fn random_exponent(rand: &mut dyn RngCore, len: usize) -> Result<BigUint> {
    let mut buf = vec![0u8; len];
    rand.try_fill_bytes(&mut buf)
        .map_err(|_| OtrError::ShortRandomRead)?;
    let value = BigUint::from_bytes_be(&buf);
    buf.zeroize();
    Ok(value)
}

/// A DH keypair: a secret exponent and its public value `g^x mod p`.
///
/// The secret exponent is zeroized on drop and by [`KeyPair::wipe`].
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    secret: BigUint,
    public: BigUint,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret", &"[REDACTED]")
            .field("public_bits", &self.public.bits())
            .finish()
    }
}

impl KeyPair {
    /// Generates a fresh keypair from the host entropy source.
    pub fn generate(rand: &mut dyn RngCore) -> Result<Self> {
        let secret = random_exponent(rand, EXPONENT_BYTES)?;
        Ok(Self::from_secret(secret))
    }

    /// Builds a keypair from an existing secret exponent.
    pub fn from_secret(secret: BigUint) -> Self {
        let public = mod_exp_base(&secret);
        Self { secret, public }
    }

    /// Returns the public value `g^x mod p`.
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Returns the secret exponent.
    pub(crate) fn secret(&self) -> &BigUint {
        &self.secret
    }

    /// Computes the shared secret `their_public^x mod p`.
    pub fn shared_secret(&self, their_public: &BigUint) -> BigUint {
        their_public.modpow(&self.secret, &MODULUS)
    }

    /// Overwrites the secret exponent with zeros.
    pub fn wipe(&mut self) {
        self.secret.zeroize();
        self.public.zeroize();
    }

    /// Returns whether the secret exponent has been wiped.
    pub fn is_wiped(&self) -> bool {
        self.secret == BigUint::from(0u8)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.wipe();
    }
}
