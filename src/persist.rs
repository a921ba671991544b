//! Serialization of conversation and AKE state.
//!
//! State serializes to a stream of length-prefixed fields. Big-integer
//! fields are optional: a leading byte of `0` encodes absence, a leading
//! byte of `1` a present non-negative value followed by its DATA-encoded
//! magnitude. Consumers must ignore absent optional fields.
//!
//! Field order for the AKE context: secret exponent, our public value,
//! their public value, `r`, `encrypted_gx`, `hashed_gx`, the reveal key
//! bundle, the signature key bundle. The conversation prepends its
//! protocol version.

use num_bigint::BigUint;

use crate::ake::AuthState;
use crate::conversation::Conversation;
use crate::dh;
use crate::error::{OtrError, Result};
use crate::keys::AkeKeys;
use crate::version::Version;
use crate::wire::{Decoder, Encoder};

fn write_optional_bigint(enc: &mut Encoder, value: Option<&BigUint>) {
    match value {
        None => {
            enc.write_byte(0);
        }
        Some(n) => {
            enc.write_byte(1);
            enc.write_data(&n.to_bytes_be());
        }
    }
}

fn read_optional_bigint(dec: &mut Decoder<'_>) -> Result<Option<BigUint>> {
    match dec.read_byte()? {
        0 => Ok(None),
        1 => Ok(Some(BigUint::from_bytes_be(&dec.read_data()?))),
        _ => Err(OtrError::CorruptMessage("invalid optional field marker")),
    }
}

fn write_ake_keys(enc: &mut Encoder, keys: &AkeKeys) {
    enc.write_raw(&keys.c);
    enc.write_raw(&keys.m1);
    enc.write_raw(&keys.m2);
}

fn read_ake_keys(dec: &mut Decoder<'_>) -> Result<AkeKeys> {
    let mut keys = AkeKeys::empty();
    let take = |dec: &mut Decoder<'_>, out: &mut [u8]| -> Result<()> {
        for b in out.iter_mut() {
            *b = dec.read_byte()?;
        }
        Ok(())
    };
    take(dec, &mut keys.c)?;
    take(dec, &mut keys.m1)?;
    take(dec, &mut keys.m2)?;
    Ok(keys)
}

impl Conversation {
    /// Serializes the conversation's handshake state.
    pub fn serialize_state(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_short(self.version.protocol_version());

        let keypair = self.ake.keypair.as_ref();
        write_optional_bigint(&mut enc, keypair.map(|kp| kp.secret()));
        write_optional_bigint(&mut enc, keypair.map(|kp| kp.public()));
        write_optional_bigint(&mut enc, self.ake.their_public.as_ref());
        enc.write_raw(&self.ake.r);
        enc.write_data(&self.ake.encrypted_gx);
        enc.write_raw(&self.ake.hashed_gx);
        write_ake_keys(&mut enc, &self.ake.reveal_key);
        write_ake_keys(&mut enc, &self.ake.sig_key);
        enc.into_vec()
    }

    /// Restores handshake state produced by
    /// [`Conversation::serialize_state`].
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(bytes);
        let version = Version::from_protocol_version(dec.read_short()?)
            .ok_or(OtrError::CorruptMessage("unknown protocol version"))?;

        let secret = read_optional_bigint(&mut dec)?;
        let _public = read_optional_bigint(&mut dec)?;
        let their_public = read_optional_bigint(&mut dec)?;

        let mut r = [0u8; 16];
        for b in r.iter_mut() {
            *b = dec.read_byte()?;
        }
        let encrypted_gx = dec.read_data()?;
        let mut hashed_gx = [0u8; 32];
        for b in hashed_gx.iter_mut() {
            *b = dec.read_byte()?;
        }
        let reveal_key = read_ake_keys(&mut dec)?;
        let sig_key = read_ake_keys(&mut dec)?;
        if !dec.is_empty() {
            return Err(OtrError::CorruptMessage("trailing bytes in state"));
        }

        self.version = version;
        self.ake.wipe();
        // The public value is recomputed from the exponent; the stored
        // copy exists for consumers that only hold the public half.
        self.ake.keypair = secret.map(dh::KeyPair::from_secret);
        self.ake.their_public = their_public;
        self.ake.r = r;
        self.ake.encrypted_gx = encrypted_gx;
        self.ake.hashed_gx = hashed_gx;
        self.ake.reveal_key = reveal_key;
        self.ake.sig_key = sig_key;
        self.ake.state = AuthState::None;
        Ok(())
    }
}
