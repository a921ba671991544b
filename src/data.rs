//! Encrypted data messages carrying content and TLV records.
//!
//! The AKE hands its negotiated material to a [`KeyManagementContext`];
//! data messages are then AES-128-CTR encrypted with a per-direction key
//! and authenticated with a 20-byte SHA1-HMAC over everything from the
//! version field through the ciphertext. The top half of the CTR block is
//! a strictly increasing 8-byte counter.

use num_bigint::BigUint;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroize;

use crate::conversation::Conversation;
use crate::dh;
use crate::error::{OtrError, Result};
use crate::keys::{aes_ctr, calculate_data_keys, hmac_sha1, DataKeys};
use crate::version::MessageHeader;
use crate::wire::{decode_message_body, encode_message_body, Decoder, Encoder, Tlv, MSG_TYPE_DATA};

/// Data-message flag: the receiver should not surface a decryption
/// failure for this message.
pub const FLAG_IGNORE_UNREADABLE: u8 = 0x01;

/// Key material and counters negotiated by a completed AKE.
pub(crate) struct KeyManagementContext {
    pub(crate) our_key_id: u32,
    pub(crate) their_key_id: u32,
    pub(crate) our_dh: dh::KeyPair,
    pub(crate) their_public: BigUint,
    keys: DataKeys,
    send_counter: u64,
    recv_counter: u64,
}

impl KeyManagementContext {
    /// Builds the context from the AKE handoff, deriving the directional
    /// data keys from the shared secret.
    pub(crate) fn new(
        our_key_id: u32,
        their_key_id: u32,
        our_dh: dh::KeyPair,
        their_public: BigUint,
    ) -> Self {
        let mut s = our_dh.shared_secret(&their_public);
        let keys = calculate_data_keys(our_dh.public(), &their_public, &s);
        s.zeroize();
        Self {
            our_key_id,
            their_key_id,
            our_dh,
            their_public,
            keys,
            send_counter: 0,
            recv_counter: 0,
        }
    }

    /// Zeroizes all key material.
    pub(crate) fn wipe(&mut self) {
        self.our_dh.wipe();
        self.their_public.zeroize();
        self.keys.zeroize();
        self.send_counter = 0;
        self.recv_counter = 0;
    }
}

impl Conversation {
    /// Builds a framed data message around `content` and `tlvs`.
    pub(crate) fn gen_data_message(
        &mut self,
        content: &[u8],
        tlvs: &[Tlv],
        flags: u8,
    ) -> Result<Vec<u8>> {
        let keys = self.keys.as_mut().ok_or(OtrError::NotEncrypted)?;

        keys.send_counter += 1;
        let ctr = keys.send_counter.to_be_bytes();
        let body = encode_message_body(content, tlvs);
        let ciphertext = aes_ctr(&keys.keys.send_aes, &ctr, &body);

        let mut msg = self.version.message_header(
            MSG_TYPE_DATA,
            self.our_instance_tag,
            self.their_instance_tag,
        );
        let mut enc = Encoder::new();
        enc.write_byte(flags);
        enc.write_word(keys.our_key_id);
        enc.write_word(keys.their_key_id);
        enc.write_mpi(keys.our_dh.public());
        enc.write_ctr(&ctr);
        enc.write_data(&ciphertext);
        msg.extend_from_slice(&enc.into_vec());

        let mac = hmac_sha1(&keys.keys.send_mac, &msg);
        msg.extend_from_slice(&mac);
        // Revealed old MAC keys; none under the fixed key schedule.
        msg.extend_from_slice(&0u32.to_be_bytes());
        Ok(msg)
    }

    /// Verifies and decrypts an inbound data message. `message` is the
    /// full framed message; `header` its parsed framing.
    pub(crate) fn process_data_message(
        &mut self,
        message: &[u8],
        header: &MessageHeader,
    ) -> Result<(Vec<u8>, Vec<Tlv>)> {
        let keys = self.keys.as_mut().ok_or(OtrError::NotEncrypted)?;

        let payload = &message[header.payload_offset..];
        let mut dec = Decoder::new(payload);
        let _flags = dec.read_byte()?;
        let sender_key_id = dec.read_word()?;
        let recipient_key_id = dec.read_word()?;
        let _next_dh = dec.read_mpi()?;
        let ctr = dec.read_ctr()?;
        let ciphertext = dec.read_data()?;

        if sender_key_id != keys.their_key_id || recipient_key_id != keys.our_key_id {
            warn!(sender_key_id, recipient_key_id, "data message with unknown key ids");
            return Err(OtrError::CorruptMessage("unexpected key ids"));
        }

        let counter = u64::from_be_bytes(ctr);
        if counter <= keys.recv_counter {
            warn!(counter, "data message counter did not increase");
            return Err(OtrError::CorruptMessage("counter reuse"));
        }

        // The MAC covers the framing through the encrypted DATA field.
        let mac_offset = header.payload_offset + (payload.len() - dec.remaining());
        let rest = dec.take_rest();
        if rest.len() < 20 {
            return Err(OtrError::CorruptMessage("data message MAC is not 20 bytes"));
        }
        let (their_mac, old_macs) = rest.split_at(20);
        let mut old_dec = Decoder::new(old_macs);
        let _revealed_mac_keys = old_dec.read_data()?;
        if !old_dec.is_empty() {
            return Err(OtrError::CorruptMessage("trailing bytes after data message"));
        }

        let my_mac = hmac_sha1(&keys.keys.recv_mac, &message[..mac_offset]);
        if !bool::from(my_mac[..].ct_eq(their_mac)) {
            return Err(OtrError::CorruptMessage("data message MAC failure"));
        }

        keys.recv_counter = counter;
        let body = aes_ctr(&keys.keys.recv_aes, &ctr, &ciphertext);
        decode_message_body(&body)
    }
}
