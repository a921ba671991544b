//! Byte-level wire codec for OTR messages.
//!
//! All primitive encodings are big-endian:
//!
//! - `SHORT`: 2 bytes
//! - `WORD`: 4 bytes
//! - `MPI`: 4-byte length, then the minimal big-endian magnitude
//! - `DATA`: 4-byte length, then the bytes
//! - `CTR`: 8 bytes
//!
//! Binary messages are framed as `version (SHORT) | type (BYTE) |
//! [sender_tag (WORD) | receiver_tag (WORD)] | payload`, with instance
//! tags present only under protocol version 3.

use num_bigint::BigUint;

use crate::error::{OtrError, Result};

/// DH-Commit message type.
pub const MSG_TYPE_DH_COMMIT: u8 = 0x02;
/// Data message type.
pub const MSG_TYPE_DATA: u8 = 0x03;
/// DH-Key message type.
pub const MSG_TYPE_DH_KEY: u8 = 0x0a;
/// Reveal-Signature message type.
pub const MSG_TYPE_REVEAL_SIG: u8 = 0x11;
/// Signature message type.
pub const MSG_TYPE_SIG: u8 = 0x12;

/// TLV type codes carried inside data-message payloads.
pub mod tlv_type {
    /// Padding; the value is ignored.
    pub const PADDING: u16 = 0;
    /// The peer has ended the encrypted conversation.
    pub const DISCONNECTED: u16 = 1;
    /// SMP message 1.
    pub const SMP1: u16 = 2;
    /// SMP message 2.
    pub const SMP2: u16 = 3;
    /// SMP message 3.
    pub const SMP3: u16 = 4;
    /// SMP message 4.
    pub const SMP4: u16 = 5;
    /// SMP abort.
    pub const SMP_ABORT: u16 = 6;
    /// SMP message 1 preceded by a user-visible question and a NUL byte.
    pub const SMP1Q: u16 = 7;
}

/// Serializer for the OTR primitive encodings.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single byte.
    pub fn write_byte(&mut self, b: u8) -> &mut Self {
        self.buf.push(b);
        self
    }

    /// Appends a big-endian SHORT.
    pub fn write_short(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Appends a big-endian WORD.
    pub fn write_word(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Appends an 8-byte counter.
    pub fn write_ctr(&mut self, ctr: &[u8; 8]) -> &mut Self {
        self.buf.extend_from_slice(ctr);
        self
    }

    /// Appends raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends a length-prefixed DATA field.
    pub fn write_data(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_word(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends an MPI: length, then the minimal big-endian magnitude.
    /// Zero encodes as a zero-length MPI.
    pub fn write_mpi(&mut self, n: &BigUint) -> &mut Self {
        if *n == BigUint::from(0u8) {
            return self.write_word(0);
        }
        let bytes = n.to_bytes_be();
        self.write_data(&bytes)
    }

    /// Appends a counted MPI sequence: WORD count, then each MPI.
    pub fn write_mpi_sequence(&mut self, mpis: &[&BigUint]) -> &mut Self {
        self.write_word(mpis.len() as u32);
        for mpi in mpis {
            self.write_mpi(mpi);
        }
        self
    }

    /// Consumes the encoder and returns the accumulated bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the accumulated bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// Cursor-style deserializer over a byte slice.
///
/// Every read fails with [`OtrError::CorruptMessage`] when the input is
/// exhausted before the field is complete.
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns whether all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(OtrError::CorruptMessage(what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1, "truncated byte")?[0])
    }

    /// Reads a big-endian SHORT.
    pub fn read_short(&mut self) -> Result<u16> {
        let b = self.take(2, "truncated short")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian WORD.
    pub fn read_word(&mut self) -> Result<u32> {
        let b = self.take(4, "truncated word")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads an 8-byte counter.
    pub fn read_ctr(&mut self) -> Result<[u8; 8]> {
        let b = self.take(8, "truncated counter")?;
        let mut ctr = [0u8; 8];
        ctr.copy_from_slice(b);
        Ok(ctr)
    }

    /// Reads a length-prefixed DATA field.
    pub fn read_data(&mut self) -> Result<Vec<u8>> {
        let len = self.read_word()? as usize;
        Ok(self.take(len, "data length exceeds input")?.to_vec())
    }

    /// Reads an MPI.
    pub fn read_mpi(&mut self) -> Result<BigUint> {
        let len = self.read_word()? as usize;
        let bytes = self.take(len, "MPI length exceeds input")?;
        Ok(BigUint::from_bytes_be(bytes))
    }

    /// Reads a counted MPI sequence.
    pub fn read_mpi_sequence(&mut self) -> Result<Vec<BigUint>> {
        let count = self.read_word()? as usize;
        // The largest legitimate sequence (SMP message 2) holds 11 MPIs.
        if count > 64 {
            return Err(OtrError::CorruptMessage("unreasonable MPI count"));
        }
        let mut mpis = Vec::with_capacity(count);
        for _ in 0..count {
            mpis.push(self.read_mpi()?);
        }
        Ok(mpis)
    }

    /// Consumes and returns all remaining bytes.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}

/// DH-Commit payload: `DATA(encrypted_gx) || DATA(hashed_gx)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhCommit {
    /// `g^x` encrypted under the 128-bit key `r`.
    pub encrypted_gx: Vec<u8>,
    /// SHA-256 over the MPI encoding of `g^x`.
    pub hashed_gx: [u8; 32],
}

impl DhCommit {
    /// Serializes the payload (without message framing).
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_data(&self.encrypted_gx);
        enc.write_data(&self.hashed_gx);
        enc.into_vec()
    }

    /// Parses a DH-Commit payload.
    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(payload);
        let encrypted_gx = dec.read_data()?;
        let hashed = dec.read_data()?;
        if hashed.len() != 32 {
            return Err(OtrError::CorruptMessage("hashed gx is not 32 bytes"));
        }
        let mut hashed_gx = [0u8; 32];
        hashed_gx.copy_from_slice(&hashed);
        Ok(Self {
            encrypted_gx,
            hashed_gx,
        })
    }
}

/// DH-Key payload: a single MPI holding `g^y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhKey {
    /// The sender's public DH value.
    pub gy: BigUint,
}

impl DhKey {
    /// Serializes the payload (without message framing).
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_mpi(&self.gy);
        enc.into_vec()
    }

    /// Parses a DH-Key payload. Trailing bytes after the MPI are a
    /// wire-format violation.
    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(payload);
        let gy = dec.read_mpi()?;
        if !dec.is_empty() {
            return Err(OtrError::CorruptMessage("trailing bytes after DH key"));
        }
        Ok(Self { gy })
    }
}

/// Reveal-Signature payload: `DATA(r) || DATA(ciphertext) || MAC(20)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealSig {
    /// The revealed commitment key.
    pub r: [u8; 16],
    /// The encrypted signature block (ciphertext, without its DATA prefix).
    pub encrypted_sig: Vec<u8>,
    /// Leftmost 160 bits of the HMAC-SHA256 over `DATA(ciphertext)`.
    pub mac: [u8; 20],
}

impl RevealSig {
    /// Serializes the payload (without message framing).
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_data(&self.r);
        enc.write_data(&self.encrypted_sig);
        enc.write_raw(&self.mac);
        enc.into_vec()
    }

    /// Parses a Reveal-Signature payload.
    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(payload);
        let r_bytes = dec.read_data()?;
        if r_bytes.len() != 16 {
            return Err(OtrError::CorruptMessage("revealed key is not 16 bytes"));
        }
        let encrypted_sig = dec.read_data()?;
        let mac_bytes = dec.take_rest();
        if mac_bytes.len() != 20 {
            return Err(OtrError::CorruptMessage("signature MAC is not 20 bytes"));
        }
        let mut r = [0u8; 16];
        r.copy_from_slice(&r_bytes);
        let mut mac = [0u8; 20];
        mac.copy_from_slice(mac_bytes);
        Ok(Self {
            r,
            encrypted_sig,
            mac,
        })
    }
}

/// Signature payload: `DATA(ciphertext) || MAC(20)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sig {
    /// The encrypted signature block (ciphertext, without its DATA prefix).
    pub encrypted_sig: Vec<u8>,
    /// Leftmost 160 bits of the HMAC-SHA256 over `DATA(ciphertext)`.
    pub mac: [u8; 20],
}

impl Sig {
    /// Serializes the payload (without message framing).
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_data(&self.encrypted_sig);
        enc.write_raw(&self.mac);
        enc.into_vec()
    }

    /// Parses a Signature payload.
    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(payload);
        let encrypted_sig = dec.read_data()?;
        let mac_bytes = dec.take_rest();
        if mac_bytes.len() != 20 {
            return Err(OtrError::CorruptMessage("signature MAC is not 20 bytes"));
        }
        let mut mac = [0u8; 20];
        mac.copy_from_slice(mac_bytes);
        Ok(Self { encrypted_sig, mac })
    }
}

/// A Type-Length-Value record carried inside a data-message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// TLV type code; see [`tlv_type`].
    pub typ: u16,
    /// TLV value bytes.
    pub value: Vec<u8>,
}

impl Tlv {
    /// Creates a TLV record.
    pub fn new(typ: u16, value: Vec<u8>) -> Self {
        Self { typ, value }
    }

    /// Serializes this TLV: `type (SHORT) || length (SHORT) || value`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_short(self.typ);
        enc.write_short(self.value.len() as u16);
        enc.write_raw(&self.value);
        enc.into_vec()
    }
}

/// Encodes a decrypted data-message body: `content || 0x00 || TLV*`.
pub fn encode_message_body(content: &[u8], tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 1);
    out.extend_from_slice(content);
    out.push(0x00);
    for tlv in tlvs {
        out.extend_from_slice(&tlv.serialize());
    }
    out
}

/// Splits a decrypted data-message body into the human-readable content
/// and the trailing TLV records.
pub fn decode_message_body(body: &[u8]) -> Result<(Vec<u8>, Vec<Tlv>)> {
    let (content, mut rest) = match body.iter().position(|&b| b == 0x00) {
        Some(nul) => (body[..nul].to_vec(), &body[nul + 1..]),
        None => (body.to_vec(), &[] as &[u8]),
    };

    let mut tlvs = Vec::new();
    while !rest.is_empty() {
        let mut dec = Decoder::new(rest);
        let typ = dec.read_short()?;
        let len = dec.read_short()? as usize;
        if dec.remaining() < len {
            return Err(OtrError::CorruptMessage("TLV length exceeds input"));
        }
        let value = dec.take(len, "TLV length exceeds input")?.to_vec();
        rest = dec.take_rest();
        tlvs.push(Tlv { typ, value });
    }
    Ok((content, tlvs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let n = BigUint::from(0xdeadbeefu32);
        let mut enc = Encoder::new();
        enc.write_byte(0x42)
            .write_short(0x0102)
            .write_word(0x03040506)
            .write_data(b"payload")
            .write_mpi(&n);
        let bytes = enc.into_vec();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_byte().unwrap(), 0x42);
        assert_eq!(dec.read_short().unwrap(), 0x0102);
        assert_eq!(dec.read_word().unwrap(), 0x03040506);
        assert_eq!(dec.read_data().unwrap(), b"payload");
        assert_eq!(dec.read_mpi().unwrap(), n);
        assert!(dec.is_empty());
    }

    #[test]
    fn test_mpi_minimal_encoding() {
        let mut enc = Encoder::new();
        enc.write_mpi(&BigUint::from(0x01u8));
        assert_eq!(enc.into_vec(), vec![0, 0, 0, 1, 1]);

        let mut enc = Encoder::new();
        enc.write_mpi(&BigUint::from(0u8));
        assert_eq!(enc.into_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_data_is_corrupt() {
        // Length field claims more bytes than remain.
        let bytes = [0, 0, 0, 9, 1, 2];
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            dec.read_data(),
            Err(OtrError::CorruptMessage(_))
        ));
    }

    #[test]
    fn test_dh_key_rejects_trailing_bytes() {
        let mut enc = Encoder::new();
        enc.write_mpi(&BigUint::from(5u8));
        enc.write_byte(0xff);
        let err = DhKey::deserialize(&enc.into_vec()).unwrap_err();
        assert!(matches!(err, OtrError::CorruptMessage(_)));
    }

    #[test]
    fn test_dh_commit_roundtrip() {
        let msg = DhCommit {
            encrypted_gx: vec![1, 2, 3, 4],
            hashed_gx: [7u8; 32],
        };
        let parsed = DhCommit::deserialize(&msg.serialize()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_dh_commit_rejects_short_hash() {
        let mut enc = Encoder::new();
        enc.write_data(&[1, 2, 3]);
        enc.write_data(&[0u8; 31]);
        assert!(DhCommit::deserialize(&enc.into_vec()).is_err());
    }

    #[test]
    fn test_reveal_sig_roundtrip() {
        let msg = RevealSig {
            r: [9u8; 16],
            encrypted_sig: vec![5; 40],
            mac: [3u8; 20],
        };
        let parsed = RevealSig::deserialize(&msg.serialize()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_reveal_sig_rejects_bad_mac_length() {
        let mut bytes = RevealSig {
            r: [9u8; 16],
            encrypted_sig: vec![5; 40],
            mac: [3u8; 20],
        }
        .serialize();
        bytes.pop();
        assert!(RevealSig::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_message_body_roundtrip() {
        let tlvs = vec![
            Tlv::new(tlv_type::PADDING, vec![0; 4]),
            Tlv::new(tlv_type::SMP_ABORT, vec![]),
        ];
        let body = encode_message_body(b"hello", &tlvs);
        let (content, parsed) = decode_message_body(&body).unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(parsed, tlvs);
    }

    #[test]
    fn test_message_body_rejects_overlong_tlv() {
        let mut body = encode_message_body(b"", &[Tlv::new(2, vec![1, 2, 3])]);
        // Bump the TLV length past the available bytes.
        let n = body.len();
        body[n - 4] = 0x7f;
        assert!(decode_message_body(&body).is_err());
    }
}
