//! Protocol-version capabilities and plaintext markers.
//!
//! Version-dependent behavior is dispatched through the [`Version`]
//! enum rather than trait objects: header framing, fragment prefixes,
//! whitespace tags and group parameters all hang off it.

use crate::error::{OtrError, Result};
use crate::policy::Policy;
use crate::wire::Encoder;

/// Marker opening every query message.
pub const QUERY_MARKER: &[u8] = b"?OTR";
/// Marker prefixing a plaintext error reply from the peer.
pub const ERROR_MARKER: &[u8] = b"?OTR Error:";
/// Marker prefixing a base64-encoded binary OTR message.
pub const MSG_MARKER: &[u8] = b"?OTR:";

/// Common prefix every whitespace tag starts with.
pub const WHITESPACE_TAG_BASE: [u8; 16] = [
    0x20, 0x09, 0x20, 0x20, 0x09, 0x09, 0x09, 0x09, 0x20, 0x09, 0x20, 0x09, 0x20, 0x09, 0x20, 0x20,
];

/// Instance tags below this value are reserved.
pub const MIN_INSTANCE_TAG: u32 = 0x100;

const V3_HEADER_LEN: usize = 11;
const V2_HEADER_LEN: usize = 3;

/// A committed OTR protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// OTR protocol version 2: no instance tags.
    V2,
    /// OTR protocol version 3: instance-tagged headers and fragments.
    V3,
}

/// A parsed binary-message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The message type byte.
    pub msg_type: u8,
    /// Sender instance tag (0 under v2).
    pub sender_tag: u32,
    /// Receiver instance tag (0 under v2).
    pub receiver_tag: u32,
    /// Offset at which the payload starts.
    pub payload_offset: usize,
}

impl Version {
    /// The version number carried in message headers.
    pub fn protocol_version(self) -> u16 {
        match self {
            Version::V2 => 2,
            Version::V3 => 3,
        }
    }

    /// Maps a wire version number to a [`Version`].
    pub fn from_protocol_version(v: u16) -> Option<Self> {
        match v {
            2 => Some(Version::V2),
            3 => Some(Version::V3),
            _ => None,
        }
    }

    /// Bytes drawn for zero-knowledge blinding exponents.
    pub fn parameter_length(self) -> usize {
        192
    }

    /// Smallest transport limit the fragmentation engine supports.
    pub fn min_fragment_size(self) -> usize {
        match self {
            Version::V2 => 18,
            Version::V3 => 26,
        }
    }

    /// The 8-byte whitespace-tag suffix advertising this version.
    pub fn whitespace_tag(self) -> &'static [u8; 8] {
        match self {
            Version::V2 => &[0x20, 0x20, 0x09, 0x09, 0x20, 0x20, 0x09, 0x20],
            Version::V3 => &[0x20, 0x20, 0x09, 0x09, 0x20, 0x20, 0x09, 0x09],
        }
    }

    /// Returns whether `data` starts with a fragmentation prefix this
    /// version recognizes. The v3 prefix is only recognized under v3.
    pub fn is_fragmented(self, data: &[u8]) -> bool {
        match self {
            Version::V2 => data.starts_with(b"?OTR,"),
            Version::V3 => data.starts_with(b"?OTR|") || data.starts_with(b"?OTR,"),
        }
    }

    /// Builds the prefix for fragment `index` (1-based) of `total`.
    pub fn fragment_prefix(self, index: usize, total: usize, sender_tag: u32, receiver_tag: u32) -> Vec<u8> {
        match self {
            Version::V2 => format!("?OTR,{:05},{:05},", index, total).into_bytes(),
            Version::V3 => format!(
                "?OTR|{:08x}|{:08x},{:05},{:05},",
                sender_tag, receiver_tag, index, total
            )
            .into_bytes(),
        }
    }

    /// Builds a binary-message header for `msg_type`.
    pub fn message_header(self, msg_type: u8, sender_tag: u32, receiver_tag: u32) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_short(self.protocol_version());
        enc.write_byte(msg_type);
        if self == Version::V3 {
            enc.write_word(sender_tag);
            enc.write_word(receiver_tag);
        }
        enc.into_vec()
    }

    /// Parses a binary-message header, checking the version field.
    pub fn parse_message_header(self, msg: &[u8]) -> Result<MessageHeader> {
        let header_len = match self {
            Version::V2 => V2_HEADER_LEN,
            Version::V3 => V3_HEADER_LEN,
        };
        if msg.len() < header_len {
            return Err(OtrError::CorruptMessage("message shorter than header"));
        }
        let version = u16::from_be_bytes([msg[0], msg[1]]);
        if version != self.protocol_version() {
            return Err(OtrError::CorruptMessage("header version mismatch"));
        }
        let msg_type = msg[2];
        let (sender_tag, receiver_tag) = if self == Version::V3 {
            (
                u32::from_be_bytes([msg[3], msg[4], msg[5], msg[6]]),
                u32::from_be_bytes([msg[7], msg[8], msg[9], msg[10]]),
            )
        } else {
            (0, 0)
        };
        Ok(MessageHeader {
            msg_type,
            sender_tag,
            receiver_tag,
            payload_offset: header_len,
        })
    }
}

/// Parses the versions advertised by a query message.
///
/// `?OTR?` advertises version 1; `?OTRv<digits>?` advertises each decimal
/// digit as a version. Returns the versions in advertisement order.
pub fn parse_query(msg: &[u8]) -> Vec<u8> {
    let mut versions = Vec::new();
    if !msg.starts_with(QUERY_MARKER) || msg.len() <= QUERY_MARKER.len() {
        return versions;
    }
    let mut rest = &msg[QUERY_MARKER.len()..];

    if rest[0] == b'?' {
        versions.push(1);
        rest = &rest[1..];
    }

    if !rest.is_empty() && rest[0] == b'v' {
        for &c in &rest[1..] {
            if c.is_ascii_digit() {
                versions.push(c - b'0');
            }
        }
    }

    versions
}

/// Picks the highest mutually supported version from an advertisement.
pub fn select_version(advertised: &[u8], policies: Policy) -> Result<Version> {
    let mut best: Option<Version> = None;
    for &v in advertised {
        match v {
            3 if policies.has(Policy::ALLOW_V3) => best = Some(Version::V3),
            2 if policies.has(Policy::ALLOW_V2) && best.is_none() => best = Some(Version::V2),
            _ => {}
        }
    }
    best.ok_or(OtrError::InvalidVersion)
}

/// Builds the outgoing query message for the allowed versions.
pub fn query_message(policies: Policy) -> String {
    let mut out = String::from("?OTRv");
    if policies.has(Policy::ALLOW_V2) {
        out.push('2');
    }
    if policies.has(Policy::ALLOW_V3) {
        out.push('3');
    }
    out.push('?');
    out
}

/// Builds the whitespace tag advertising the allowed versions.
pub fn build_whitespace_tag(policies: Policy) -> Vec<u8> {
    let mut tag = WHITESPACE_TAG_BASE.to_vec();
    if policies.has(Policy::ALLOW_V2) {
        tag.extend_from_slice(Version::V2.whitespace_tag());
    }
    if policies.has(Policy::ALLOW_V3) {
        tag.extend_from_slice(Version::V3.whitespace_tag());
    }
    tag
}

/// Locates a whitespace tag in a plaintext message. Returns the advertised
/// versions and the message with the tag removed.
pub fn find_whitespace_tag(msg: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let start = msg
        .windows(WHITESPACE_TAG_BASE.len())
        .position(|w| w == WHITESPACE_TAG_BASE)?;

    let mut versions = Vec::new();
    let mut end = start + WHITESPACE_TAG_BASE.len();
    while msg.len() >= end + 8 {
        let chunk: &[u8; 8] = msg[end..end + 8].try_into().expect("8-byte window");
        if chunk == Version::V2.whitespace_tag() {
            versions.push(2);
        } else if chunk == Version::V3.whitespace_tag() {
            versions.push(3);
        } else {
            break;
        }
        end += 8;
    }

    let mut cleaned = msg[..start].to_vec();
    cleaned.extend_from_slice(&msg[end..]);
    Some((versions, cleaned))
}
