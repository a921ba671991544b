//! Splitting outbound messages and reassembling inbound fragments.
//!
//! Fragments are ASCII-framed: `?OTR,<idx>,<total>,<payload>,` under v2
//! and `?OTR|<sender>|<receiver>,<idx>,<total>,<payload>,` under v3, with
//! 5-digit zero-padded decimal counters and 8-digit lowercase-hex
//! instance tags. Reassembly runs over a single [`FragmentationContext`]
//! per conversation; any out-of-sequence fragment resets it.

use tracing::warn;

use crate::error::{OtrError, Result};
use crate::events::OtrEvent;
use crate::version::{Version, MIN_INSTANCE_TAG};

/// Reassembly state for inbound fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationContext {
    buffer: Vec<u8>,
    current_index: u16,
    current_len: u16,
}

struct ParsedFragment<'a> {
    sender_tag: u32,
    receiver_tag: u32,
    index: u16,
    total: u16,
    payload: &'a [u8],
}

impl FragmentationContext {
    /// Creates an empty reassembly context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulated payload bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the index of the last accepted fragment.
    pub fn current_index(&self) -> u16 {
        self.current_index
    }

    /// Returns the expected total fragment count.
    pub fn current_len(&self) -> u16 {
        self.current_len
    }

    /// Discards any partially reassembled message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.current_index = 0;
        self.current_len = 0;
    }

    /// Returns whether a full message has been reassembled.
    pub fn is_complete(&self) -> bool {
        self.current_len > 0 && self.current_index == self.current_len
    }

    /// Takes the reassembled message, resetting the context.
    pub fn take_message(&mut self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let msg = std::mem::take(&mut self.buffer);
        self.reset();
        Some(msg)
    }

    /// Feeds one inbound fragment into the context.
    ///
    /// Returns an event when the fragment is filtered by the v3
    /// instance-tag rules, in which case the context is left unchanged.
    /// A fragment that does not parse fails with
    /// [`OtrError::InvalidFragment`], also leaving the context unchanged.
    pub fn consume(
        &mut self,
        version: Version,
        our_tag: u32,
        their_tag: u32,
        data: &[u8],
    ) -> Result<Option<OtrEvent>> {
        let parsed = parse_fragment(data)?;

        if version == Version::V3 && data.starts_with(b"?OTR|") {
            if parsed.receiver_tag != our_tag
                || (their_tag != 0 && parsed.sender_tag != their_tag)
            {
                warn!(
                    receiver_tag = parsed.receiver_tag,
                    sender_tag = parsed.sender_tag,
                    "dropping fragment addressed to another instance"
                );
                return Ok(Some(OtrEvent::ReceivedMessageForOtherInstance));
            }
            if parsed.sender_tag < MIN_INSTANCE_TAG {
                warn!(sender_tag = parsed.sender_tag, "reserved sender instance tag");
                return Ok(Some(OtrEvent::MessageMalformed));
            }
        }

        if parsed.index == 0 || parsed.total == 0 || parsed.index > parsed.total {
            self.reset();
            return Ok(None);
        }

        if parsed.index == 1 {
            self.buffer = parsed.payload.to_vec();
            self.current_index = 1;
            self.current_len = parsed.total;
        } else if parsed.index == self.current_index + 1 && parsed.total == self.current_len {
            self.buffer.extend_from_slice(parsed.payload);
            self.current_index = parsed.index;
        } else {
            self.reset();
        }

        Ok(None)
    }
}

/// Splits `data` for a transport limited to `fragment_size` payload bytes
/// per fragment. A message that already fits is returned verbatim as the
/// single element; `fragment_size == 0` disables fragmentation.
pub fn fragment(
    data: &[u8],
    fragment_size: usize,
    version: Version,
    sender_tag: u32,
    receiver_tag: u32,
) -> Vec<Vec<u8>> {
    if fragment_size == 0 || data.len() <= fragment_size {
        return vec![data.to_vec()];
    }

    let total = data.len().div_ceil(fragment_size);
    let mut out = Vec::with_capacity(total);
    for (i, chunk) in data.chunks(fragment_size).enumerate() {
        let mut msg = version.fragment_prefix(i + 1, total, sender_tag, receiver_tag);
        msg.extend_from_slice(chunk);
        msg.push(b',');
        out.push(msg);
    }
    out
}

fn parse_fragment(data: &[u8]) -> Result<ParsedFragment<'_>> {
    let (rest, has_tags) = if let Some(rest) = data.strip_prefix(b"?OTR|") {
        (rest, true)
    } else if let Some(rest) = data.strip_prefix(b"?OTR,") {
        (rest, false)
    } else {
        return Err(OtrError::InvalidFragment);
    };

    let fields: Vec<&[u8]> = rest.split(|&b| b == b',').collect();
    let expected = if has_tags { 5 } else { 4 };
    if fields.len() != expected || !fields[expected - 1].is_empty() {
        return Err(OtrError::InvalidFragment);
    }

    let (sender_tag, receiver_tag) = if has_tags {
        let tags: Vec<&[u8]> = fields[0].split(|&b| b == b'|').collect();
        if tags.len() != 2 {
            return Err(OtrError::InvalidFragment);
        }
        (parse_hex_tag(tags[0])?, parse_hex_tag(tags[1])?)
    } else {
        (0, 0)
    };

    let counter_base = if has_tags { 1 } else { 0 };
    let index = parse_decimal(fields[counter_base])?;
    let total = parse_decimal(fields[counter_base + 1])?;
    let payload = fields[counter_base + 2];

    Ok(ParsedFragment {
        sender_tag,
        receiver_tag,
        index,
        total,
        payload,
    })
}

fn parse_decimal(field: &[u8]) -> Result<u16> {
    if field.is_empty() {
        return Err(OtrError::InvalidFragment);
    }
    let s = std::str::from_utf8(field).map_err(|_| OtrError::InvalidFragment)?;
    s.parse::<u16>().map_err(|_| OtrError::InvalidFragment)
}

fn parse_hex_tag(field: &[u8]) -> Result<u32> {
    if field.is_empty() || field.len() > 8 {
        return Err(OtrError::InvalidFragment);
    }
    let s = std::str::from_utf8(field).map_err(|_| OtrError::InvalidFragment)?;
    u32::from_str_radix(s, 16).map_err(|_| OtrError::InvalidFragment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(buffer: &[u8], index: u16, len: u16) -> FragmentationContext {
        FragmentationContext {
            buffer: buffer.to_vec(),
            current_index: index,
            current_len: len,
        }
    }

    #[test]
    fn test_fragment_returns_small_message_verbatim() {
        let data = b"one two three";
        assert_eq!(
            fragment(data, 13, Version::V3, 0x100, 0x100),
            vec![data.to_vec()]
        );
    }

    #[test]
    fn test_fragment_v3_vectors() {
        let out = fragment(b"one two three", 4, Version::V3, 0x100, 0x102);
        assert_eq!(
            out,
            vec![
                b"?OTR|00000100|00000102,00001,00004,one ,".to_vec(),
                b"?OTR|00000100|00000102,00002,00004,two ,".to_vec(),
                b"?OTR|00000100|00000102,00003,00004,thre,".to_vec(),
                b"?OTR|00000100|00000102,00004,00004,e,".to_vec(),
            ]
        );
    }

    #[test]
    fn test_fragment_v2_vectors() {
        let out = fragment(b"one two three", 4, Version::V2, 0x100, 0x101);
        assert_eq!(
            out,
            vec![
                b"?OTR,00001,00004,one ,".to_vec(),
                b"?OTR,00002,00004,two ,".to_vec(),
                b"?OTR,00003,00004,thre,".to_vec(),
                b"?OTR,00004,00004,e,".to_vec(),
            ]
        );
    }

    #[test]
    fn test_first_fragment_starts_new_context() {
        let mut ctx = FragmentationContext::new();
        ctx.consume(Version::V2, 0, 0, b"?OTR,00001,00004,one ,")
            .unwrap();
        assert_eq!(ctx.buffer(), b"one ");
        assert_eq!(ctx.current_index(), 1);
        assert_eq!(ctx.current_len(), 4);
    }

    #[test]
    fn test_first_v3_fragment_starts_new_context() {
        let mut ctx = FragmentationContext::new();
        ctx.consume(
            Version::V3,
            0x102,
            0x100,
            b"?OTR|00000100|00000102,00001,00004,one ,",
        )
        .unwrap();
        assert_eq!(ctx.buffer(), b"one ");
        assert_eq!(ctx.current_index(), 1);
        assert_eq!(ctx.current_len(), 4);
    }

    #[test]
    fn test_mismatched_instance_tags_leave_context_unchanged() {
        let existing = context(b"shouldn't change", 0, 0);

        let mut ctx = existing.clone();
        let event = ctx
            .consume(
                Version::V3,
                0x103,
                0x104,
                b"?OTR|00000204|00000103,00001,00004,one ,",
            )
            .unwrap();
        assert_eq!(event, Some(OtrEvent::ReceivedMessageForOtherInstance));
        assert_eq!(ctx, existing);

        let mut ctx = existing.clone();
        let event = ctx
            .consume(
                Version::V3,
                0x103,
                0x104,
                b"?OTR|00000104|00000203,00001,00004,one ,",
            )
            .unwrap();
        assert_eq!(event, Some(OtrEvent::ReceivedMessageForOtherInstance));
        assert_eq!(ctx, existing);
    }

    #[test]
    fn test_reserved_sender_tag_is_malformed() {
        let existing = context(b"shouldn't change", 0, 0);
        let mut ctx = existing.clone();
        let event = ctx
            .consume(
                Version::V3,
                0x103,
                0x0a,
                b"?OTR|0000000a|00000103,00001,00004,one ,",
            )
            .unwrap();
        assert_eq!(event, Some(OtrEvent::MessageMalformed));
        assert_eq!(ctx, existing);
    }

    #[test]
    fn test_zero_index_resets_context() {
        let mut ctx = FragmentationContext::new();
        ctx.consume(Version::V2, 0, 0, b"?OTR,00000,00004,one ,")
            .unwrap();
        assert_eq!(ctx, FragmentationContext::new());
    }

    #[test]
    fn test_zero_total_resets_context() {
        let mut ctx = FragmentationContext::new();
        ctx.consume(Version::V2, 0, 0, b"?OTR,00001,00000,one ,")
            .unwrap();
        assert_eq!(ctx, FragmentationContext::new());
    }

    #[test]
    fn test_index_above_total_resets_context() {
        let mut ctx = FragmentationContext::new();
        ctx.consume(Version::V2, 0, 0, b"?OTR,00005,00004,one ,")
            .unwrap();
        assert_eq!(ctx, FragmentationContext::new());
    }

    #[test]
    fn test_sequential_fragment_appends() {
        let mut ctx = context(b"blarg one two", 2, 4);
        ctx.consume(Version::V2, 0, 0, b"?OTR,00003,00004, one,")
            .unwrap();
        assert_eq!(ctx, context(b"blarg one two one", 3, 4));
    }

    #[test]
    fn test_changed_total_resets_context() {
        let mut ctx = context(b"blarg one two", 2, 4);
        ctx.consume(Version::V2, 0, 0, b"?OTR,00003,00005, one,")
            .unwrap();
        assert_eq!(ctx, FragmentationContext::new());
    }

    #[test]
    fn test_skipped_index_resets_context() {
        let mut ctx = context(b"blarg one two", 2, 5);
        ctx.consume(Version::V2, 0, 0, b"?OTR,00004,00005, one,")
            .unwrap();
        assert_eq!(ctx, FragmentationContext::new());
    }

    #[test]
    fn test_completion_detection() {
        assert!(!context(b"", 0, 0).is_complete());
        assert!(!context(b"", 1, 2).is_complete());
        assert!(!context(b"", 3, 2).is_complete());
        assert!(context(b"", 3, 3).is_complete());
    }

    #[test]
    fn test_take_message_resets() {
        let mut ctx = context(b"done", 2, 2);
        assert_eq!(ctx.take_message(), Some(b"done".to_vec()));
        assert_eq!(ctx, FragmentationContext::new());
        assert_eq!(ctx.take_message(), None);
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let mut ctx = FragmentationContext::new();
        // Too few fields.
        assert_eq!(
            ctx.consume(Version::V2, 0, 0, b"?OTR,,"),
            Err(OtrError::InvalidFragment)
        );
        // Payload containing a comma splits into too many fields.
        assert_eq!(
            ctx.consume(Version::V2, 0, 0, b"?OTR,00001,00002,a,b,"),
            Err(OtrError::InvalidFragment)
        );
    }

    #[test]
    fn test_parse_rejects_bad_counters() {
        let mut ctx = FragmentationContext::new();
        assert_eq!(
            ctx.consume(Version::V2, 0, 0, b"?OTR,0000x,00001,p,"),
            Err(OtrError::InvalidFragment)
        );
        assert_eq!(
            ctx.consume(Version::V2, 0, 0, b"?OTR,00001,0000x,p,"),
            Err(OtrError::InvalidFragment)
        );
    }

    #[test]
    fn test_roundtrip_in_order() {
        let data = b"one two three";
        let fragments = fragment(data, 4, Version::V3, 0x100, 0x102);
        let mut ctx = FragmentationContext::new();
        for frag in &fragments {
            let event = ctx.consume(Version::V3, 0x102, 0x100, frag).unwrap();
            assert_eq!(event, None);
        }
        assert_eq!(ctx.take_message(), Some(data.to_vec()));
    }
}
