//! The conversation façade tying the state machines together.
//!
//! A [`Conversation`] owns the AKE, SMP, fragmentation and key contexts
//! for one peer relationship. The host feeds it inbound transport bytes
//! through [`Conversation::receive`] and outbound plaintext through
//! [`Conversation::send`]; both return the messages to put on the wire.
//! All processing is synchronous and single-threaded per conversation.
//!
//! Binary OTR messages travel base64-armored between the `?OTR:` marker
//! and a trailing `.`, and pass through the fragmentation engine when a
//! transport limit is configured.

use std::time::{Duration, Instant};

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::{CryptoRng, RngCore};
use tracing::{debug, warn};

use crate::ake::Ake;
use crate::data::{KeyManagementContext, FLAG_IGNORE_UNREADABLE};
use crate::dsa;
use crate::error::{OtrError, Result};
use crate::events::OtrEvent;
use crate::fragment::{fragment, FragmentationContext};
use crate::policy::Policy;
use crate::smp::Smp;
use crate::version::{
    build_whitespace_tag, find_whitespace_tag, parse_query, query_message, select_version,
    Version, ERROR_MARKER, MIN_INSTANCE_TAG, MSG_MARKER, QUERY_MARKER,
};
use crate::wire::{tlv_type, Tlv, MSG_TYPE_DATA, MSG_TYPE_DH_COMMIT, MSG_TYPE_DH_KEY,
    MSG_TYPE_REVEAL_SIG, MSG_TYPE_SIG};

/// A message ready to hand to the transport.
pub type ValidMessage = Vec<u8>;

/// How long after the last sent data message a heartbeat is due.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Privacy state of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MsgState {
    /// Messages travel in the clear.
    #[default]
    Plaintext,
    /// An AKE completed; messages are encrypted and authenticated.
    Encrypted,
    /// The peer ended the secure conversation; nothing can be sent until
    /// a new AKE completes.
    Finished,
}

/// The outcome of processing one inbound transport message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Received {
    /// Decrypted or passed-through plaintext for the user, if any.
    pub plaintext: Option<Vec<u8>>,
    /// Messages to hand to the transport, in order.
    pub to_send: Vec<ValidMessage>,
    /// Events raised while processing.
    pub events: Vec<OtrEvent>,
}

/// All the state for one peer relationship in an IM system.
///
/// Policies are not supposed to change once a conversation has been used.
pub struct Conversation {
    pub(crate) version: Version,
    version_committed: bool,
    pub(crate) policies: Policy,
    pub(crate) rand: Box<dyn RngCore>,

    pub(crate) msg_state: MsgState,
    pub(crate) our_instance_tag: u32,
    pub(crate) their_instance_tag: u32,
    pub(crate) ssid: [u8; 8],

    pub(crate) our_key: Option<dsa::PrivateKey>,
    pub(crate) their_key: Option<dsa::PublicKey>,

    pub(crate) ake: Ake,
    pub(crate) smp: Smp,
    pub(crate) keys: Option<KeyManagementContext>,

    pub(crate) fragment_size: usize,
    pub(crate) fragmentation_context: FragmentationContext,

    last_sent: Option<Instant>,
    pub(crate) events: Vec<OtrEvent>,
}

impl Conversation {
    /// Creates a conversation with the given policies and entropy source.
    ///
    /// The entropy source is read whenever randomness is required; a
    /// failed read surfaces as [`OtrError::ShortRandomRead`] with no
    /// state advanced.
    pub fn new<R>(policies: Policy, rand: R) -> Self
    where
        R: CryptoRng + RngCore + 'static,
    {
        let version = if policies.has(Policy::ALLOW_V3) {
            Version::V3
        } else {
            Version::V2
        };
        Self {
            version,
            version_committed: false,
            policies,
            rand: Box::new(rand),
            msg_state: MsgState::default(),
            our_instance_tag: 0,
            their_instance_tag: 0,
            ssid: [0u8; 8],
            our_key: None,
            their_key: None,
            ake: Ake::default(),
            smp: Smp::default(),
            keys: None,
            fragment_size: 0,
            fragmentation_context: FragmentationContext::new(),
            last_sent: None,
            events: Vec::new(),
        }
    }

    /// Assigns our long-term private key and, optionally, the peer's
    /// public key known from an earlier session.
    pub fn set_keys(&mut self, our_key: dsa::PrivateKey, their_key: Option<dsa::PublicKey>) {
        self.our_key = Some(our_key);
        self.their_key = their_key;
    }

    /// Returns the peer's long-term public key, once learned.
    pub fn their_key(&self) -> Option<&dsa::PublicKey> {
        self.their_key.as_ref()
    }

    /// Returns the 8-byte session identifier derived by the AKE.
    pub fn ssid(&self) -> [u8; 8] {
        self.ssid
    }

    /// Returns whether the conversation is currently encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.msg_state == MsgState::Encrypted
    }

    /// Returns our instance tag, generating one on first use.
    pub fn our_instance_tag(&mut self) -> u32 {
        self.ensure_instance_tag();
        self.our_instance_tag
    }

    /// Overrides the instance tags, e.g. when restoring a session.
    pub fn set_instance_tags(&mut self, ours: u32, theirs: u32) {
        self.our_instance_tag = ours;
        self.their_instance_tag = theirs;
    }

    /// Limits outbound messages to `size` payload bytes per fragment;
    /// `0` disables fragmentation.
    pub fn set_fragment_size(&mut self, size: usize) {
        self.fragment_size = size;
    }

    /// Builds the query message advertising our allowed versions.
    pub fn query_message(&self) -> String {
        query_message(self.policies)
    }

    /// Drains events accumulated by calls that returned an error.
    pub fn take_events(&mut self) -> Vec<OtrEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts the AKE as initiator, returning the DH-Commit message.
    pub fn start_ake(&mut self) -> Result<Vec<ValidMessage>> {
        self.ensure_instance_tag();
        let msg = self.dh_commit_message()?;
        Ok(self.encode_and_fragment(msg))
    }

    /// Ends a secure conversation: notifies the peer, wipes all key
    /// material and returns to plaintext.
    pub fn end(&mut self) -> Result<Received> {
        let mut out = Received::default();
        if self.msg_state == MsgState::Encrypted {
            self.smp.wipe();
            let tlv = Tlv::new(tlv_type::DISCONNECTED, Vec::new());
            let msg = self.gen_data_message(b"", &[tlv], FLAG_IGNORE_UNREADABLE)?;
            out.to_send = self.encode_and_fragment(msg);
            self.events.push(OtrEvent::GoneInsecure);
        }
        self.msg_state = MsgState::Plaintext;
        if let Some(keys) = self.keys.as_mut() {
            keys.wipe();
        }
        self.keys = None;
        self.ake.wipe();
        self.smp.wipe();
        out.events = self.take_events();
        Ok(out)
    }

    /// Prepares `content` for the transport according to the current
    /// message state.
    pub fn send(&mut self, content: &[u8]) -> Result<Vec<ValidMessage>> {
        match self.msg_state {
            MsgState::Plaintext => {
                if self.policies.has(Policy::REQUIRE_ENCRYPTION) {
                    return Err(OtrError::NotEncrypted);
                }
                let mut msg = content.to_vec();
                if self.policies.has(Policy::SEND_WHITESPACE_TAG) {
                    msg.extend_from_slice(&build_whitespace_tag(self.policies));
                }
                Ok(vec![msg])
            }
            MsgState::Encrypted => {
                let msg = self.gen_data_message(content, &[], 0)?;
                self.last_sent = Some(Instant::now());
                Ok(self.encode_and_fragment(msg))
            }
            MsgState::Finished => Err(OtrError::NotEncrypted),
        }
    }

    /// Processes one inbound transport message.
    ///
    /// Wire-format violations and invalid fragments are dropped silently
    /// with state preserved. Handshake verification failures reset the
    /// AKE and are returned as errors; events raised alongside an error
    /// stay buffered for [`Conversation::take_events`].
    pub fn receive(&mut self, message: &[u8]) -> Result<Received> {
        let mut out = Received::default();
        match self.receive_inner(message, &mut out) {
            Ok(()) => {
                out.events = self.take_events();
                Ok(out)
            }
            // Wire-format violations are dropped with state preserved.
            Err(OtrError::CorruptMessage(what)) => {
                warn!(what, "dropping corrupt message");
                out.events = self.take_events();
                Ok(out)
            }
            Err(OtrError::InvalidFragment) => {
                warn!("dropping invalid fragment");
                out.events = self.take_events();
                Ok(out)
            }
            Err(e) => Err(e),
        }
    }

    fn receive_inner(&mut self, message: &[u8], out: &mut Received) -> Result<()> {
        if self.version.is_fragmented(message) {
            self.resolve_version_from_fragment(message)?;
            if let Some(event) = self.fragmentation_context.consume(
                self.version,
                self.our_instance_tag,
                self.their_instance_tag,
                message,
            )? {
                self.events.push(event);
                return Ok(());
            }
            return match self.fragmentation_context.take_message() {
                Some(reassembled) => self.dispatch(&reassembled, out),
                None => Ok(()),
            };
        }
        self.dispatch(message, out)
    }

    fn dispatch(&mut self, msg: &[u8], out: &mut Received) -> Result<()> {
        if msg.starts_with(MSG_MARKER) {
            return self.receive_encoded(msg, out);
        }
        if msg.starts_with(ERROR_MARKER) {
            let text = msg[ERROR_MARKER.len()..].to_vec();
            warn!("peer reported an OTR error");
            self.events.push(OtrEvent::ErrorMessageReceived(text));
            if self.policies.has(Policy::ERROR_START_AKE) {
                out.to_send.push(self.query_message().into_bytes());
            }
            return Ok(());
        }
        if msg.starts_with(QUERY_MARKER) && !parse_query(msg).is_empty() {
            return self.receive_query(msg, out);
        }
        self.receive_plaintext(msg, out)
    }

    /// Handles a query message: commit to the best mutual version and
    /// answer with DH-Commit.
    fn receive_query(&mut self, msg: &[u8], out: &mut Received) -> Result<()> {
        let versions = parse_query(msg);
        let version = select_version(&versions, self.policies)?;
        self.commit_version(version)?;
        debug!(version = ?version, "accepted OTR query");

        self.ensure_instance_tag();
        let commit = self.dh_commit_message()?;
        out.to_send = self.encode_and_fragment(commit);
        Ok(())
    }

    fn receive_plaintext(&mut self, msg: &[u8], out: &mut Received) -> Result<()> {
        let mut plain = msg.to_vec();
        if let Some((versions, cleaned)) = find_whitespace_tag(msg) {
            plain = cleaned;
            if self.policies.has(Policy::WHITESPACE_START_AKE) {
                if let Ok(version) = select_version(&versions, self.policies) {
                    if self.commit_version(version).is_ok() {
                        self.ensure_instance_tag();
                        let commit = self.dh_commit_message()?;
                        out.to_send = self.encode_and_fragment(commit);
                    }
                }
            }
        }
        out.plaintext = Some(plain);
        Ok(())
    }

    /// Handles a base64-armored binary message.
    fn receive_encoded(&mut self, msg: &[u8], out: &mut Received) -> Result<()> {
        let armored = &msg[MSG_MARKER.len()..];
        let dot = armored
            .iter()
            .rposition(|&b| b == b'.')
            .ok_or(OtrError::CorruptMessage("unterminated encoded message"))?;
        let binary = BASE64_STANDARD
            .decode(&armored[..dot])
            .map_err(|_| OtrError::CorruptMessage("invalid base64 payload"))?;

        if binary.len() < 3 {
            return Err(OtrError::CorruptMessage("message shorter than header"));
        }
        let wire_version = u16::from_be_bytes([binary[0], binary[1]]);
        let version = Version::from_protocol_version(wire_version)
            .ok_or(OtrError::CorruptMessage("unknown protocol version"))?;
        self.commit_version(version)?;

        let header = self.version.parse_message_header(&binary)?;
        if self.version == Version::V3 && !self.check_instance_tags(&header) {
            return Ok(());
        }

        let payload = &binary[header.payload_offset..];
        match header.msg_type {
            MSG_TYPE_DH_COMMIT | MSG_TYPE_DH_KEY | MSG_TYPE_REVEAL_SIG | MSG_TYPE_SIG => {
                if let Some(reply) = self.receive_ake(&header, payload)? {
                    out.to_send = self.encode_and_fragment(reply);
                }
                Ok(())
            }
            MSG_TYPE_DATA => self.receive_data(&binary, &header, out),
            _ => {
                warn!(msg_type = header.msg_type, "ignoring unknown message type");
                Ok(())
            }
        }
    }

    /// Applies the v3 instance-tag filter. Returns false when the message
    /// must be dropped.
    fn check_instance_tags(&mut self, header: &crate::version::MessageHeader) -> bool {
        self.ensure_instance_tag();
        if self.their_instance_tag == 0 && header.sender_tag >= MIN_INSTANCE_TAG {
            self.their_instance_tag = header.sender_tag;
        }

        if header.sender_tag < MIN_INSTANCE_TAG
            || (header.receiver_tag > 0 && header.receiver_tag < MIN_INSTANCE_TAG)
        {
            self.events.push(OtrEvent::MessageMalformed);
            return false;
        }
        if (header.receiver_tag != 0 && header.receiver_tag != self.our_instance_tag)
            || header.sender_tag != self.their_instance_tag
        {
            self.events.push(OtrEvent::ReceivedMessageForOtherInstance);
            return false;
        }
        true
    }

    fn receive_data(
        &mut self,
        binary: &[u8],
        header: &crate::version::MessageHeader,
        out: &mut Received,
    ) -> Result<()> {
        if self.msg_state != MsgState::Encrypted {
            warn!("encrypted data without a secure channel");
            let mut reply = ERROR_MARKER.to_vec();
            reply.extend_from_slice(b" You sent encrypted data, but no secure channel is established.");
            out.to_send.push(reply);
            return Ok(());
        }

        let (content, tlvs) = self.process_data_message(binary, header)?;

        let mut replies = Vec::new();
        for tlv in &tlvs {
            match tlv.typ {
                tlv_type::PADDING => {}
                tlv_type::DISCONNECTED => {
                    debug!("peer disconnected");
                    self.msg_state = MsgState::Finished;
                    self.smp.wipe();
                    if let Some(keys) = self.keys.as_mut() {
                        keys.wipe();
                    }
                    self.keys = None;
                    self.events.push(OtrEvent::GoneInsecure);
                }
                tlv_type::SMP1
                | tlv_type::SMP1Q
                | tlv_type::SMP2
                | tlv_type::SMP3
                | tlv_type::SMP4
                | tlv_type::SMP_ABORT => {
                    if let Some(reply) = self.handle_smp_tlv(tlv)? {
                        replies.push(reply);
                    }
                }
                other => {
                    debug!(typ = other, "ignoring unknown TLV");
                }
            }
        }

        if !replies.is_empty() {
            let msg = self.gen_data_message(b"", &replies, 0)?;
            self.last_sent = Some(Instant::now());
            out.to_send.extend(self.encode_and_fragment(msg));
        }

        if !content.is_empty() {
            out.plaintext = Some(content);
            self.maybe_heartbeat(out)?;
        }
        Ok(())
    }

    /// Sends an empty keep-alive data message when the last sent data
    /// message is older than [`HEARTBEAT_INTERVAL`].
    fn maybe_heartbeat(&mut self, out: &mut Received) -> Result<()> {
        if self.msg_state != MsgState::Encrypted {
            return Ok(());
        }
        let due = match self.last_sent {
            Some(at) => at.elapsed() > HEARTBEAT_INTERVAL,
            None => true,
        };
        if due {
            let msg = self.gen_data_message(b"", &[], FLAG_IGNORE_UNREADABLE)?;
            out.to_send.extend(self.encode_and_fragment(msg));
            self.last_sent = Some(Instant::now());
            self.events.push(OtrEvent::HeartbeatSent);
        }
        Ok(())
    }

    /// Sends outgoing TLVs inside an encrypted data message.
    pub(crate) fn send_tlvs(&mut self, tlvs: &[Tlv]) -> Result<Vec<ValidMessage>> {
        let msg = self.gen_data_message(b"", tlvs, 0)?;
        self.last_sent = Some(Instant::now());
        Ok(self.encode_and_fragment(msg))
    }

    /// Commits to a protocol version, verifying policy and consistency.
    fn commit_version(&mut self, version: Version) -> Result<()> {
        let allowed = match version {
            Version::V2 => self.policies.has(Policy::ALLOW_V2),
            Version::V3 => self.policies.has(Policy::ALLOW_V3),
        };
        if !allowed {
            return Err(OtrError::InvalidVersion);
        }
        if self.version_committed && self.version != version {
            return Err(OtrError::CorruptMessage("protocol version changed"));
        }
        self.version = version;
        self.version_committed = true;
        Ok(())
    }

    fn resolve_version_from_fragment(&mut self, data: &[u8]) -> Result<()> {
        if data.starts_with(b"?OTR|") {
            self.commit_version(Version::V3)?;
        }
        Ok(())
    }

    /// Wraps an AKE payload with the message header for the current
    /// version.
    pub(crate) fn wrap_message(&mut self, msg_type: u8, payload: &[u8]) -> Vec<u8> {
        self.ensure_instance_tag();
        let mut msg =
            self.version
                .message_header(msg_type, self.our_instance_tag, self.their_instance_tag);
        msg.extend_from_slice(payload);
        msg
    }

    /// Armors a binary message and splits it for the transport.
    pub(crate) fn encode_and_fragment(&mut self, msg: Vec<u8>) -> Vec<ValidMessage> {
        let mut armored = MSG_MARKER.to_vec();
        armored.extend_from_slice(BASE64_STANDARD.encode(&msg).as_bytes());
        armored.push(b'.');
        fragment(
            &armored,
            self.fragment_size,
            self.version,
            self.our_instance_tag,
            self.their_instance_tag,
        )
    }

    fn ensure_instance_tag(&mut self) {
        if self.version != Version::V3 || self.our_instance_tag != 0 {
            return;
        }
        let mut tag = 0u32;
        while tag < MIN_INSTANCE_TAG {
            tag = self.rand.next_u32();
        }
        self.our_instance_tag = tag;
    }
}
