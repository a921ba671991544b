//! Error types for OTR protocol operations.

use thiserror::Error;

/// Result type alias for OTR operations.
pub type Result<T> = std::result::Result<T, OtrError>;

/// Main error type for the OTR core.
///
/// Wire-format and fragment errors are recovered locally by the
/// [`Conversation`](crate::Conversation): the offending message is dropped
/// and state is preserved. Handshake verification failures abort the AKE
/// and are surfaced to the host. Entropy failure is fatal for the current
/// operation; no state is advanced and the caller decides whether to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtrError {
    /// The host-supplied entropy source failed to deliver the requested bytes.
    #[error("entropy source failed to deliver requested random bytes")]
    ShortRandomRead,

    /// A wire-format violation: a length field exceeds the remaining input,
    /// a fixed-size field has the wrong length, or trailing bytes remain.
    #[error("corrupt OTR message: {0}")]
    CorruptMessage(&'static str),

    /// No mutually supported protocol version between the peers.
    #[error("no mutually supported OTR version")]
    InvalidVersion,

    /// The peer sent a Diffie-Hellman value outside `[2, p-2]`.
    #[error("DH value out of range")]
    DhValueOutOfRange,

    /// The decrypted `g^x` disagrees with the commitment hash.
    #[error("bad commit MAC in reveal signature message")]
    BadCommitMac,

    /// The HMAC over an encrypted signature block does not verify.
    #[error("bad MAC over encrypted signature")]
    BadSignatureMac,

    /// DSA verification failed, or extra bytes follow the signature.
    #[error("bad signature in encrypted signature")]
    BadSignature,

    /// A v3 message carried instance tags addressed to a different instance.
    #[error("message received for another instance")]
    ReceivedMessageForOtherInstance,

    /// A v3 instance tag fell in the reserved range below `0x100`.
    #[error("malformed message: instance tag in reserved range")]
    MessageMalformed,

    /// An inbound fragment did not parse.
    #[error("invalid OTR fragment")]
    InvalidFragment,

    /// An operation requiring an encrypted channel was attempted without one.
    #[error("conversation is not encrypted")]
    NotEncrypted,

    /// An SMP message arrived that the current SMP state does not expect.
    #[error("unexpected SMP message")]
    SmpUnexpectedMessage,

    /// SMP is already running and cannot be started again.
    #[error("SMP already in progress")]
    SmpInProgress,

    /// The host has not supplied the long-term keys this operation needs.
    #[error("long-term keys not configured")]
    MissingKeys,
}
