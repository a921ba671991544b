//! Host-visible events raised while processing messages.
//!
//! The original handler-callback surface is replaced by events returned
//! from [`Conversation::receive`](crate::Conversation::receive) (and
//! retrievable via [`Conversation::take_events`](crate::Conversation::take_events)
//! after calls that return an error).

/// A signal the host may want to act on or display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtrEvent {
    /// A v3 message or fragment addressed to a different instance was dropped.
    ReceivedMessageForOtherInstance,
    /// A v3 message carried an instance tag in the reserved range and was dropped.
    MessageMalformed,
    /// An empty encrypted message was sent to keep the session alive.
    HeartbeatSent,
    /// The peer sent a `?OTR Error:` reply; payload is the peer's message.
    ErrorMessageReceived(Vec<u8>),
    /// The authenticated key exchange completed; the channel is now encrypted.
    GoneSecure,
    /// The encrypted channel was torn down.
    GoneInsecure,
    /// The peer started SMP; the host must supply the shared secret via
    /// [`Conversation::provide_smp_secret`](crate::Conversation::provide_smp_secret).
    SmpSecretRequested {
        /// The peer's question, when SMP was started with one.
        question: Option<Vec<u8>>,
    },
    /// SMP finished and the shared secrets matched.
    SmpSucceeded,
    /// SMP finished and the shared secrets did not match.
    SmpFailed,
    /// SMP was aborted, either by the peer or due to a protocol violation.
    SmpAborted,
}
