//! # otrcore - Off-the-Record messaging core
//!
//! The cryptographic session-establishment engine of the OTR protocol:
//! the authenticated key exchange (AKE), the Socialist Millionaires'
//! Protocol (SMP), and the fragmentation machinery that carries both over
//! an arbitrary instant-messaging transport.
//!
//! ## Features
//!
//! - **Authenticated Key Exchange**: the four-message DH handshake
//!   (DH-Commit, DH-Key, Reveal-Signature, Signature) with commitment
//!   collision handling and retransmission support
//! - **Socialist Millionaires' Protocol**: zero-knowledge verification of
//!   a shared secret, carried in TLVs inside encrypted data messages
//! - **Fragmentation**: splitting and reassembly with v3 instance-tag
//!   filtering
//! - **Protocol versions 2 and 3**, negotiated through query messages or
//!   whitespace tags
//!
//! ## Protocol Overview
//!
//! 1. A host asks for a secure session ([`Conversation::start_ake`]) or
//!    receives a `?OTRv23?` query from the peer
//! 2. The AKE runs over four messages; on completion both sides hold the
//!    same 8-byte SSID and directional data keys
//! 3. Encrypted data messages flow; either side may run SMP to verify
//!    the channel against a shared human secret
//! 4. [`Conversation::end`] tears the channel down and zeroizes all key
//!    material
//!
//! ## Example
//!
//! ```rust,no_run
//! use otrcore::{Conversation, Policy, PrivateKey};
//! use rand::rngs::OsRng;
//!
//! # fn main() -> Result<(), otrcore::OtrError> {
//! let mut alice = Conversation::new(Policy::default(), OsRng);
//! alice.set_keys(PrivateKey::generate(), None);
//!
//! // Hand each returned message to the transport; feed inbound bytes
//! // back through `receive`.
//! let to_send = alice.start_ake()?;
//! # let _ = to_send;
//! # Ok(())
//! # }
//! ```
//!
//! The core is single-threaded per conversation and fully synchronous;
//! hosts multiplex many conversations by partitioning them across
//! threads. The entropy source and long-term DSA keys are supplied by
//! the host and never persisted by the core.

pub mod ake;
pub mod conversation;
pub mod data;
pub mod dh;
pub mod dsa;
pub mod error;
pub mod events;
pub mod fragment;
pub mod keys;
pub mod persist;
pub mod policy;
pub mod smp;
pub mod version;
pub mod wire;

pub use ake::AuthState;
pub use conversation::{Conversation, MsgState, Received, ValidMessage, HEARTBEAT_INTERVAL};
pub use dsa::{PrivateKey, PublicKey};
pub use error::{OtrError, Result};
pub use events::OtrEvent;
pub use policy::Policy;
pub use smp::SmpState;
pub use version::Version;
