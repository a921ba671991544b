//! Shared helpers for the integration suites.
#![allow(dead_code)]

use once_cell::sync::Lazy;
use rand::rngs::OsRng;

use otrcore::{Conversation, OtrEvent, Policy, PrivateKey, Received};

// DSA parameter generation is expensive; every test shares these keys.
pub static ALICE_KEY: Lazy<PrivateKey> = Lazy::new(PrivateKey::generate);
pub static BOB_KEY: Lazy<PrivateKey> = Lazy::new(PrivateKey::generate);

/// Builds a conversation with the default policies and a long-term key.
pub fn conversation(key: &PrivateKey) -> Conversation {
    conversation_with(key, Policy::default())
}

/// Builds a conversation with explicit policies.
pub fn conversation_with(key: &PrivateKey, policies: Policy) -> Conversation {
    let mut c = Conversation::new(policies, OsRng);
    c.set_keys(key.clone(), None);
    c
}

/// Delivers `messages` to `to`, returning everything it wants sent back
/// plus the events it raised.
pub fn deliver(to: &mut Conversation, messages: &[Vec<u8>]) -> (Vec<Vec<u8>>, Vec<OtrEvent>) {
    let mut outgoing = Vec::new();
    let mut events = Vec::new();
    for msg in messages {
        let Received {
            to_send,
            events: ev,
            ..
        } = to.receive(msg).expect("receive failed");
        outgoing.extend(to_send);
        events.extend(ev);
    }
    (outgoing, events)
}

/// Ping-pongs messages between the two peers until both go quiet.
/// Returns every event each side raised.
pub fn pump(
    a: &mut Conversation,
    b: &mut Conversation,
    initial_to_b: Vec<Vec<u8>>,
) -> (Vec<OtrEvent>, Vec<OtrEvent>) {
    let mut a_events = Vec::new();
    let mut b_events = Vec::new();
    let mut to_b = initial_to_b;
    for _ in 0..16 {
        if to_b.is_empty() {
            break;
        }
        let (to_a, ev) = deliver(b, &to_b);
        b_events.extend(ev);
        if to_a.is_empty() {
            break;
        }
        let (next, ev) = deliver(a, &to_a);
        a_events.extend(ev);
        to_b = next;
    }
    (a_events, b_events)
}

/// Runs a complete AKE between two fresh conversations, Bob initiating.
pub fn establish(bob: &mut Conversation, alice: &mut Conversation) {
    let commit = bob.start_ake().expect("start_ake failed");
    let (bob_events, alice_events) = pump(bob, alice, commit);
    assert!(bob_events.contains(&OtrEvent::GoneSecure));
    assert!(alice_events.contains(&OtrEvent::GoneSecure));
    assert!(bob.is_encrypted());
    assert!(alice.is_encrypted());
}
