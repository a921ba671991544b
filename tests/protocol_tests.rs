//! Property-style and cross-cutting protocol tests.

mod common;

use rand::rngs::OsRng;
use rand::Rng;

use common::{conversation, deliver, establish, BOB_KEY};
use otrcore::fragment::{fragment, FragmentationContext};
use otrcore::{OtrEvent, Version};

/// Random payload over the armored-message alphabet (fragment payloads
/// never contain commas in practice, and the reassembly framing relies
/// on that).
fn random_payload(rng: &mut impl Rng, len: usize) -> Vec<u8> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=?OTR:.";
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect()
}

#[test]
fn test_fragment_reassemble_roundtrip_property() {
    let mut rng = OsRng;
    for _ in 0..50 {
        let len = rng.gen_range(1..400);
        let size = rng.gen_range(1..64);
        let data = random_payload(&mut rng, len);

        let fragments = fragment(&data, size, Version::V3, 0x100, 0x102);
        let mut ctx = FragmentationContext::new();
        let mut reassembled = None;
        for frag in &fragments {
            // A message below the limit travels unframed.
            if fragments.len() == 1 {
                reassembled = Some(frag.clone());
                break;
            }
            assert!(ctx.consume(Version::V3, 0x102, 0x100, frag).unwrap().is_none());
            if let Some(msg) = ctx.take_message() {
                reassembled = Some(msg);
            }
        }
        assert_eq!(reassembled.as_deref(), Some(&data[..]), "len={} size={}", len, size);
    }
}

#[test]
fn test_fragmented_handshake_completes() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&common::ALICE_KEY);
    bob.set_fragment_size(64);
    alice.set_fragment_size(64);

    establish(&mut bob, &mut alice);
    assert_eq!(bob.ssid(), alice.ssid());
}

#[test]
fn test_fragmented_data_message_roundtrip() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&common::ALICE_KEY);
    establish(&mut bob, &mut alice);

    bob.set_fragment_size(48);
    let msgs = bob.send(b"a somewhat longer message that will not fit in one fragment").unwrap();
    assert!(msgs.len() > 1);
    assert!(msgs[0].starts_with(b"?OTR|"));

    let mut plaintext = None;
    for msg in &msgs {
        let received = alice.receive(msg).unwrap();
        if received.plaintext.is_some() {
            plaintext = received.plaintext;
        }
    }
    assert_eq!(
        plaintext.as_deref(),
        Some(&b"a somewhat longer message that will not fit in one fragment"[..])
    );
}

#[test]
fn test_fragment_for_other_instance_raises_event() {
    let mut c = conversation(&BOB_KEY);
    c.set_instance_tags(0x103, 0x104);

    let received = c
        .receive(b"?OTR|00000204|00000103,00001,00004,one ,")
        .unwrap();
    assert_eq!(
        received.events,
        vec![OtrEvent::ReceivedMessageForOtherInstance]
    );

    // The reassembly context is untouched; a normal exchange still works.
    let received = c.receive(b"some plain text").unwrap();
    assert_eq!(received.plaintext.as_deref(), Some(&b"some plain text"[..]));
}

#[test]
fn test_reserved_instance_tag_raises_malformed() {
    let mut c = conversation(&BOB_KEY);
    c.set_instance_tags(0x103, 0x0a);

    let received = c
        .receive(b"?OTR|0000000a|00000103,00001,00004,one ,")
        .unwrap();
    assert_eq!(received.events, vec![OtrEvent::MessageMalformed]);
}

#[test]
fn test_first_received_data_message_triggers_heartbeat() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&common::ALICE_KEY);
    establish(&mut bob, &mut alice);

    // Alice has never sent a data message, so receiving one makes her
    // emit an empty keep-alive.
    let msgs = bob.send(b"hello").unwrap();
    let (to_bob, events) = deliver(&mut alice, &msgs);
    assert!(events.contains(&OtrEvent::HeartbeatSent));
    assert_eq!(to_bob.len(), 1);

    // The keep-alive decrypts to nothing on Bob's side.
    let received = bob.receive(&to_bob[0]).unwrap();
    assert_eq!(received.plaintext, None);
}
