//! End-to-end tests for the authenticated key exchange.

mod common;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use num_bigint::BigUint;
use rand::rngs::OsRng;

use common::{conversation, conversation_with, deliver, establish, pump, ALICE_KEY, BOB_KEY};
use otrcore::{Conversation, OtrError, OtrEvent, Policy};

fn decode_armored(msg: &[u8]) -> Vec<u8> {
    assert!(msg.starts_with(b"?OTR:"));
    assert!(msg.ends_with(b"."));
    BASE64_STANDARD
        .decode(&msg[5..msg.len() - 1])
        .expect("valid base64")
}

fn encode_armored(binary: &[u8]) -> Vec<u8> {
    let mut out = b"?OTR:".to_vec();
    out.extend_from_slice(BASE64_STANDARD.encode(binary).as_bytes());
    out.push(b'.');
    out
}

#[test]
fn test_happy_path_v3() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    establish(&mut bob, &mut alice);

    assert_eq!(bob.ssid(), alice.ssid());
    assert_ne!(bob.ssid(), [0u8; 8]);
    assert_eq!(bob.their_key().unwrap(), ALICE_KEY.public_key());
    assert_eq!(alice.their_key().unwrap(), BOB_KEY.public_key());
}

#[test]
fn test_happy_path_v2() {
    let mut bob = conversation_with(&BOB_KEY, Policy::new(Policy::ALLOW_V2));
    let mut alice = conversation_with(&ALICE_KEY, Policy::new(Policy::ALLOW_V2));

    establish(&mut bob, &mut alice);
    assert_eq!(bob.ssid(), alice.ssid());
}

#[test]
fn test_handshake_from_query_message() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    // Alice advertises; Bob answers with DH-Commit and the AKE runs.
    let query = alice.query_message().into_bytes();
    let (to_alice, _) = deliver(&mut bob, &[query]);
    assert_eq!(to_alice.len(), 1);
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, to_alice);

    assert!(bob_events.contains(&OtrEvent::GoneSecure));
    assert!(alice_events.contains(&OtrEvent::GoneSecure));
    assert_eq!(bob.ssid(), alice.ssid());
}

#[test]
fn test_commit_collision_converges() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let bob_commit = bob.start_ake().unwrap();
    let alice_commit = alice.start_ake().unwrap();

    // Cross-deliver the colliding commits.
    let (from_alice, _) = deliver(&mut alice, &bob_commit);
    let (from_bob, _) = deliver(&mut bob, &alice_commit);

    // One side re-sent its commit, the other answered with DH-Key; from
    // here the handshake completes normally.
    let (_, _) = pump(&mut bob, &mut alice, from_bob);
    let (_, _) = pump(&mut alice, &mut bob, from_alice);

    assert!(bob.is_encrypted());
    assert!(alice.is_encrypted());
    assert_eq!(bob.ssid(), alice.ssid());
}

#[test]
fn test_duplicate_dh_key_retransmits_reveal_sig() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let commit = bob.start_ake().unwrap();
    let (dh_key, _) = deliver(&mut alice, &commit);
    let (reveal_sig, _) = deliver(&mut bob, &dh_key);
    assert_eq!(reveal_sig.len(), 1);

    // The same DH-Key again: Bob must resend the identical Reveal-Signature.
    let (retransmission, _) = deliver(&mut bob, &dh_key);
    assert_eq!(retransmission, reveal_sig);
}

#[test]
fn test_flipped_reveal_sig_mac_is_rejected() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let commit = bob.start_ake().unwrap();
    let (dh_key, _) = deliver(&mut alice, &commit);
    let (reveal_sig, _) = deliver(&mut bob, &dh_key);

    // Flip one bit inside the trailing 20-byte MAC field.
    let mut binary = decode_armored(&reveal_sig[0]);
    let n = binary.len();
    binary[n - 1] ^= 0x01;
    let tampered = encode_armored(&binary);

    assert_eq!(
        alice.receive(&tampered).unwrap_err(),
        OtrError::BadSignatureMac
    );
}

#[test]
fn test_flipped_commitment_is_rejected() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let commit = bob.start_ake().unwrap();
    let (dh_key, _) = deliver(&mut alice, &commit);

    // Corrupt the revealed key r: the stored commitment then decrypts to
    // a value that no longer matches the committed hash. Payload layout:
    // header(11) | DATA(r=16) | DATA(ciphertext) | MAC.
    let (reveal_sig, _) = deliver(&mut bob, &dh_key);
    let mut binary = decode_armored(&reveal_sig[0]);
    binary[11 + 4] ^= 0x01;
    let tampered = encode_armored(&binary);

    assert_eq!(alice.receive(&tampered).unwrap_err(), OtrError::BadCommitMac);
}

#[test]
fn test_dh_key_out_of_range_rejected() {
    let mut bob = conversation(&BOB_KEY);
    let alice_tag = 0x200;

    let commit = bob.start_ake().unwrap();
    let commit_binary = decode_armored(&commit[0]);
    let bob_tag = u32::from_be_bytes([
        commit_binary[3],
        commit_binary[4],
        commit_binary[5],
        commit_binary[6],
    ]);

    // Hand-craft a DH-Key carrying gy = 1, which is not a group element.
    let mut binary = otrcore::Version::V3.message_header(0x0a, alice_tag, bob_tag);
    let mut enc = otrcore::wire::Encoder::new();
    enc.write_mpi(&BigUint::from(1u8));
    binary.extend_from_slice(&enc.into_vec());

    assert_eq!(
        bob.receive(&encode_armored(&binary)).unwrap_err(),
        OtrError::DhValueOutOfRange
    );
}

#[test]
fn test_dh_commit_while_awaiting_sig_restarts_handshake() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let commit = bob.start_ake().unwrap();
    let (dh_key, _) = deliver(&mut alice, &commit);
    deliver(&mut bob, &dh_key);

    // Bob awaits Alice's Signature, but Alice restarts with a fresh
    // DH-Commit: Bob must become responder and answer with a DH-Key.
    let new_commit = alice.start_ake().unwrap();
    let (to_alice, _) = deliver(&mut bob, &new_commit);
    assert_eq!(to_alice.len(), 1);
    let binary = decode_armored(&to_alice[0]);
    assert_eq!(binary[2], 0x0a);

    // The restarted handshake completes normally.
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, to_alice);
    assert!(bob_events.contains(&OtrEvent::GoneSecure));
    assert!(alice_events.contains(&OtrEvent::GoneSecure));
    assert_eq!(bob.ssid(), alice.ssid());
}

#[test]
fn test_unexpected_ake_message_is_ignored() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);

    let commit = bob.start_ake().unwrap();
    let (dh_key, _) = deliver(&mut alice, &commit);

    // Alice awaits Reveal-Signature; a stray DH-Key neither aborts nor
    // produces output.
    let received = alice.receive(&dh_key[0]).unwrap();
    assert!(received.to_send.is_empty());
    assert!(received.events.is_empty());

    // The handshake still completes afterwards.
    let (reveal_sig, _) = deliver(&mut bob, &dh_key);
    pump(&mut bob, &mut alice, reveal_sig);
    assert!(bob.is_encrypted() && alice.is_encrypted());
}

#[test]
fn test_end_tears_down_and_wipes() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let fresh_state = Conversation::new(Policy::default(), OsRng).serialize_state();

    let ended = bob.end().unwrap();
    assert!(!bob.is_encrypted());
    assert!(ended.events.contains(&OtrEvent::GoneInsecure));
    // The handshake context reads as empty after teardown.
    assert_eq!(bob.serialize_state(), fresh_state);

    let (_, alice_events) = deliver(&mut alice, &ended.to_send);
    assert!(alice_events.contains(&OtrEvent::GoneInsecure));
    assert!(!alice.is_encrypted());

    // Alice can no longer send until a new AKE completes.
    assert_eq!(alice.send(b"hi").unwrap_err(), OtrError::NotEncrypted);
}

#[test]
fn test_data_message_roundtrip_after_handshake() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msgs = bob.send(b"hello alice").unwrap();
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].starts_with(b"?OTR:"));

    let received = alice.receive(&msgs[0]).unwrap();
    assert_eq!(received.plaintext.as_deref(), Some(&b"hello alice"[..]));
}

#[test]
fn test_tampered_data_message_is_dropped() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msgs = bob.send(b"hello").unwrap();
    let mut binary = decode_armored(&msgs[0]);
    let n = binary.len();
    // Flip a bit inside the MAC trailer; the message must be dropped
    // silently with no plaintext surfaced.
    binary[n - 5] ^= 0x80;

    let received = alice.receive(&encode_armored(&binary)).unwrap();
    assert_eq!(received.plaintext, None);
}
