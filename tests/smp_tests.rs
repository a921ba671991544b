//! End-to-end tests for the Socialist Millionaires' Protocol, running
//! over real encrypted data messages.

mod common;

use common::{conversation, deliver, establish, pump, ALICE_KEY, BOB_KEY};
use otrcore::{OtrError, OtrEvent};

#[test]
fn test_smp_succeeds_with_matching_secrets() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msg1 = alice.start_smp(None, b"our shared secret").unwrap();
    let (none_yet, bob_events) = deliver(&mut bob, &msg1);
    assert!(none_yet.is_empty());
    assert_eq!(
        bob_events,
        vec![OtrEvent::SmpSecretRequested { question: None }]
    );

    let msg2 = bob.provide_smp_secret(b"our shared secret").unwrap();
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, msg2);

    assert!(alice_events.contains(&OtrEvent::SmpSucceeded));
    assert!(bob_events.contains(&OtrEvent::SmpSucceeded));
}

#[test]
fn test_smp_fails_with_differing_secrets() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msg1 = alice.start_smp(None, b"alice's secret").unwrap();
    deliver(&mut bob, &msg1);
    let msg2 = bob.provide_smp_secret(b"bob's secret").unwrap();
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, msg2);

    assert!(alice_events.contains(&OtrEvent::SmpFailed));
    assert!(bob_events.contains(&OtrEvent::SmpFailed));
    assert!(!alice_events.contains(&OtrEvent::SmpSucceeded));
    assert!(!bob_events.contains(&OtrEvent::SmpSucceeded));
}

#[test]
fn test_smp_question_reaches_peer() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msg1 = alice
        .start_smp(Some(b"favorite color?"), b"blue")
        .unwrap();
    let (_, bob_events) = deliver(&mut bob, &msg1);
    assert_eq!(
        bob_events,
        vec![OtrEvent::SmpSecretRequested {
            question: Some(b"favorite color?".to_vec())
        }]
    );

    let msg2 = bob.provide_smp_secret(b"blue").unwrap();
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, msg2);
    assert!(alice_events.contains(&OtrEvent::SmpSucceeded));
    assert!(bob_events.contains(&OtrEvent::SmpSucceeded));
}

#[test]
fn test_smp_abort_resets_peer() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    let msg1 = alice.start_smp(None, b"secret").unwrap();
    deliver(&mut bob, &msg1);

    // Alice changes her mind; Bob learns about the abort.
    let abort = alice.abort_smp().unwrap();
    let (_, bob_events) = deliver(&mut bob, &abort);
    assert!(bob_events.contains(&OtrEvent::SmpAborted));

    // A fresh run afterwards still succeeds.
    let msg1 = alice.start_smp(None, b"secret").unwrap();
    deliver(&mut bob, &msg1);
    let msg2 = bob.provide_smp_secret(b"secret").unwrap();
    let (bob_events, alice_events) = pump(&mut bob, &mut alice, msg2);
    assert!(alice_events.contains(&OtrEvent::SmpSucceeded));
    assert!(bob_events.contains(&OtrEvent::SmpSucceeded));
}

#[test]
fn test_smp_requires_encrypted_channel() {
    let mut alice = conversation(&ALICE_KEY);
    assert_eq!(
        alice.start_smp(None, b"secret").unwrap_err(),
        OtrError::NotEncrypted
    );
}

#[test]
fn test_smp_cannot_start_twice() {
    let mut bob = conversation(&BOB_KEY);
    let mut alice = conversation(&ALICE_KEY);
    establish(&mut bob, &mut alice);

    alice.start_smp(None, b"secret").unwrap();
    assert_eq!(
        alice.start_smp(None, b"secret").unwrap_err(),
        OtrError::SmpInProgress
    );
}
