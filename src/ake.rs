//! The authenticated key exchange (AKE) state machine.
//!
//! Four messages establish the channel:
//!
//! ```text
//! Bob  ---- DH-Commit --------> Alice
//! Bob  <--- DH-Key ------------ Alice
//! Bob  ---- Reveal-Signature -> Alice
//! Bob  <--- Signature --------- Alice
//! ```
//!
//! The state machine survives retransmission, reordering and commitment
//! collisions (both sides starting at once). Unexpected message types are
//! ignored without aborting; verification failures abort the handshake
//! back to [`AuthState::None`]. All comparisons over secret-derived bytes
//! are constant time.

use num_bigint::BigUint;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroize;

use crate::conversation::Conversation;
use crate::dh;
use crate::error::{OtrError, Result};
use crate::events::OtrEvent;
use crate::keys::{
    aes_ctr_zero, calculate_ake_keys, hmac_sha256, hmac_sha256_160, sha256_digest, AkeKeys,
};
use crate::version::MessageHeader;
use crate::wire::{
    DhCommit, DhKey, Encoder, RevealSig, Sig, MSG_TYPE_DH_COMMIT, MSG_TYPE_DH_KEY,
    MSG_TYPE_REVEAL_SIG, MSG_TYPE_SIG,
};
use crate::{data::KeyManagementContext, dsa};

/// Handshake phase of the AKE state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No handshake in progress.
    #[default]
    None,
    /// We sent DH-Commit and wait for the peer's DH-Key.
    AwaitingDhKey,
    /// We sent DH-Key and wait for the peer's Reveal-Signature.
    AwaitingRevealSig,
    /// We sent Reveal-Signature and wait for the peer's Signature.
    AwaitingSig,
}

/// Working state of a handshake in progress.
pub(crate) struct Ake {
    pub(crate) state: AuthState,
    pub(crate) keypair: Option<dh::KeyPair>,
    pub(crate) their_public: Option<BigUint>,
    pub(crate) r: [u8; 16],
    pub(crate) encrypted_gx: Vec<u8>,
    pub(crate) hashed_gx: [u8; 32],
    pub(crate) reveal_key: AkeKeys,
    pub(crate) sig_key: AkeKeys,
    pub(crate) our_key_id: u32,
    pub(crate) their_key_id: u32,
    pub(crate) last_reveal_sig: Option<Vec<u8>>,
}

impl Default for Ake {
    fn default() -> Self {
        Self {
            state: AuthState::None,
            keypair: None,
            their_public: None,
            r: [0u8; 16],
            encrypted_gx: Vec::new(),
            hashed_gx: [0u8; 32],
            reveal_key: AkeKeys::empty(),
            sig_key: AkeKeys::empty(),
            our_key_id: 0,
            their_key_id: 0,
            last_reveal_sig: None,
        }
    }
}

impl Ake {
    /// Zeroizes every secret and returns the machine to its initial state.
    pub(crate) fn wipe(&mut self) {
        self.state = AuthState::None;
        if let Some(kp) = self.keypair.as_mut() {
            kp.wipe();
        }
        self.keypair = None;
        if let Some(p) = self.their_public.as_mut() {
            p.zeroize();
        }
        self.their_public = None;
        self.r.zeroize();
        self.encrypted_gx.clear();
        self.hashed_gx = [0u8; 32];
        self.reveal_key.wipe();
        self.sig_key.wipe();
        self.our_key_id = 0;
        self.their_key_id = 0;
        self.last_reveal_sig = None;
    }
}

impl Conversation {
    /// Begins a handshake as initiator: generates `x` and `r` and builds
    /// the framed DH-Commit message.
    pub(crate) fn dh_commit_message(&mut self) -> Result<Vec<u8>> {
        self.ake.wipe();

        let keypair = dh::KeyPair::generate(self.rand.as_mut())?;
        let mut r = [0u8; 16];
        self.rand
            .try_fill_bytes(&mut r)
            .map_err(|_| OtrError::ShortRandomRead)?;

        let gx_mpi = mpi_of(keypair.public());
        self.ake.encrypted_gx = aes_ctr_zero(&r, &gx_mpi);
        self.ake.hashed_gx = sha256_digest(&gx_mpi);
        self.ake.r = r;
        self.ake.keypair = Some(keypair);
        self.ake.our_key_id = 0;
        self.ake.state = AuthState::AwaitingDhKey;

        debug!(state = ?self.ake.state, "sent DH-Commit");
        Ok(self.serialize_dh_commit())
    }

    fn serialize_dh_commit(&mut self) -> Vec<u8> {
        let payload = DhCommit {
            encrypted_gx: self.ake.encrypted_gx.clone(),
            hashed_gx: self.ake.hashed_gx,
        }
        .serialize();
        self.wrap_message(MSG_TYPE_DH_COMMIT, &payload)
    }

    fn serialize_dh_key(&mut self) -> Result<Vec<u8>> {
        let keypair = self.ake.keypair.as_ref().ok_or(OtrError::MissingKeys)?;
        let payload = DhKey {
            gy: keypair.public().clone(),
        }
        .serialize();
        Ok(self.wrap_message(MSG_TYPE_DH_KEY, &payload))
    }

    /// Dispatches one inbound AKE message. Returns the framed reply, if
    /// any. Unexpected `(state, type)` pairs are ignored.
    pub(crate) fn receive_ake(
        &mut self,
        header: &MessageHeader,
        payload: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        match header.msg_type {
            MSG_TYPE_DH_COMMIT => self.receive_dh_commit(payload),
            MSG_TYPE_DH_KEY => self.receive_dh_key(payload),
            MSG_TYPE_REVEAL_SIG => self.receive_reveal_sig(payload),
            MSG_TYPE_SIG => self.receive_sig(payload),
            _ => Ok(None),
        }
    }

    fn receive_dh_commit(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let msg = DhCommit::deserialize(payload)?;
        match self.ake.state {
            AuthState::None => self.respond_to_dh_commit(msg).map(Some),
            AuthState::AwaitingDhKey => {
                // Commitment collision: both sides initiated. The side
                // with the numerically greater commitment hash wins and
                // re-sends its DH-Commit; the other becomes responder.
                let ours = BigUint::from_bytes_be(&self.ake.hashed_gx);
                let theirs = BigUint::from_bytes_be(&msg.hashed_gx);
                if ours >= theirs {
                    debug!("DH-Commit collision won, re-sending ours");
                    Ok(Some(self.serialize_dh_commit()))
                } else {
                    debug!("DH-Commit collision lost, becoming responder");
                    self.respond_to_dh_commit(msg).map(Some)
                }
            }
            AuthState::AwaitingRevealSig => {
                // The peer restarted; adopt the new commitment and
                // retransmit our DH-Key.
                self.ake.encrypted_gx = msg.encrypted_gx;
                self.ake.hashed_gx = msg.hashed_gx;
                self.serialize_dh_key().map(Some)
            }
            AuthState::AwaitingSig => {
                // The peer lost our Reveal-Signature exchange and
                // restarted; become responder with a fresh DH-Key.
                self.respond_to_dh_commit(msg).map(Some)
            }
        }
    }

    fn respond_to_dh_commit(&mut self, msg: DhCommit) -> Result<Vec<u8>> {
        self.ake.wipe();
        self.ake.keypair = Some(dh::KeyPair::generate(self.rand.as_mut())?);
        self.ake.encrypted_gx = msg.encrypted_gx;
        self.ake.hashed_gx = msg.hashed_gx;
        self.ake.state = AuthState::AwaitingRevealSig;
        debug!(state = ?self.ake.state, "received DH-Commit, sent DH-Key");
        self.serialize_dh_key()
    }

    fn receive_dh_key(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let msg = DhKey::deserialize(payload)?;
        match self.ake.state {
            AuthState::AwaitingDhKey => {
                if !dh::is_group_element(&msg.gy) {
                    self.ake.wipe();
                    return Err(OtrError::DhValueOutOfRange);
                }

                let keypair = self.ake.keypair.as_ref().ok_or(OtrError::MissingKeys)?;
                let mut s = keypair.shared_secret(&msg.gy);
                let (ssid, reveal, sig) = calculate_ake_keys(&s);
                s.zeroize();
                self.ssid = ssid;
                self.ake.reveal_key = reveal;
                self.ake.sig_key = sig;
                self.ake.their_public = Some(msg.gy);
                self.ake.our_key_id += 1;

                let reveal_key = self.ake.reveal_key.clone();
                let ciphertext = self.generate_encrypted_signature(&reveal_key)?;
                let mac = mac_over_data(&reveal_key.m2, &ciphertext);
                let payload = RevealSig {
                    r: self.ake.r,
                    encrypted_sig: ciphertext,
                    mac,
                }
                .serialize();
                let framed = self.wrap_message(MSG_TYPE_REVEAL_SIG, &payload);
                self.ake.last_reveal_sig = Some(framed.clone());
                self.ake.state = AuthState::AwaitingSig;
                debug!(state = ?self.ake.state, "received DH-Key, sent Reveal-Signature");
                Ok(Some(framed))
            }
            AuthState::AwaitingSig => {
                // A duplicate of the same public value means our
                // Reveal-Signature was lost; retransmit it verbatim.
                if self.ake.their_public.as_ref() == Some(&msg.gy) {
                    debug!("duplicate DH-Key, retransmitting Reveal-Signature");
                    Ok(self.ake.last_reveal_sig.clone())
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn receive_reveal_sig(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.ake.state != AuthState::AwaitingRevealSig {
            return Ok(None);
        }
        let msg = RevealSig::deserialize(payload)?;

        let decrypted_gx = aes_ctr_zero(&msg.r, &self.ake.encrypted_gx);
        let digest = sha256_digest(&decrypted_gx);
        if !bool::from(digest.ct_eq(&self.ake.hashed_gx)) {
            self.ake.wipe();
            return Err(OtrError::BadCommitMac);
        }

        let gx = extract_gx(&decrypted_gx)?;
        if !dh::is_group_element(&gx) {
            self.ake.wipe();
            return Err(OtrError::DhValueOutOfRange);
        }

        let keypair = self.ake.keypair.as_ref().ok_or(OtrError::MissingKeys)?;
        let mut s = keypair.shared_secret(&gx);
        let (ssid, reveal, sig) = calculate_ake_keys(&s);
        s.zeroize();
        self.ssid = ssid;
        self.ake.reveal_key = reveal;
        self.ake.sig_key = sig;
        self.ake.their_public = Some(gx);

        let reveal_key = self.ake.reveal_key.clone();
        if let Err(e) = self.process_encrypted_sig(&msg.encrypted_sig, &msg.mac, &reveal_key) {
            self.ake.wipe();
            return Err(e);
        }

        self.ake.our_key_id += 1;
        let sig_key = self.ake.sig_key.clone();
        let ciphertext = self.generate_encrypted_signature(&sig_key)?;
        let mac = mac_over_data(&sig_key.m2, &ciphertext);
        let payload = Sig {
            encrypted_sig: ciphertext,
            mac,
        }
        .serialize();
        let framed = self.wrap_message(MSG_TYPE_SIG, &payload);

        debug!("received Reveal-Signature, handshake complete");
        self.ake_completed();
        Ok(Some(framed))
    }

    fn receive_sig(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.ake.state != AuthState::AwaitingSig {
            return Ok(None);
        }
        let msg = Sig::deserialize(payload)?;

        let sig_key = self.ake.sig_key.clone();
        if let Err(e) = self.process_encrypted_sig(&msg.encrypted_sig, &msg.mac, &sig_key) {
            self.ake.wipe();
            return Err(e);
        }

        debug!("received Signature, handshake complete");
        self.ake_completed();
        Ok(None)
    }

    /// Builds the AES-CTR ciphertext of our signature block under `key`:
    /// `X = pubkey || keyID || DSA(mb)`, where `mb` authenticates both DH
    /// public values, our long-term key and the key id.
    fn generate_encrypted_signature(&mut self, key: &AkeKeys) -> Result<Vec<u8>> {
        let our_key = self.our_key.as_ref().ok_or(OtrError::MissingKeys)?;
        let keypair = self.ake.keypair.as_ref().ok_or(OtrError::MissingKeys)?;
        let their_public = self.ake.their_public.as_ref().ok_or(OtrError::MissingKeys)?;

        let pub_bytes = our_key.public_key().serialize();
        let mut enc = Encoder::new();
        enc.write_mpi(keypair.public());
        enc.write_mpi(their_public);
        enc.write_raw(&pub_bytes);
        enc.write_word(self.ake.our_key_id);
        let mb = hmac_sha256(&key.m1, &enc.into_vec());

        let mut block = Encoder::new();
        block.write_raw(&pub_bytes);
        block.write_word(self.ake.our_key_id);
        let signature = our_key.sign(&mb)?;
        block.write_raw(&signature);

        Ok(aes_ctr_zero(&key.c, &block.into_vec()))
    }

    /// Verifies and absorbs the peer's encrypted signature block: MAC
    /// check, decryption, public-key recovery and DSA verification.
    fn process_encrypted_sig(
        &mut self,
        encrypted_sig: &[u8],
        their_mac: &[u8; 20],
        key: &AkeKeys,
    ) -> Result<()> {
        let my_mac = mac_over_data(&key.m2, encrypted_sig);
        if !bool::from(my_mac.ct_eq(their_mac)) {
            return Err(OtrError::BadSignatureMac);
        }

        let decrypted = aes_ctr_zero(&key.c, encrypted_sig);
        let mut dec = crate::wire::Decoder::new(&decrypted);
        let their_dsa = dsa::PublicKey::parse(&mut dec)?;
        let key_id = dec.read_word()?;
        if dec.remaining() < dsa::SIGNATURE_BYTES {
            return Err(OtrError::CorruptMessage("signature block too short"));
        }

        let their_public = self.ake.their_public.as_ref().ok_or(OtrError::MissingKeys)?;
        let keypair = self.ake.keypair.as_ref().ok_or(OtrError::MissingKeys)?;
        let mut enc = Encoder::new();
        enc.write_mpi(their_public);
        enc.write_mpi(keypair.public());
        enc.write_raw(&their_dsa.serialize());
        enc.write_word(key_id);
        let mb = hmac_sha256(&key.m1, &enc.into_vec());

        let sig_bytes = dec.take_rest();
        if sig_bytes.len() != dsa::SIGNATURE_BYTES {
            // The signature is fixed-width; trailing bytes are rejected.
            return Err(OtrError::BadSignature);
        }
        let signature: [u8; dsa::SIGNATURE_BYTES] =
            sig_bytes.try_into().expect("length checked above");
        their_dsa.verify(&mb, &signature)?;

        self.their_key = Some(their_dsa);
        self.ake.their_key_id = key_id;
        Ok(())
    }

    /// Hands the negotiated material to the data layer and zeroizes the
    /// handshake state.
    fn ake_completed(&mut self) {
        let keypair = self.ake.keypair.take().expect("completed AKE has a keypair");
        let their_public = self
            .ake
            .their_public
            .take()
            .expect("completed AKE has the peer public value");

        self.keys = Some(KeyManagementContext::new(
            self.ake.our_key_id,
            self.ake.their_key_id,
            keypair,
            their_public,
        ));
        self.msg_state = crate::conversation::MsgState::Encrypted;
        self.events.push(OtrEvent::GoneSecure);
        self.ake.wipe();
    }
}

/// The 20-byte MAC over the DATA encoding of the encrypted signature.
fn mac_over_data(m2: &[u8; 32], ciphertext: &[u8]) -> [u8; 20] {
    let mut enc = Encoder::new();
    enc.write_data(ciphertext);
    hmac_sha256_160(m2, &enc.into_vec())
}

fn mpi_of(n: &BigUint) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_mpi(n);
    enc.into_vec()
}

/// Recovers `g^x` from the decrypted commitment. Trailing bytes mean the
/// peer lied about the payload.
fn extract_gx(decrypted: &[u8]) -> Result<BigUint> {
    let mut dec = crate::wire::Decoder::new(decrypted);
    let gx = dec.read_mpi()?;
    if !dec.is_empty() {
        return Err(OtrError::CorruptMessage("gx corrupt after decryption"));
    }
    Ok(gx)
}
