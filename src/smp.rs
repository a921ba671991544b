//! The Socialist Millionaires' Protocol state machine.
//!
//! SMP proves, in zero knowledge, that both peers hold the same
//! human-supplied secret. Four messages travel as TLV records inside
//! encrypted data messages:
//!
//! 1. Alice commits to `g2a = g^a2`, `g3a = g^a3` with proofs of
//!    knowledge of the exponents.
//! 2. Bob replies with his own commitments plus `Pb`, `Qb` binding his
//!    secret `y`.
//! 3. Alice sends `Pa`, `Qa`, and `Ra = (Qa/Qb)^a3`.
//! 4. Bob answers `Rb = (Qa/Qb)^b3`; each side checks
//!    `R^(own exponent) == Pa/Pb`, which holds exactly when `x == y`.
//!
//! Every proof hash carries a distinct prefix byte (1 through 8); blinded
//! responses are reduced modulo `q = (p - 1) / 2`. Any message that does
//! not match the expected state aborts the protocol back to `Expect1`.

use num_bigint::BigUint;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::conversation::{Conversation, MsgState, ValidMessage};
use crate::dh;
use crate::error::{OtrError, Result};
use crate::events::OtrEvent;
use crate::keys::sha256_digest;
use crate::wire::{tlv_type, Decoder, Encoder, Tlv};

/// Which SMP message the state machine expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmpState {
    /// Idle, or waiting for the peer to initiate.
    #[default]
    Expect1,
    /// We initiated and wait for the peer's message 2.
    Expect2,
    /// We answered message 1 and wait for message 3.
    Expect3,
    /// We sent message 3 and wait for message 4.
    Expect4,
}

/// Intermediates the initiator carries after sending message 1.
pub(crate) struct Smp1State {
    a2: BigUint,
    a3: BigUint,
}

/// Intermediates the responder carries after sending message 2.
pub(crate) struct Smp2State {
    g3a: BigUint,
    g2: BigUint,
    g3: BigUint,
    b3: BigUint,
    pb: BigUint,
    qb: BigUint,
}

/// Intermediates the initiator carries after sending message 3.
pub(crate) struct Smp3State {
    g3b: BigUint,
    papb: BigUint,
    qaqb: BigUint,
}

impl Drop for Smp1State {
    fn drop(&mut self) {
        self.a2.zeroize();
        self.a3.zeroize();
    }
}

impl Drop for Smp2State {
    fn drop(&mut self) {
        self.b3.zeroize();
        self.g2.zeroize();
        self.g3.zeroize();
    }
}

impl Drop for Smp3State {
    fn drop(&mut self) {
        self.papb.zeroize();
        self.qaqb.zeroize();
    }
}

/// The SMP context owned by a conversation.
#[derive(Default)]
pub(crate) struct Smp {
    pub(crate) state: SmpState,
    pub(crate) secret: Option<BigUint>,
    pub(crate) s1: Option<Smp1State>,
    pub(crate) s2: Option<Smp2State>,
    pub(crate) s3: Option<Smp3State>,
    pub(crate) pending_msg1: Option<SmpMessage1>,
}

impl Smp {
    /// Zeroizes every secret and returns to `Expect1`.
    pub(crate) fn wipe(&mut self) {
        self.state = SmpState::Expect1;
        if let Some(secret) = self.secret.as_mut() {
            secret.zeroize();
        }
        self.secret = None;
        self.s1 = None;
        self.s2 = None;
        self.s3 = None;
        self.pending_msg1 = None;
    }
}

/// SMP message 1: commitments to `a2`, `a3` with knowledge proofs.
pub(crate) struct SmpMessage1 {
    question: Option<Vec<u8>>,
    g2a: BigUint,
    c2: BigUint,
    d2: BigUint,
    g3a: BigUint,
    c3: BigUint,
    d3: BigUint,
}

struct SmpMessage2 {
    g2b: BigUint,
    c2: BigUint,
    d2: BigUint,
    g3b: BigUint,
    c3: BigUint,
    d3: BigUint,
    pb: BigUint,
    qb: BigUint,
    cp: BigUint,
    d5: BigUint,
    d6: BigUint,
}

struct SmpMessage3 {
    pa: BigUint,
    qa: BigUint,
    cp: BigUint,
    d5: BigUint,
    d6: BigUint,
    ra: BigUint,
    cr: BigUint,
    d7: BigUint,
}

struct SmpMessage4 {
    rb: BigUint,
    cr: BigUint,
    d7: BigUint,
}

impl SmpMessage1 {
    fn tlv(&self) -> Tlv {
        let mut enc = Encoder::new();
        let typ = if let Some(q) = &self.question {
            enc.write_raw(q);
            enc.write_byte(0x00);
            tlv_type::SMP1Q
        } else {
            tlv_type::SMP1
        };
        enc.write_mpi_sequence(&[&self.g2a, &self.c2, &self.d2, &self.g3a, &self.c3, &self.d3]);
        Tlv::new(typ, enc.into_vec())
    }

    fn from_tlv(tlv: &Tlv) -> Result<Self> {
        let (question, body) = if tlv.typ == tlv_type::SMP1Q {
            let nul = tlv
                .value
                .iter()
                .position(|&b| b == 0x00)
                .ok_or(OtrError::CorruptMessage("unterminated SMP question"))?;
            (Some(tlv.value[..nul].to_vec()), &tlv.value[nul + 1..])
        } else {
            (None, &tlv.value[..])
        };
        let mpis = read_mpis(body, 6)?;
        let [g2a, c2, d2, g3a, c3, d3] = into_array(mpis);
        Ok(Self {
            question,
            g2a,
            c2,
            d2,
            g3a,
            c3,
            d3,
        })
    }
}

impl SmpMessage2 {
    fn tlv(&self) -> Tlv {
        let mut enc = Encoder::new();
        enc.write_mpi_sequence(&[
            &self.g2b, &self.c2, &self.d2, &self.g3b, &self.c3, &self.d3, &self.pb, &self.qb,
            &self.cp, &self.d5, &self.d6,
        ]);
        Tlv::new(tlv_type::SMP2, enc.into_vec())
    }

    fn from_tlv(tlv: &Tlv) -> Result<Self> {
        let mpis = read_mpis(&tlv.value, 11)?;
        let [g2b, c2, d2, g3b, c3, d3, pb, qb, cp, d5, d6] = into_array(mpis);
        Ok(Self {
            g2b,
            c2,
            d2,
            g3b,
            c3,
            d3,
            pb,
            qb,
            cp,
            d5,
            d6,
        })
    }
}

impl SmpMessage3 {
    fn tlv(&self) -> Tlv {
        let mut enc = Encoder::new();
        enc.write_mpi_sequence(&[
            &self.pa, &self.qa, &self.cp, &self.d5, &self.d6, &self.ra, &self.cr, &self.d7,
        ]);
        Tlv::new(tlv_type::SMP3, enc.into_vec())
    }

    fn from_tlv(tlv: &Tlv) -> Result<Self> {
        let mpis = read_mpis(&tlv.value, 8)?;
        let [pa, qa, cp, d5, d6, ra, cr, d7] = into_array(mpis);
        Ok(Self {
            pa,
            qa,
            cp,
            d5,
            d6,
            ra,
            cr,
            d7,
        })
    }
}

impl SmpMessage4 {
    fn tlv(&self) -> Tlv {
        let mut enc = Encoder::new();
        enc.write_mpi_sequence(&[&self.rb, &self.cr, &self.d7]);
        Tlv::new(tlv_type::SMP4, enc.into_vec())
    }

    fn from_tlv(tlv: &Tlv) -> Result<Self> {
        let mpis = read_mpis(&tlv.value, 3)?;
        let [rb, cr, d7] = into_array(mpis);
        Ok(Self { rb, cr, d7 })
    }
}

fn read_mpis(body: &[u8], expected: usize) -> Result<Vec<BigUint>> {
    let mut dec = Decoder::new(body);
    let mpis = dec.read_mpi_sequence()?;
    if mpis.len() != expected || !dec.is_empty() {
        return Err(OtrError::CorruptMessage("unexpected SMP MPI count"));
    }
    Ok(mpis)
}

fn into_array<const N: usize>(mpis: Vec<BigUint>) -> [BigUint; N] {
    mpis.try_into()
        .unwrap_or_else(|_| unreachable!("count checked by read_mpis"))
}

/// Hashes MPI-encoded group elements under a domain-separating prefix.
fn hash_mpis(prefix: u8, mpis: &[&BigUint]) -> BigUint {
    let mut data = vec![prefix];
    let mut enc = Encoder::new();
    for mpi in mpis {
        enc.write_mpi(mpi);
    }
    data.extend_from_slice(&enc.into_vec());
    BigUint::from_bytes_be(&sha256_digest(&data))
}

impl Conversation {
    /// Starts SMP as initiator, optionally attaching a question shown to
    /// the peer. The conversation must be encrypted and SMP idle.
    pub fn start_smp(
        &mut self,
        question: Option<&[u8]>,
        secret: &[u8],
    ) -> Result<Vec<ValidMessage>> {
        if self.msg_state != MsgState::Encrypted {
            return Err(OtrError::NotEncrypted);
        }
        if self.smp.state != SmpState::Expect1 {
            return Err(OtrError::SmpInProgress);
        }

        let x = self.smp_secret(true, secret)?;
        let (s1, msg) = self.generate_smp1(question)?;
        self.smp.secret = Some(x);
        self.smp.s1 = Some(s1);
        self.smp.state = SmpState::Expect2;
        debug!(state = ?self.smp.state, "SMP started");

        let tlv = msg.tlv();
        self.send_tlvs(&[tlv])
    }

    /// Supplies the shared secret after the peer initiated SMP (signaled
    /// by [`OtrEvent::SmpSecretRequested`]).
    pub fn provide_smp_secret(&mut self, secret: &[u8]) -> Result<Vec<ValidMessage>> {
        if self.msg_state != MsgState::Encrypted {
            return Err(OtrError::NotEncrypted);
        }
        let msg1 = self
            .smp
            .pending_msg1
            .take()
            .ok_or(OtrError::SmpUnexpectedMessage)?;

        let y = self.smp_secret(false, secret)?;
        self.smp.secret = Some(y.clone());
        let reply = match self.respond_to_smp1(&msg1, &y) {
            Ok(tlv) => tlv,
            Err(e) => {
                warn!(error = %e, "SMP message 1 handling failed, aborting");
                self.abort_smp_state()
            }
        };
        self.send_tlvs(&[reply])
    }

    /// Aborts any SMP run in progress and tells the peer.
    pub fn abort_smp(&mut self) -> Result<Vec<ValidMessage>> {
        if self.msg_state != MsgState::Encrypted {
            return Err(OtrError::NotEncrypted);
        }
        let tlv = self.abort_smp_state();
        self.send_tlvs(&[tlv])
    }

    /// Resets the machine and produces an abort TLV.
    fn abort_smp_state(&mut self) -> Tlv {
        self.smp.wipe();
        self.events.push(OtrEvent::SmpAborted);
        Tlv::new(tlv_type::SMP_ABORT, Vec::new())
    }

    /// Dispatches one SMP TLV against the current state. Returns the
    /// reply TLV, if any.
    pub(crate) fn handle_smp_tlv(&mut self, tlv: &Tlv) -> Result<Option<Tlv>> {
        if tlv.typ == tlv_type::SMP_ABORT {
            debug!("peer aborted SMP");
            self.smp.wipe();
            self.events.push(OtrEvent::SmpAborted);
            return Ok(None);
        }

        let expected = matches!(
            (self.smp.state, tlv.typ),
            (SmpState::Expect1, tlv_type::SMP1)
                | (SmpState::Expect1, tlv_type::SMP1Q)
                | (SmpState::Expect2, tlv_type::SMP2)
                | (SmpState::Expect3, tlv_type::SMP3)
                | (SmpState::Expect4, tlv_type::SMP4)
        );
        if !expected {
            warn!(state = ?self.smp.state, typ = tlv.typ, "unexpected SMP message, aborting");
            return Ok(Some(self.abort_smp_state()));
        }

        let outcome = match tlv.typ {
            tlv_type::SMP1 | tlv_type::SMP1Q => self.receive_smp1(tlv),
            tlv_type::SMP2 => self.receive_smp2(tlv),
            tlv_type::SMP3 => self.receive_smp3(tlv),
            tlv_type::SMP4 => self.receive_smp4(tlv),
            _ => unreachable!("filtered above"),
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(error = %e, "SMP verification failed, aborting");
                Ok(Some(self.abort_smp_state()))
            }
        }
    }

    fn receive_smp1(&mut self, tlv: &Tlv) -> Result<Option<Tlv>> {
        let msg = SmpMessage1::from_tlv(tlv)?;
        verify_smp1(&msg)?;

        match self.smp.secret.clone() {
            Some(y) => {
                let reply = self.respond_to_smp1(&msg, &y)?;
                Ok(Some(reply))
            }
            None => {
                self.events.push(OtrEvent::SmpSecretRequested {
                    question: msg.question.clone(),
                });
                self.smp.pending_msg1 = Some(msg);
                Ok(None)
            }
        }
    }

    /// Generates message 2 for a verified message 1 and advances to
    /// `Expect3`.
    fn respond_to_smp1(&mut self, msg: &SmpMessage1, y: &BigUint) -> Result<Tlv> {
        let (s2, reply) = self.generate_smp2(msg, y)?;
        self.smp.s2 = Some(s2);
        self.smp.state = SmpState::Expect3;
        debug!(state = ?self.smp.state, "answered SMP message 1");
        Ok(reply.tlv())
    }

    fn receive_smp2(&mut self, tlv: &Tlv) -> Result<Option<Tlv>> {
        let msg = SmpMessage2::from_tlv(tlv)?;
        let s1 = self.smp.s1.as_ref().ok_or(OtrError::SmpUnexpectedMessage)?;
        let x = self
            .smp
            .secret
            .as_ref()
            .ok_or(OtrError::SmpUnexpectedMessage)?;

        // Reconstruct the session generators from our exponents.
        let g2 = dh::mod_exp(&msg.g2b, &s1.a2);
        let g3 = dh::mod_exp(&msg.g3b, &s1.a3);
        verify_smp2(&msg, &g2, &g3)?;

        let x = x.clone();
        let (s3, reply) = self.generate_smp3(&msg, &g2, &g3, &x)?;
        self.smp.s3 = Some(s3);
        self.smp.state = SmpState::Expect4;
        debug!(state = ?self.smp.state, "sent SMP message 3");
        Ok(Some(reply.tlv()))
    }

    fn receive_smp3(&mut self, tlv: &Tlv) -> Result<Option<Tlv>> {
        let msg = SmpMessage3::from_tlv(tlv)?;
        let s2 = self.smp.s2.take().ok_or(OtrError::SmpUnexpectedMessage)?;
        verify_smp3(&msg, &s2)?;

        // The protocol-success check: R^b3 equals Pa/Pb exactly when the
        // secrets match. A mismatch is a normal completion, not an abort.
        let rab = dh::mod_exp(&msg.ra, &s2.b3);
        let papb = dh::mul_mod(&msg.pa, &dh::mod_inv(&s2.pb));
        let matched = rab == papb;
        self.events.push(if matched {
            OtrEvent::SmpSucceeded
        } else {
            OtrEvent::SmpFailed
        });
        debug!(matched, "SMP completed on responder side");

        let qaqb = dh::mul_mod(&msg.qa, &dh::mod_inv(&s2.qb));
        let reply = self.generate_smp4(&qaqb, &s2.b3)?;
        self.smp.wipe();
        Ok(Some(reply.tlv()))
    }

    fn receive_smp4(&mut self, tlv: &Tlv) -> Result<Option<Tlv>> {
        let msg = SmpMessage4::from_tlv(tlv)?;
        let s1 = self.smp.s1.take().ok_or(OtrError::SmpUnexpectedMessage)?;
        let s3 = self.smp.s3.take().ok_or(OtrError::SmpUnexpectedMessage)?;
        verify_smp4(&msg, &s3)?;

        let rab = dh::mod_exp(&msg.rb, &s1.a3);
        let matched = rab == s3.papb;
        self.events.push(if matched {
            OtrEvent::SmpSucceeded
        } else {
            OtrEvent::SmpFailed
        });
        debug!(matched, "SMP completed on initiator side");

        self.smp.wipe();
        Ok(None)
    }

    /// Derives the SMP secret value from both fingerprints, the session
    /// id and the human-supplied secret.
    fn smp_secret(&self, initiated_by_us: bool, secret: &[u8]) -> Result<BigUint> {
        let ours = self
            .our_key
            .as_ref()
            .ok_or(OtrError::MissingKeys)?
            .public_key()
            .fingerprint();
        let theirs = self
            .their_key
            .as_ref()
            .ok_or(OtrError::MissingKeys)?
            .fingerprint();
        let (initiator, responder) = if initiated_by_us {
            (ours, theirs)
        } else {
            (theirs, ours)
        };

        let mut data = vec![0x01u8];
        data.extend_from_slice(&initiator);
        data.extend_from_slice(&responder);
        data.extend_from_slice(&self.ssid);
        data.extend_from_slice(secret);
        Ok(BigUint::from_bytes_be(&sha256_digest(&data)))
    }

    fn random_blinding(&mut self) -> Result<BigUint> {
        let len = self.version.parameter_length();
        dh::random_exponent(self.rand.as_mut(), len)
    }

    fn generate_smp1(&mut self, question: Option<&[u8]>) -> Result<(Smp1State, SmpMessage1)> {
        let a2 = self.random_blinding()?;
        let a3 = self.random_blinding()?;
        let r2 = self.random_blinding()?;
        let r3 = self.random_blinding()?;

        let g2a = dh::mod_exp_base(&a2);
        let g3a = dh::mod_exp_base(&a3);
        let c2 = hash_mpis(1, &[&dh::mod_exp_base(&r2)]);
        let d2 = dh::sub_mod_q(&r2, &(&a2 * &c2));
        let c3 = hash_mpis(2, &[&dh::mod_exp_base(&r3)]);
        let d3 = dh::sub_mod_q(&r3, &(&a3 * &c3));

        let msg = SmpMessage1 {
            question: question.map(|q| q.to_vec()),
            g2a,
            c2,
            d2,
            g3a,
            c3,
            d3,
        };
        Ok((Smp1State { a2, a3 }, msg))
    }

    fn generate_smp2(
        &mut self,
        msg1: &SmpMessage1,
        y: &BigUint,
    ) -> Result<(Smp2State, SmpMessage2)> {
        let b2 = self.random_blinding()?;
        let b3 = self.random_blinding()?;
        let r2 = self.random_blinding()?;
        let r3 = self.random_blinding()?;
        let r4 = self.random_blinding()?;
        let r5 = self.random_blinding()?;
        let r6 = self.random_blinding()?;

        let g2b = dh::mod_exp_base(&b2);
        let g3b = dh::mod_exp_base(&b3);
        let c2 = hash_mpis(3, &[&dh::mod_exp_base(&r2)]);
        let d2 = dh::sub_mod_q(&r2, &(&b2 * &c2));
        let c3 = hash_mpis(4, &[&dh::mod_exp_base(&r3)]);
        let d3 = dh::sub_mod_q(&r3, &(&b3 * &c3));

        let g2 = dh::mod_exp(&msg1.g2a, &b2);
        let g3 = dh::mod_exp(&msg1.g3a, &b3);
        let pb = dh::mod_exp(&g3, &r4);
        let qb = dh::mul_mod(&dh::mod_exp_base(&r4), &dh::mod_exp(&g2, y));
        let cp = hash_mpis(
            5,
            &[
                &dh::mod_exp(&g3, &r5),
                &dh::mul_mod(&dh::mod_exp_base(&r5), &dh::mod_exp(&g2, &r6)),
            ],
        );
        let d5 = dh::sub_mod_q(&r5, &(&r4 * &cp));
        let d6 = dh::sub_mod_q(&r6, &(y * &cp));

        let msg = SmpMessage2 {
            g2b,
            c2,
            d2,
            g3b,
            c3,
            d3,
            pb: pb.clone(),
            qb: qb.clone(),
            cp,
            d5,
            d6,
        };
        let state = Smp2State {
            g3a: msg1.g3a.clone(),
            g2,
            g3,
            b3,
            pb,
            qb,
        };
        Ok((state, msg))
    }

    fn generate_smp3(
        &mut self,
        msg2: &SmpMessage2,
        g2: &BigUint,
        g3: &BigUint,
        x: &BigUint,
    ) -> Result<(Smp3State, SmpMessage3)> {
        let r4 = self.random_blinding()?;
        let r5 = self.random_blinding()?;
        let r6 = self.random_blinding()?;
        let r7 = self.random_blinding()?;

        let pa = dh::mod_exp(g3, &r4);
        let qa = dh::mul_mod(&dh::mod_exp_base(&r4), &dh::mod_exp(g2, x));
        let cp = hash_mpis(
            6,
            &[
                &dh::mod_exp(g3, &r5),
                &dh::mul_mod(&dh::mod_exp_base(&r5), &dh::mod_exp(g2, &r6)),
            ],
        );
        let d5 = dh::sub_mod_q(&r5, &(&r4 * &cp));
        let d6 = dh::sub_mod_q(&r6, &(x * &cp));

        let qaqb = dh::mul_mod(&qa, &dh::mod_inv(&msg2.qb));
        let s1 = self.smp.s1.as_ref().ok_or(OtrError::SmpUnexpectedMessage)?;
        let ra = dh::mod_exp(&qaqb, &s1.a3);
        let cr = hash_mpis(7, &[&dh::mod_exp_base(&r7), &dh::mod_exp(&qaqb, &r7)]);
        let d7 = dh::sub_mod_q(&r7, &(&s1.a3 * &cr));

        let papb = dh::mul_mod(&pa, &dh::mod_inv(&msg2.pb));
        let msg = SmpMessage3 {
            pa,
            qa,
            cp,
            d5,
            d6,
            ra,
            cr,
            d7,
        };
        let state = Smp3State {
            g3b: msg2.g3b.clone(),
            papb,
            qaqb,
        };
        Ok((state, msg))
    }

    fn generate_smp4(&mut self, qaqb: &BigUint, b3: &BigUint) -> Result<SmpMessage4> {
        let r7 = self.random_blinding()?;
        let rb = dh::mod_exp(qaqb, b3);
        let cr = hash_mpis(8, &[&dh::mod_exp_base(&r7), &dh::mod_exp(qaqb, &r7)]);
        let d7 = dh::sub_mod_q(&r7, &(b3 * &cr));
        Ok(SmpMessage4 { rb, cr, d7 })
    }
}

fn require(cond: bool, what: &'static str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(OtrError::CorruptMessage(what))
    }
}

fn verify_smp1(msg: &SmpMessage1) -> Result<()> {
    require(dh::is_group_element(&msg.g2a), "g2a out of range")?;
    require(dh::is_group_element(&msg.g3a), "g3a out of range")?;

    let expected_c2 = hash_mpis(
        1,
        &[&dh::mul_mod(
            &dh::mod_exp_base(&msg.d2),
            &dh::mod_exp(&msg.g2a, &msg.c2),
        )],
    );
    require(expected_c2 == msg.c2, "SMP1 proof c2 failed")?;

    let expected_c3 = hash_mpis(
        2,
        &[&dh::mul_mod(
            &dh::mod_exp_base(&msg.d3),
            &dh::mod_exp(&msg.g3a, &msg.c3),
        )],
    );
    require(expected_c3 == msg.c3, "SMP1 proof c3 failed")
}

fn verify_smp2(msg: &SmpMessage2, g2: &BigUint, g3: &BigUint) -> Result<()> {
    require(dh::is_group_element(&msg.g2b), "g2b out of range")?;
    require(dh::is_group_element(&msg.g3b), "g3b out of range")?;
    require(dh::is_group_element(&msg.pb), "pb out of range")?;
    require(dh::is_group_element(&msg.qb), "qb out of range")?;

    let expected_c2 = hash_mpis(
        3,
        &[&dh::mul_mod(
            &dh::mod_exp_base(&msg.d2),
            &dh::mod_exp(&msg.g2b, &msg.c2),
        )],
    );
    require(expected_c2 == msg.c2, "SMP2 proof c2 failed")?;

    let expected_c3 = hash_mpis(
        4,
        &[&dh::mul_mod(
            &dh::mod_exp_base(&msg.d3),
            &dh::mod_exp(&msg.g3b, &msg.c3),
        )],
    );
    require(expected_c3 == msg.c3, "SMP2 proof c3 failed")?;

    let first = dh::mul_mod(&dh::mod_exp(g3, &msg.d5), &dh::mod_exp(&msg.pb, &msg.cp));
    let second = dh::mul_mod(
        &dh::mul_mod(&dh::mod_exp_base(&msg.d5), &dh::mod_exp(g2, &msg.d6)),
        &dh::mod_exp(&msg.qb, &msg.cp),
    );
    let expected_cp = hash_mpis(5, &[&first, &second]);
    require(expected_cp == msg.cp, "SMP2 proof cp failed")
}

fn verify_smp3(msg: &SmpMessage3, s2: &Smp2State) -> Result<()> {
    require(dh::is_group_element(&msg.pa), "pa out of range")?;
    require(dh::is_group_element(&msg.qa), "qa out of range")?;
    require(dh::is_group_element(&msg.ra), "ra out of range")?;

    let first = dh::mul_mod(&dh::mod_exp(&s2.g3, &msg.d5), &dh::mod_exp(&msg.pa, &msg.cp));
    let second = dh::mul_mod(
        &dh::mul_mod(&dh::mod_exp_base(&msg.d5), &dh::mod_exp(&s2.g2, &msg.d6)),
        &dh::mod_exp(&msg.qa, &msg.cp),
    );
    let expected_cp = hash_mpis(6, &[&first, &second]);
    require(expected_cp == msg.cp, "SMP3 proof cp failed")?;

    let qaqb = dh::mul_mod(&msg.qa, &dh::mod_inv(&s2.qb));
    let first = dh::mul_mod(&dh::mod_exp_base(&msg.d7), &dh::mod_exp(&s2.g3a, &msg.cr));
    let second = dh::mul_mod(&dh::mod_exp(&qaqb, &msg.d7), &dh::mod_exp(&msg.ra, &msg.cr));
    let expected_cr = hash_mpis(7, &[&first, &second]);
    require(expected_cr == msg.cr, "SMP3 proof cr failed")
}

fn verify_smp4(msg: &SmpMessage4, s3: &Smp3State) -> Result<()> {
    require(dh::is_group_element(&msg.rb), "rb out of range")?;

    let first = dh::mul_mod(&dh::mod_exp_base(&msg.d7), &dh::mod_exp(&s3.g3b, &msg.cr));
    let second = dh::mul_mod(&dh::mod_exp(&s3.qaqb, &msg.d7), &dh::mod_exp(&msg.rb, &msg.cr));
    let expected_cr = hash_mpis(8, &[&first, &second]);
    require(expected_cr == msg.cr, "SMP4 proof cr failed")
}
