/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! The CASE session state machine.
//!
//! A `CaseSession` drives one handshake, as initiator (`establish`) or as
//! responder (`listen` + inbound Sigma1). Inbound traffic and timer
//! expiry are delivered through `on_message`/`on_timeout`; collaborators
//! (the fabric table, the resumption store, the exchange, the delegate)
//! are passed per call so the context owns no references.
//!
//! The context is not reentrant; hosts must serialize calls externally.
//! Every terminal transition clears the stored exchange handle before
//! the context can be dropped, and failure paths zeroize the ephemeral
//! secret material.

use core::num::NonZeroU8;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error, info};

use crate::cert::ValidationContext;
use crate::crypto::{self, KeyPair, Rand, Sha256};
use crate::error::{Error, ErrorCode};
use crate::fabric::{FabricTable, IPK_LEN_BYTES};
use crate::transport::{Address, Exchange, ExchangeId, MessageMeta};
use crate::tlv::{TLVWriter, TagType};
use crate::utils::parsebuf::ParseBuf;
use crate::utils::writebuf::WriteBuf;

use super::common::{complete_with_status, OpCode, SCStatusCodes, PROTO_ID_SECURE_CHANNEL};
use super::resumption::{ResumptionRecord, ResumptionStore};

pub mod casep;
pub mod msgs;

pub use casep::{CASE_RANDOM_LEN, CASE_RESUMPTION_ID_LEN, CASE_SESSION_KEYS_LEN};

/// Wait at most 10 seconds for the response from the peer. The exchange
/// substrate arms this deadline on every outbound message sent with
/// `expects_response`; expiry is delivered via `on_timeout`.
pub const SIGMA_RESPONSE_TIMEOUT_MS: u32 = 10_000;

const SESSION_VERSION: u8 = 1;

const MAX_ENCRYPTED_SIZE: usize = 800;
const MAX_SIGMA_MSG_SIZE: usize = 1024;

const SERIALIZED_RAW_LEN: usize = 1
    + 2
    + 2
    + 8
    + 2
    + crypto::ECDH_SHARED_SECRET_LEN_BYTES
    + 2
    + crypto::SHA256_HASH_LEN_BYTES
    + CASE_RESUMPTION_ID_LEN
    + IPK_LEN_BYTES;

/// The size of the base64 wrapper around a serialized session
pub const SERIALIZED_LEN: usize = (SERIALIZED_RAW_LEN + 2) / 3 * 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Idle,
    Sent1,
    Sent2,
    Sent2Resume,
    Sent3,
    Established,
    Failed,
}

/// The channel keys handed to the consumer after establishment
#[derive(Debug)]
pub struct SessionKeys {
    pub enc_key: [u8; crypto::SYMM_KEY_LEN_BYTES],
    pub dec_key: [u8; crypto::SYMM_KEY_LEN_BYTES],
    pub att_challenge: [u8; crypto::SYMM_KEY_LEN_BYTES],
}

/// Establishment progress callbacks. Exactly one terminal callback is
/// delivered per session; a failed context must not be reused.
pub trait SessionEstablishmentDelegate {
    fn on_session_establishment_started(&mut self) {}
    fn on_session_established(&mut self) {}
    fn on_session_establishment_error(&mut self, _error: Error) {}
}

#[derive(Debug)]
pub struct CaseSession {
    role: Role,
    state: State,
    local_sessid: u16,
    peer_sessid: u16,
    peer_nodeid: u64,
    peer_addr: Address,
    fabric_idx: Option<NonZeroU8>,
    ephemeral_key: Option<KeyPair>,
    our_pub_key: [u8; crypto::EC_POINT_LEN_BYTES],
    peer_pub_key: [u8; crypto::EC_POINT_LEN_BYTES],
    shared_secret: [u8; crypto::ECDH_SHARED_SECRET_LEN_BYTES],
    initiator_random: [u8; CASE_RANDOM_LEN],
    tt_hash: Option<Sha256>,
    resumption_id: [u8; CASE_RESUMPTION_ID_LEN],
    prev_resumption_id: Option<[u8; CASE_RESUMPTION_ID_LEN]>,
    ipk: [u8; IPK_LEN_BYTES],
    message_digest: [u8; crypto::SHA256_HASH_LEN_BYTES],
    exchange: Option<ExchangeId>,
    rand: Rand,
}

impl CaseSession {
    pub fn new(rand: Rand) -> Self {
        Self {
            role: Role::Initiator,
            state: State::Idle,
            local_sessid: 0,
            peer_sessid: 0,
            peer_nodeid: 0,
            peer_addr: Address::unspecified(),
            fabric_idx: None,
            ephemeral_key: None,
            our_pub_key: [0; crypto::EC_POINT_LEN_BYTES],
            peer_pub_key: [0; crypto::EC_POINT_LEN_BYTES],
            shared_secret: [0; crypto::ECDH_SHARED_SECRET_LEN_BYTES],
            initiator_random: [0; CASE_RANDOM_LEN],
            tt_hash: None,
            resumption_id: [0; CASE_RESUMPTION_ID_LEN],
            prev_resumption_id: None,
            ipk: [0; IPK_LEN_BYTES],
            message_digest: [0; crypto::SHA256_HASH_LEN_BYTES],
            exchange: None,
            rand,
        }
    }

    /// Arm this context as the responder-side handler for an inbound
    /// Sigma1. The chosen local session id must be nonzero.
    pub fn listen(&mut self, local_sessid: u16) -> Result<(), Error> {
        if local_sessid == 0 {
            Err(ErrorCode::InvalidArgument)?;
        }
        if self.state != State::Idle {
            Err(ErrorCode::IncorrectState)?;
        }

        self.role = Role::Responder;
        self.local_sessid = local_sessid;

        debug!("Waiting for Sigma1 msg");

        Ok(())
    }

    /// Start the initiator path: send Sigma1 over the given exchange and
    /// wait for Sigma2 or Sigma2Resume.
    ///
    /// When a matching resumption record from a prior establishment is
    /// passed, Sigma1 additionally carries the resumption id and MIC and
    /// the responder may shortcut certificate verification entirely.
    #[allow(clippy::too_many_arguments)]
    pub fn establish(
        &mut self,
        fabrics: &FabricTable,
        fabric_idx: NonZeroU8,
        peer_addr: Address,
        peer_nodeid: u64,
        local_sessid: u16,
        resumption: Option<&ResumptionRecord>,
        exchange: &mut dyn Exchange,
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) -> Result<(), Error> {
        if local_sessid == 0 {
            Err(ErrorCode::InvalidArgument)?;
        }
        if self.state != State::Idle {
            Err(ErrorCode::IncorrectState)?;
        }
        let fabric = fabrics.get(fabric_idx).ok_or(ErrorCode::InvalidArgument)?;

        self.role = Role::Initiator;
        self.fabric_idx = Some(fabric_idx);
        self.local_sessid = local_sessid;
        self.peer_nodeid = peer_nodeid;
        self.peer_addr = peer_addr;
        self.ipk = *fabric.ipk();

        (self.rand)(&mut self.initiator_random);

        // Create an ephemeral Key Pair
        let key_pair = KeyPair::new(self.rand)?;
        key_pair.get_public_key(&mut self.our_pub_key)?;
        self.ephemeral_key = Some(key_pair);

        self.tt_hash = Some(Sha256::new()?);

        let resuming = if let Some(record) = resumption {
            if record.fabric_idx != fabric_idx || record.peer_nodeid != peer_nodeid {
                Err(ErrorCode::InvalidArgument)?;
            }

            // Preload the prior session's material; if the responder does
            // not honor the resumption we fall back to the full handshake
            // and all of this is overwritten
            self.shared_secret = record.shared_secret;
            self.message_digest = record.message_digest;
            self.resumption_id = record.resumption_id;
            self.prev_resumption_id = Some(record.resumption_id);
            true
        } else {
            false
        };

        let mut buf = [0; MAX_SIGMA_MSG_SIZE];
        let len = {
            let mut wb = WriteBuf::new(&mut buf);
            let mut tw = TLVWriter::new(&mut wb);

            tw.start_struct(TagType::Anonymous)?;
            tw.str8(TagType::Context(1), &self.initiator_random)?;
            tw.u16(TagType::Context(2), local_sessid)?;

            let mut dest_id = [0; crypto::SHA256_HASH_LEN_BYTES];
            fabric.generate_dest_id(&self.initiator_random, peer_nodeid, &mut dest_id)?;
            tw.str8(TagType::Context(3), &dest_id)?;

            tw.str8(TagType::Context(4), &self.our_pub_key)?;

            if resuming {
                tw.str8(TagType::Context(6), &self.resumption_id)?;

                let mut mic = [0; crypto::AEAD_MIC_LEN_BYTES];
                casep::generate_resume_mic(
                    &self.shared_secret,
                    &self.initiator_random,
                    &self.resumption_id,
                    &casep::SIGMA1_RESUME_INFO,
                    &casep::RESUME1_MIC_NONCE,
                    &mut mic,
                )?;
                tw.str8(TagType::Context(7), &mic)?;
            }
            tw.end_container()?;

            wb.get_tail()
        };

        self.update_tt(&buf[..len])?;
        self.exchange = Some(exchange.id());
        self.state = State::Sent1;

        if let Err(err) = exchange.send_message(OpCode::CASESigma1.into(), &buf[..len], true) {
            self.state = State::Failed;
            self.exchange = None;
            self.zeroize_secrets();
            return Err(err);
        }

        debug!("Sent Sigma1 msg");

        delegate.on_session_establishment_started();

        Ok(())
    }

    /// The inbound message dispatch: routes a (state, opcode) pair to its
    /// handler per the legal-transition table; anything else aborts the
    /// session with `InvalidMessageType`.
    pub fn on_message<const N: usize>(
        &mut self,
        fabrics: &FabricTable,
        store: &mut ResumptionStore<N>,
        exchange: &mut dyn Exchange,
        meta: &MessageMeta,
        payload: &[u8],
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) -> Result<(), Error> {
        // A terminal context never processes further traffic
        if matches!(self.state, State::Established | State::Failed) {
            Err(ErrorCode::IncorrectState)?;
        }

        // The first message of a responder-side handshake binds the
        // exchange; afterwards all traffic must arrive on it
        match self.exchange {
            Some(id) if id != exchange.id() => Err(ErrorCode::InvalidArgument)?,
            Some(_) => (),
            None => self.exchange = Some(exchange.id()),
        }

        let opcode = (meta.proto_id == PROTO_ID_SECURE_CHANNEL)
            .then(|| meta.opcode::<OpCode>())
            .flatten();

        let result = match (self.state, self.role, opcode) {
            (State::Idle, Role::Responder, Some(OpCode::CASESigma1)) => {
                self.handle_sigma1(fabrics, store, exchange, payload, delegate)
            }
            (State::Sent1, _, Some(OpCode::CASESigma2)) => {
                self.handle_sigma2_and_send_sigma3(fabrics, exchange, payload)
            }
            (State::Sent1, _, Some(OpCode::CASESigma2Resume)) => {
                self.handle_sigma2_resume(exchange, payload)
            }
            (State::Sent2, _, Some(OpCode::CASESigma3)) => {
                self.handle_sigma3(fabrics, exchange, payload)
            }
            (State::Sent1 | State::Sent2, _, Some(OpCode::StatusReport)) => {
                self.handle_status_report(payload, false)
            }
            (State::Sent3 | State::Sent2Resume, _, Some(OpCode::StatusReport)) => {
                self.handle_status_report(payload, true)
            }
            _ => {
                error!(
                    "Message type {} cannot be handled in state {:?}",
                    meta.proto_opcode, self.state
                );
                Err(ErrorCode::InvalidMessageType.into())
            }
        };

        match result {
            Ok(established) => {
                if established {
                    self.establish_complete(store, exchange, delegate);
                }
                Ok(())
            }
            Err(err) => {
                // Local faults are reported to the peer; peer-reported
                // failures and illegal message types are not echoed back
                let send_report = !matches!(err.code(), ErrorCode::InvalidMessageType)
                    && opcode != Some(OpCode::StatusReport);

                Err(self.fail_with(exchange, delegate, err, send_report, true))
            }
        }
    }

    /// Response-deadline expiry, delivered by the exchange substrate. The
    /// dying exchange is not closed here; the substrate owns it.
    pub fn on_timeout(
        &mut self,
        exchange: &mut dyn Exchange,
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) -> Result<(), Error> {
        if self.exchange != Some(exchange.id()) {
            error!("on_timeout exchange doesn't match");
            Err(ErrorCode::InvalidArgument)?;
        }

        error!(
            "Timed out while waiting for a response from the peer. Current state was {:?}",
            self.state
        );

        let _ = self.fail_with(exchange, delegate, ErrorCode::Timeout.into(), false, false);

        Ok(())
    }

    fn handle_sigma1<const N: usize>(
        &mut self,
        fabrics: &FabricTable,
        store: &mut ResumptionStore<N>,
        exchange: &mut dyn Exchange,
        payload: &[u8],
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) -> Result<bool, Error> {
        debug!("Received Sigma1 msg");

        self.tt_hash = Some(Sha256::new()?);
        self.update_tt(payload)?;

        let r = msgs::Sigma1::decode(payload)?;

        debug!("Peer assigned session ID {}", r.initiator_sessid);
        self.peer_sessid = r.initiator_sessid;
        self.initiator_random.copy_from_slice(r.initiator_random);

        if let (Some(resumption_id), Some(mic)) = (r.resumption_id, r.resume1_mic) {
            if let Some(record) = store.get(resumption_id) {
                if casep::validate_resume_mic(
                    &record.shared_secret,
                    r.initiator_random,
                    resumption_id,
                    &casep::SIGMA1_RESUME_INFO,
                    &casep::RESUME1_MIC_NONCE,
                    mic,
                )
                .is_ok()
                {
                    let record = record.clone();
                    return self.send_sigma2_resume(fabrics, exchange, &record, delegate);
                }
            }

            // A resumption attempt we cannot honor falls through to the
            // full handshake; the initiator finds out via Sigma2
            debug!("Sigma1 resumption attempt not honored");
        }

        let Some(fabric_idx) = fabrics.find_destination_id_candidate(r.dest_id, r.initiator_random)
        else {
            error!("No fabric matches the Sigma1 destination id");
            return Err(ErrorCode::KeyNotFound.into());
        };
        let fabric = fabrics.get(fabric_idx).ok_or(ErrorCode::IncorrectState)?;

        debug!("Destination ID matched to fabric index {}", fabric_idx);
        self.fabric_idx = Some(fabric_idx);
        self.ipk = *fabric.ipk();
        self.peer_pub_key.copy_from_slice(r.initiator_eph_pub_key);

        // Create an ephemeral Key Pair and derive the shared secret
        let key_pair = KeyPair::new(self.rand)?;
        key_pair.get_public_key(&mut self.our_pub_key)?;
        let len = key_pair.derive_secret(r.initiator_eph_pub_key, &mut self.shared_secret)?;
        if len != crypto::ECDH_SHARED_SECRET_LEN_BYTES {
            error!("Derived secret length incorrect");
            Err(ErrorCode::Crypto)?;
        }
        self.ephemeral_key = Some(key_pair);

        let mut responder_random = [0; CASE_RANDOM_LEN];
        (self.rand)(&mut responder_random);

        // A fresh resumption id rides inside the encrypted section
        (self.rand)(&mut self.resumption_id);

        let mut signature = [0; crypto::EC_SIGNATURE_LEN_BYTES];
        casep::sign_tbs(fabric, &self.our_pub_key, &self.peer_pub_key, &mut signature)?;

        let mut tt_hash = [0; crypto::SHA256_HASH_LEN_BYTES];
        self.current_tt_hash(&mut tt_hash)?;

        let mut sigma2_key = [0; crypto::SYMM_KEY_LEN_BYTES];
        casep::compute_sigma2_key(
            &self.ipk,
            &responder_random,
            &self.our_pub_key,
            &tt_hash,
            &self.shared_secret,
            &mut sigma2_key,
        )?;

        let mut encrypted = [0; MAX_ENCRYPTED_SIZE];
        let icac = (!fabric.icac().is_empty()).then(|| fabric.icac());
        let encrypted_len = casep::encrypt_tbe(
            &sigma2_key,
            &casep::TBE2_NONCE,
            fabric.noc(),
            icac,
            &signature,
            Some(&self.resumption_id),
            &mut encrypted,
        )?;

        let mut buf = [0; MAX_SIGMA_MSG_SIZE];
        let len = {
            let mut wb = WriteBuf::new(&mut buf);
            let mut tw = TLVWriter::new(&mut wb);

            tw.start_struct(TagType::Anonymous)?;
            tw.str8(TagType::Context(1), &responder_random)?;
            tw.u16(TagType::Context(2), self.local_sessid)?;
            tw.str8(TagType::Context(3), &self.our_pub_key)?;
            tw.str16(TagType::Context(4), &encrypted[..encrypted_len])?;
            tw.end_container()?;

            wb.get_tail()
        };

        self.update_tt(&buf[..len])?;
        self.state = State::Sent2;
        exchange.send_message(OpCode::CASESigma2.into(), &buf[..len], true)?;

        debug!("Sent Sigma2 msg");

        delegate.on_session_establishment_started();

        Ok(false)
    }

    fn send_sigma2_resume(
        &mut self,
        fabrics: &FabricTable,
        exchange: &mut dyn Exchange,
        record: &ResumptionRecord,
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) -> Result<bool, Error> {
        let fabric = fabrics
            .get(record.fabric_idx)
            .ok_or(ErrorCode::IncorrectState)?;

        // Shortcut: adopt the prior session's material; no certificates
        // change hands on this path
        self.fabric_idx = Some(record.fabric_idx);
        self.ipk = *fabric.ipk();
        self.shared_secret = record.shared_secret;
        self.message_digest = record.message_digest;
        self.peer_nodeid = record.peer_nodeid;
        self.prev_resumption_id = Some(record.resumption_id);

        // Generate a new resumption ID
        (self.rand)(&mut self.resumption_id);

        let mut mic = [0; crypto::AEAD_MIC_LEN_BYTES];
        casep::generate_resume_mic(
            &self.shared_secret,
            &self.initiator_random,
            &self.resumption_id,
            &casep::SIGMA2_RESUME_INFO,
            &casep::RESUME2_MIC_NONCE,
            &mut mic,
        )?;

        let mut buf = [0; MAX_SIGMA_MSG_SIZE];
        let len = {
            let mut wb = WriteBuf::new(&mut buf);
            let mut tw = TLVWriter::new(&mut wb);

            tw.start_struct(TagType::Anonymous)?;
            tw.str8(TagType::Context(1), &self.resumption_id)?;
            tw.str8(TagType::Context(2), &mic)?;
            tw.u16(TagType::Context(3), self.local_sessid)?;
            tw.end_container()?;

            wb.get_tail()
        };

        // Sigma2Resume is not mixed into the transcript hash
        self.state = State::Sent2Resume;
        exchange.send_message(OpCode::CASESigma2Resume.into(), &buf[..len], true)?;

        debug!("Sent Sigma2Resume msg");

        delegate.on_session_establishment_started();

        Ok(false)
    }

    fn handle_sigma2_and_send_sigma3(
        &mut self,
        fabrics: &FabricTable,
        exchange: &mut dyn Exchange,
        payload: &[u8],
    ) -> Result<bool, Error> {
        debug!("Received Sigma2 msg");

        let r = msgs::Sigma2::decode(payload)?;

        debug!("Peer assigned session ID {}", r.responder_sessid);
        self.peer_sessid = r.responder_sessid;
        self.peer_pub_key.copy_from_slice(r.responder_eph_pub_key);

        let ephemeral = self.ephemeral_key.as_ref().ok_or(ErrorCode::IncorrectState)?;
        let len = ephemeral.derive_secret(r.responder_eph_pub_key, &mut self.shared_secret)?;
        if len != crypto::ECDH_SHARED_SECRET_LEN_BYTES {
            error!("Derived secret length incorrect");
            Err(ErrorCode::Crypto)?;
        }

        // The Sigma2 key binds the transcript hash over Sigma1 only;
        // Sigma2 itself is absorbed right after
        let mut tt_hash = [0; crypto::SHA256_HASH_LEN_BYTES];
        self.current_tt_hash(&mut tt_hash)?;

        let mut sigma2_key = [0; crypto::SYMM_KEY_LEN_BYTES];
        casep::compute_sigma2_key(
            &self.ipk,
            r.responder_random,
            r.responder_eph_pub_key,
            &tt_hash,
            &self.shared_secret,
            &mut sigma2_key,
        )?;

        self.update_tt(payload)?;

        let mut decrypted = [0; MAX_ENCRYPTED_SIZE];
        if r.encrypted2.len() > decrypted.len() {
            error!("Data too large");
            Err(ErrorCode::NoSpace)?;
        }
        let decrypted = &mut decrypted[..r.encrypted2.len()];
        decrypted.copy_from_slice(r.encrypted2);

        let plain_len =
            crypto::decrypt_in_place(&sigma2_key, &casep::TBE2_NONCE, &[], decrypted)?;
        let tbe = msgs::TbeData::decode(&decrypted[..plain_len], true)?;

        let fabric = fabrics
            .get(self.fabric_idx.ok_or(ErrorCode::IncorrectState)?)
            .ok_or(ErrorCode::IncorrectState)?;

        let (peer_nodeid, _fabric_id, peer_credential) =
            fabric.verify_credentials(tbe.noc, tbe.icac, &ValidationContext::new())?;

        casep::verify_tbs(
            &peer_credential,
            tbe.noc,
            tbe.icac,
            &self.peer_pub_key,
            &self.our_pub_key,
            tbe.signature,
        )?;

        self.peer_nodeid = peer_nodeid;
        if let Some(resumption_id) = tbe.resumption_id {
            self.resumption_id.copy_from_slice(resumption_id);
        }

        self.send_sigma3(fabrics, exchange)
    }

    fn send_sigma3(
        &mut self,
        fabrics: &FabricTable,
        exchange: &mut dyn Exchange,
    ) -> Result<bool, Error> {
        let fabric = fabrics
            .get(self.fabric_idx.ok_or(ErrorCode::IncorrectState)?)
            .ok_or(ErrorCode::IncorrectState)?;

        let mut signature = [0; crypto::EC_SIGNATURE_LEN_BYTES];
        casep::sign_tbs(fabric, &self.our_pub_key, &self.peer_pub_key, &mut signature)?;

        let mut tt_hash = [0; crypto::SHA256_HASH_LEN_BYTES];
        self.current_tt_hash(&mut tt_hash)?;

        let mut sigma3_key = [0; crypto::SYMM_KEY_LEN_BYTES];
        casep::compute_sigma3_key(&self.ipk, &tt_hash, &self.shared_secret, &mut sigma3_key)?;

        let mut encrypted = [0; MAX_ENCRYPTED_SIZE];
        let icac = (!fabric.icac().is_empty()).then(|| fabric.icac());
        let encrypted_len = casep::encrypt_tbe(
            &sigma3_key,
            &casep::TBE3_NONCE,
            fabric.noc(),
            icac,
            &signature,
            None,
            &mut encrypted,
        )?;

        let mut buf = [0; MAX_SIGMA_MSG_SIZE];
        let len = {
            let mut wb = WriteBuf::new(&mut buf);
            let mut tw = TLVWriter::new(&mut wb);

            tw.start_struct(TagType::Anonymous)?;
            tw.str16(TagType::Context(1), &encrypted[..encrypted_len])?;
            tw.end_container()?;

            wb.get_tail()
        };

        self.update_tt(&buf[..len])?;
        self.finalize_tt()?;
        self.state = State::Sent3;
        exchange.send_message(OpCode::CASESigma3.into(), &buf[..len], true)?;

        debug!("Sent Sigma3 msg");

        Ok(false)
    }

    fn handle_sigma2_resume(
        &mut self,
        exchange: &mut dyn Exchange,
        payload: &[u8],
    ) -> Result<bool, Error> {
        debug!("Received Sigma2Resume msg");

        let r = msgs::Sigma2Resume::decode(payload)?;

        casep::validate_resume_mic(
            &self.shared_secret,
            &self.initiator_random,
            r.resumption_id,
            &casep::SIGMA2_RESUME_INFO,
            &casep::RESUME2_MIC_NONCE,
            r.sigma2_resume_mic,
        )?;

        debug!("Peer assigned session ID {}", r.responder_sessid);
        self.peer_sessid = r.responder_sessid;
        self.resumption_id.copy_from_slice(r.resumption_id);

        complete_with_status(exchange, SCStatusCodes::SessionEstablishmentSuccess, &[])?;

        Ok(true)
    }

    fn handle_sigma3(
        &mut self,
        fabrics: &FabricTable,
        exchange: &mut dyn Exchange,
        payload: &[u8],
    ) -> Result<bool, Error> {
        debug!("Received Sigma3 msg");

        let r = msgs::Sigma3::decode(payload)?;

        // The Sigma3 key binds the transcript hash over Sigma1 and Sigma2
        let mut tt_hash = [0; crypto::SHA256_HASH_LEN_BYTES];
        self.current_tt_hash(&mut tt_hash)?;

        let mut sigma3_key = [0; crypto::SYMM_KEY_LEN_BYTES];
        casep::compute_sigma3_key(&self.ipk, &tt_hash, &self.shared_secret, &mut sigma3_key)?;

        self.update_tt(payload)?;

        let mut decrypted = [0; MAX_ENCRYPTED_SIZE];
        if r.encrypted3.len() > decrypted.len() {
            error!("Data too large");
            Err(ErrorCode::NoSpace)?;
        }
        let decrypted = &mut decrypted[..r.encrypted3.len()];
        decrypted.copy_from_slice(r.encrypted3);

        let plain_len =
            crypto::decrypt_in_place(&sigma3_key, &casep::TBE3_NONCE, &[], decrypted)?;
        let tbe = msgs::TbeData::decode(&decrypted[..plain_len], false)?;

        let fabric = fabrics
            .get(self.fabric_idx.ok_or(ErrorCode::IncorrectState)?)
            .ok_or(ErrorCode::IncorrectState)?;

        let (peer_nodeid, _fabric_id, peer_credential) =
            fabric.verify_credentials(tbe.noc, tbe.icac, &ValidationContext::new())?;

        casep::verify_tbs(
            &peer_credential,
            tbe.noc,
            tbe.icac,
            &self.peer_pub_key,
            &self.our_pub_key,
            tbe.signature,
        )?;

        self.peer_nodeid = peer_nodeid;
        self.finalize_tt()?;

        complete_with_status(exchange, SCStatusCodes::SessionEstablishmentSuccess, &[])?;

        Ok(true)
    }

    fn handle_status_report(&mut self, payload: &[u8], success_expected: bool) -> Result<bool, Error> {
        let report = msgs::StatusReport::decode(payload)?;

        let success = report.is_success()
            && report.proto_code == SCStatusCodes::SessionEstablishmentSuccess as u16;

        if success {
            if !success_expected {
                Err(ErrorCode::InvalidMessageType)?;
            }

            info!("Success status report received. Session was established");
            return Ok(true);
        }

        error!(
            "Received error (protocol code {}) during pairing process",
            report.proto_code
        );

        let code = if report.proto_code == SCStatusCodes::NoSharedTrustRoots as u16 {
            ErrorCode::NoSharedTrustedRoot
        } else if report.proto_code == SCStatusCodes::InvalidParameter as u16 {
            ErrorCode::InvalidCaseParameter
        } else {
            ErrorCode::Crypto
        };

        Err(code.into())
    }

    fn establish_complete<const N: usize>(
        &mut self,
        store: &mut ResumptionStore<N>,
        exchange: &mut dyn Exchange,
        delegate: &mut dyn SessionEstablishmentDelegate,
    ) {
        self.state = State::Established;

        // The newest resumption id supersedes the one it was minted from
        if let Some(prev) = self.prev_resumption_id.take() {
            if prev != self.resumption_id {
                store.evict(&prev);
            }
        }
        if let Some(fabric_idx) = self.fabric_idx {
            store.put(ResumptionRecord {
                resumption_id: self.resumption_id,
                shared_secret: self.shared_secret,
                message_digest: self.message_digest,
                peer_nodeid: self.peer_nodeid,
                fabric_idx,
            });
        }

        // The ephemeral key and the running hash have served their
        // purpose; no additional messages are expected from the peer
        self.ephemeral_key = None;
        self.tt_hash = None;
        self.exchange = None;
        exchange.close();

        info!("Session established with peer node {:x}", self.peer_nodeid);

        delegate.on_session_established();
    }

    fn fail_with(
        &mut self,
        exchange: &mut dyn Exchange,
        delegate: &mut dyn SessionEstablishmentDelegate,
        err: Error,
        send_report: bool,
        close_exchange: bool,
    ) -> Error {
        let code = err.code();

        if send_report {
            let status = if code == ErrorCode::KeyNotFound {
                SCStatusCodes::NoSharedTrustRoots
            } else {
                SCStatusCodes::InvalidParameter
            };

            if let Err(send_err) = complete_with_status(exchange, status, &[]) {
                error!("Failed to send status report: {:?}", send_err);
            }
        }

        self.state = State::Failed;
        self.zeroize_secrets();
        self.exchange = None;
        if close_exchange {
            exchange.close();
        }

        error!("Session establishment failed: {:?}", code);

        delegate.on_session_establishment_error(Error::new(code));

        err
    }

    fn zeroize_secrets(&mut self) {
        // Full buffers, independent of how much of them was in use
        self.ephemeral_key = None;
        self.shared_secret.fill(0);
        self.ipk.fill(0);
        self.tt_hash = None;
    }

    fn update_tt(&mut self, data: &[u8]) -> Result<(), Error> {
        self.tt_hash
            .as_mut()
            .ok_or(ErrorCode::IncorrectState)?
            .update(data)
    }

    fn current_tt_hash(&self, out: &mut [u8]) -> Result<(), Error> {
        self.tt_hash
            .as_ref()
            .ok_or(ErrorCode::IncorrectState)?
            .clone()
            .finish(out)
    }

    fn finalize_tt(&mut self) -> Result<(), Error> {
        let tt = self.tt_hash.take().ok_or(ErrorCode::IncorrectState)?;

        let mut digest = [0; crypto::SHA256_HASH_LEN_BYTES];
        tt.finish(&mut digest)?;
        self.message_digest = digest;

        Ok(())
    }

    /// Derive the channel key block for an established session and split
    /// it by role
    pub fn derive_secure_session(&self, role: Role) -> Result<SessionKeys, Error> {
        if self.state != State::Established {
            Err(ErrorCode::IncorrectState)?;
        }

        let mut keys = [0; CASE_SESSION_KEYS_LEN];
        casep::compute_session_keys(
            &self.ipk,
            &self.message_digest,
            &self.shared_secret,
            &mut keys,
        )?;

        let mut session_keys = SessionKeys {
            enc_key: [0; crypto::SYMM_KEY_LEN_BYTES],
            dec_key: [0; crypto::SYMM_KEY_LEN_BYTES],
            att_challenge: [0; crypto::SYMM_KEY_LEN_BYTES],
        };

        match role {
            Role::Initiator => {
                session_keys.enc_key.copy_from_slice(&keys[0..16]);
                session_keys.dec_key.copy_from_slice(&keys[16..32]);
            }
            Role::Responder => {
                session_keys.dec_key.copy_from_slice(&keys[0..16]);
                session_keys.enc_key.copy_from_slice(&keys[16..32]);
            }
        }
        session_keys.att_challenge.copy_from_slice(&keys[32..48]);

        Ok(session_keys)
    }

    /// Export an established session as a base64 string, so it can be
    /// handed to another process or persisted across a short reboot. The
    /// output buffer needs `SERIALIZED_LEN` bytes.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize, Error> {
        if self.state != State::Established {
            Err(ErrorCode::IncorrectState)?;
        }

        let mut raw = [0; SERIALIZED_RAW_LEN];
        let mut wb = WriteBuf::new(&mut raw);

        wb.le_u8(SESSION_VERSION)?;
        wb.le_u16(self.local_sessid)?;
        wb.le_u16(self.peer_sessid)?;
        wb.le_u64(self.peer_nodeid)?;
        wb.le_u16(self.shared_secret.len() as u16)?;
        wb.copy_from_slice(&self.shared_secret)?;
        wb.le_u16(self.message_digest.len() as u16)?;
        wb.copy_from_slice(&self.message_digest)?;
        wb.copy_from_slice(&self.resumption_id)?;
        wb.copy_from_slice(&self.ipk)?;

        BASE64
            .encode_slice(wb.as_slice(), out)
            .map_err(|_| ErrorCode::NoSpace.into())
    }

    /// Re-create an established session from its serialized form
    pub fn deserialize(rand: Rand, data: &[u8]) -> Result<Self, Error> {
        let mut raw = [0; SERIALIZED_RAW_LEN + 3];
        let len = BASE64
            .decode_slice(data, &mut raw)
            .map_err(|_| ErrorCode::InvalidArgument)?;

        let mut pb = ParseBuf::new(&raw[..len]);

        if pb.le_u8()? != SESSION_VERSION {
            Err(ErrorCode::VersionMismatch)?;
        }

        let mut session = Self::new(rand);
        session.local_sessid = pb.le_u16()?;
        session.peer_sessid = pb.le_u16()?;
        session.peer_nodeid = pb.le_u64()?;

        let secret_len = pb.le_u16()? as usize;
        if secret_len != crypto::ECDH_SHARED_SECRET_LEN_BYTES {
            Err(ErrorCode::InvalidArgument)?;
        }
        session.shared_secret.copy_from_slice(pb.bytes(secret_len)?);

        let digest_len = pb.le_u16()? as usize;
        if digest_len != crypto::SHA256_HASH_LEN_BYTES {
            Err(ErrorCode::InvalidArgument)?;
        }
        session
            .message_digest
            .copy_from_slice(pb.bytes(digest_len)?);

        session
            .resumption_id
            .copy_from_slice(pb.bytes(CASE_RESUMPTION_ID_LEN)?);
        session.ipk.copy_from_slice(pb.bytes(IPK_LEN_BYTES)?);

        session.state = State::Established;

        Ok(session)
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_sessid(&self) -> u16 {
        self.local_sessid
    }

    pub fn peer_sessid(&self) -> u16 {
        self.peer_sessid
    }

    pub fn peer_nodeid(&self) -> u64 {
        self.peer_nodeid
    }

    pub fn peer_addr(&self) -> Address {
        self.peer_addr
    }

    pub fn fab_idx(&self) -> Option<NonZeroU8> {
        self.fabric_idx
    }

    /// The frozen transcript digest binding this session; available once
    /// the session is established
    pub fn message_digest(&self) -> Result<&[u8; crypto::SHA256_HASH_LEN_BYTES], Error> {
        if self.state != State::Established {
            Err(ErrorCode::IncorrectState)?;
        }
        Ok(&self.message_digest)
    }
}

impl Drop for CaseSession {
    fn drop(&mut self) {
        self.zeroize_secrets();
    }
}
