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

//! The handshake key schedule and the to-be-signed / to-be-encrypted
//! blob construction. The HKDF info strings and AEAD nonces in this
//! module are part of the interoperable wire contract and must stay
//! byte-exact.
//!
//! All key derivations use the ECDH shared secret as the HKDF input key
//! material; the salts mix in the identity protection key and, where
//! applicable, the running transcript hash.

use heapless::Vec;

use crate::crypto::{self, KeyPair};
use crate::error::{Error, ErrorCode};
use crate::fabric::Fabric;
use crate::tlv::{TLVWriter, TagType};
use crate::utils::writebuf::WriteBuf;

pub const CASE_RANDOM_LEN: usize = 32;

pub const CASE_RESUMPTION_ID_LEN: usize = 16;

pub const CASE_SESSION_KEYS_LEN: usize = 3 * crypto::SYMM_KEY_LEN_BYTES;

pub(crate) const MAX_TBS_SIZE: usize = 800;

const S2K_INFO: [u8; 6] = [0x53, 0x69, 0x67, 0x6d, 0x61, 0x32];
const S3K_INFO: [u8; 6] = [0x53, 0x69, 0x67, 0x6d, 0x61, 0x33];
const SEKEYS_INFO: [u8; 11] = [
    0x53, 0x65, 0x73, 0x73, 0x69, 0x6f, 0x6e, 0x4b, 0x65, 0x79, 0x73,
];

pub const SIGMA1_RESUME_INFO: [u8; 13] = [
    0x53, 0x69, 0x67, 0x6d, 0x61, 0x31, 0x5f, 0x52, 0x65, 0x73, 0x75, 0x6d, 0x65,
];
pub const SIGMA2_RESUME_INFO: [u8; 13] = [
    0x53, 0x69, 0x67, 0x6d, 0x61, 0x32, 0x5f, 0x52, 0x65, 0x73, 0x75, 0x6d, 0x65,
];

pub const TBE2_NONCE: [u8; crypto::AEAD_NONCE_LEN_BYTES] =
    /* "NCASE_Sigma2N" */
    [
        0x4e, 0x43, 0x41, 0x53, 0x45, 0x5f, 0x53, 0x69, 0x67, 0x6d, 0x61, 0x32, 0x4e,
    ];
pub const TBE3_NONCE: [u8; crypto::AEAD_NONCE_LEN_BYTES] =
    /* "NCASE_Sigma3N" */
    [
        0x4e, 0x43, 0x41, 0x53, 0x45, 0x5f, 0x53, 0x69, 0x67, 0x6d, 0x61, 0x33, 0x4e,
    ];
pub const RESUME1_MIC_NONCE: [u8; crypto::AEAD_NONCE_LEN_BYTES] =
    /* "NCASE_SigmaS1" */
    [
        0x4e, 0x43, 0x41, 0x53, 0x45, 0x5f, 0x53, 0x69, 0x67, 0x6d, 0x61, 0x53, 0x31,
    ];
pub const RESUME2_MIC_NONCE: [u8; crypto::AEAD_NONCE_LEN_BYTES] =
    /* "NCASE_SigmaS2" */
    [
        0x4e, 0x43, 0x41, 0x53, 0x45, 0x5f, 0x53, 0x69, 0x67, 0x6d, 0x61, 0x53, 0x32,
    ];

/// Derive the Sigma2 AEAD key. The salt binds the responder's random and
/// ephemeral key plus the transcript hash over Sigma1.
pub fn compute_sigma2_key(
    ipk: &[u8],
    responder_random: &[u8],
    responder_pub_key: &[u8],
    tt_hash: &[u8],
    shared_secret: &[u8],
    key: &mut [u8],
) -> Result<(), Error> {
    let mut salt = Vec::<u8, 256>::new();
    salt.extend_from_slice(ipk).map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(responder_random)
        .map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(responder_pub_key)
        .map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(tt_hash)
        .map_err(|_| ErrorCode::NoSpace)?;

    crypto::hkdf_sha256(salt.as_slice(), shared_secret, &S2K_INFO, key)
}

/// Derive the Sigma3 AEAD key. The salt binds the transcript hash over
/// Sigma1 and Sigma2.
pub fn compute_sigma3_key(
    ipk: &[u8],
    tt_hash: &[u8],
    shared_secret: &[u8],
    key: &mut [u8],
) -> Result<(), Error> {
    let mut salt = Vec::<u8, 256>::new();
    salt.extend_from_slice(ipk).map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(tt_hash)
        .map_err(|_| ErrorCode::NoSpace)?;

    crypto::hkdf_sha256(salt.as_slice(), shared_secret, &S3K_INFO, key)
}

/// Derive the channel key block: I2R key, R2I key and the attestation
/// challenge, in that order
pub fn compute_session_keys(
    ipk: &[u8],
    message_digest: &[u8],
    shared_secret: &[u8],
    keys: &mut [u8],
) -> Result<(), Error> {
    if keys.len() < CASE_SESSION_KEYS_LEN {
        Err(ErrorCode::NoSpace)?;
    }

    let mut salt = Vec::<u8, 256>::new();
    salt.extend_from_slice(ipk).map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(message_digest)
        .map_err(|_| ErrorCode::NoSpace)?;

    crypto::hkdf_sha256(salt.as_slice(), shared_secret, &SEKEYS_INFO, keys)
}

fn compute_resume_key(
    shared_secret: &[u8],
    initiator_random: &[u8],
    resumption_id: &[u8],
    info: &[u8],
    key: &mut [u8],
) -> Result<(), Error> {
    let mut salt = Vec::<u8, { CASE_RANDOM_LEN + CASE_RESUMPTION_ID_LEN }>::new();
    salt.extend_from_slice(initiator_random)
        .map_err(|_| ErrorCode::NoSpace)?;
    salt.extend_from_slice(resumption_id)
        .map_err(|_| ErrorCode::NoSpace)?;

    crypto::hkdf_sha256(salt.as_slice(), shared_secret, info, key)
}

/// Produce a resumption MIC: the tag of an AES-CCM encryption of the
/// empty plaintext under the derived resume key
pub fn generate_resume_mic(
    shared_secret: &[u8],
    initiator_random: &[u8],
    resumption_id: &[u8],
    info: &[u8],
    nonce: &[u8],
    mic: &mut [u8],
) -> Result<(), Error> {
    let mut key = [0; crypto::SYMM_KEY_LEN_BYTES];
    compute_resume_key(shared_secret, initiator_random, resumption_id, info, &mut key)?;

    crypto::aead_tag(&key, nonce, mic)
}

/// Validate a transmitted resumption MIC by re-deriving the resume key
/// and re-running the empty-plaintext AEAD
pub fn validate_resume_mic(
    shared_secret: &[u8],
    initiator_random: &[u8],
    resumption_id: &[u8],
    info: &[u8],
    nonce: &[u8],
    mic: &[u8],
) -> Result<(), Error> {
    if mic.len() != crypto::AEAD_MIC_LEN_BYTES {
        Err(ErrorCode::InvalidCaseParameter)?;
    }

    let mut key = [0; crypto::SYMM_KEY_LEN_BYTES];
    compute_resume_key(shared_secret, initiator_random, resumption_id, info, &mut key)?;

    crypto::aead_tag_check(&key, nonce, mic)
}

/// Serialize the to-be-signed blob: the sender's credential chain plus
/// both ephemeral keys. This blob is built independently on both sides;
/// it is not the transcript hash.
pub fn write_tbs(
    buf: &mut [u8],
    noc: &[u8],
    icac: Option<&[u8]>,
    sender_pub_key: &[u8],
    receiver_pub_key: &[u8],
) -> Result<usize, Error> {
    let mut wb = WriteBuf::new(buf);
    let mut tw = TLVWriter::new(&mut wb);

    tw.start_struct(TagType::Anonymous)?;
    tw.str(TagType::Context(1), noc)?;
    if let Some(icac) = icac {
        tw.str(TagType::Context(2), icac)?;
    }
    tw.str8(TagType::Context(3), sender_pub_key)?;
    tw.str8(TagType::Context(4), receiver_pub_key)?;
    tw.end_container()?;

    Ok(wb.get_tail())
}

/// Sign the TBS blob with the fabric's operational key
pub fn sign_tbs(
    fabric: &Fabric,
    sender_pub_key: &[u8],
    receiver_pub_key: &[u8],
    signature: &mut [u8],
) -> Result<usize, Error> {
    let icac = (!fabric.icac().is_empty()).then(|| fabric.icac());

    let mut buf = [0; MAX_TBS_SIZE];
    let len = write_tbs(&mut buf, fabric.noc(), icac, sender_pub_key, receiver_pub_key)?;

    fabric.sign_msg(&buf[..len], signature)
}

/// Re-serialize the TBS blob with the peer's field set and verify the
/// transmitted signature against the peer's operational public key
pub fn verify_tbs(
    peer_pub_key: &[u8],
    noc: &[u8],
    icac: Option<&[u8]>,
    sender_pub_key: &[u8],
    receiver_pub_key: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    let mut buf = [0; MAX_TBS_SIZE];
    let len = write_tbs(&mut buf, noc, icac, sender_pub_key, receiver_pub_key)?;

    let key = KeyPair::new_from_public(peer_pub_key)?;
    key.verify_msg(&buf[..len], signature)
}

/// Serialize and encrypt a to-be-encrypted section in place in `out`,
/// returning the total length (ciphertext plus tag)
pub fn encrypt_tbe(
    key: &[u8],
    nonce: &[u8],
    noc: &[u8],
    icac: Option<&[u8]>,
    signature: &[u8],
    resumption_id: Option<&[u8]>,
    out: &mut [u8],
) -> Result<usize, Error> {
    let data_len = {
        let mut wb = WriteBuf::new(out);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous)?;
        tw.str(TagType::Context(1), noc)?;
        if let Some(icac) = icac {
            tw.str(TagType::Context(2), icac)?;
        }
        tw.str8(TagType::Context(3), signature)?;
        if let Some(resumption_id) = resumption_id {
            tw.str8(TagType::Context(4), resumption_id)?;
        }
        tw.end_container()?;

        wb.get_tail()
    };

    if out.len() < data_len + crypto::AEAD_MIC_LEN_BYTES {
        Err(ErrorCode::NoSpace)?;
    }

    crypto::encrypt_in_place(
        key,
        nonce,
        &[],
        &mut out[..data_len + crypto::AEAD_MIC_LEN_BYTES],
        data_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_mic_round_trip_and_tamper() {
        let shared_secret = [0x5e; 32];
        let random = [0x11; CASE_RANDOM_LEN];
        let resumption_id = [0x22; CASE_RESUMPTION_ID_LEN];

        let mut mic = [0; crypto::AEAD_MIC_LEN_BYTES];
        generate_resume_mic(
            &shared_secret,
            &random,
            &resumption_id,
            &SIGMA1_RESUME_INFO,
            &RESUME1_MIC_NONCE,
            &mut mic,
        )
        .unwrap();

        validate_resume_mic(
            &shared_secret,
            &random,
            &resumption_id,
            &SIGMA1_RESUME_INFO,
            &RESUME1_MIC_NONCE,
            &mic,
        )
        .unwrap();

        // The two directions derive different keys
        assert!(validate_resume_mic(
            &shared_secret,
            &random,
            &resumption_id,
            &SIGMA2_RESUME_INFO,
            &RESUME2_MIC_NONCE,
            &mic,
        )
        .is_err());

        let mut bad = mic;
        bad[3] ^= 0x10;
        assert_eq!(
            validate_resume_mic(
                &shared_secret,
                &random,
                &resumption_id,
                &SIGMA1_RESUME_INFO,
                &RESUME1_MIC_NONCE,
                &bad,
            )
            .unwrap_err()
            .code(),
            crate::error::ErrorCode::InvalidMic
        );
    }

    #[test]
    fn test_sigma_keys_are_deterministic_and_distinct() {
        let ipk = [0; 16];
        let random = [0x42; CASE_RANDOM_LEN];
        let pub_key = [0x04; 65];
        let tt_hash = [0x77; 32];
        let shared_secret = [0x5e; 32];

        let mut k1 = [0; crypto::SYMM_KEY_LEN_BYTES];
        let mut k2 = [0; crypto::SYMM_KEY_LEN_BYTES];
        compute_sigma2_key(&ipk, &random, &pub_key, &tt_hash, &shared_secret, &mut k1).unwrap();
        compute_sigma2_key(&ipk, &random, &pub_key, &tt_hash, &shared_secret, &mut k2).unwrap();
        assert_eq!(k1, k2);

        let mut k3 = [0; crypto::SYMM_KEY_LEN_BYTES];
        compute_sigma3_key(&ipk, &tt_hash, &shared_secret, &mut k3).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_tbe_round_trip() {
        let key = [0x13; crypto::SYMM_KEY_LEN_BYTES];
        let noc = [0xaa; 120];
        let signature = [0xbb; crypto::EC_SIGNATURE_LEN_BYTES];
        let resumption_id = [0xcc; CASE_RESUMPTION_ID_LEN];

        let mut out = [0; 512];
        let len = encrypt_tbe(
            &key,
            &TBE2_NONCE,
            &noc,
            None,
            &signature,
            Some(&resumption_id),
            &mut out,
        )
        .unwrap();

        let plain_len = crypto::decrypt_in_place(&key, &TBE2_NONCE, &[], &mut out[..len]).unwrap();

        let tbe = crate::secure_channel::case::msgs::TbeData::decode(&out[..plain_len], true)
            .unwrap();
        assert_eq!(tbe.noc, noc);
        assert!(tbe.icac.is_none());
        assert_eq!(tbe.signature, signature);
        assert_eq!(tbe.resumption_id.unwrap(), resumption_id);
    }
}
