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

//! Operational certificates: the compact TLV documents carried inside the
//! encrypted handshake payloads, and the chain verification that backs
//! peer identity validation.
//!
//! A certificate is an outer struct `{1: tbs, 2: signature}` where the
//! to-be-signed portion is an octet string holding the TLV-encoded fields
//! and the signature is ECDSA-P256 (r‖s) over those raw octets. Validity
//! times are epoch-2000 seconds; a Not-After of 0 never expires.

use crate::crypto::{self, KeyPair};
use crate::error::{Error, ErrorCode};
use crate::tlv::{read_root_struct, ElementValue, TLVWriter, TagType};
use crate::utils::epoch::CERT_DOESNT_EXPIRE;
use crate::utils::writebuf::WriteBuf;

pub const MAX_CERT_TLV_LEN: usize = 600;

pub const KEY_USAGE_DIGITAL_SIGNATURE: u16 = 0x0001;
pub const KEY_USAGE_KEY_CERT_SIGN: u16 = 0x0020;

pub const EKU_SERVER_AUTH: u16 = 0x0001;
pub const EKU_CLIENT_AUTH: u16 = 0x0002;

/// The compiled-in lower bound used as the effective time on devices
/// without a wall clock: 2021-02-12 10:10:10 UTC in epoch-2000 seconds
pub const EFFECTIVE_TIME_LOWER_BOUND: u32 = 666_439_810;

mod dn_tags {
    pub const NODE_ID: u8 = 1;
    pub const FABRIC_ID: u8 = 2;
    pub const CA_ID: u8 = 3;
}

mod cert_tags {
    pub const TBS: u8 = 1;
    pub const SIGNATURE: u8 = 2;

    pub const SERIAL: u8 = 1;
    pub const ISSUER: u8 = 2;
    pub const NOT_BEFORE: u8 = 3;
    pub const NOT_AFTER: u8 = 4;
    pub const SUBJECT: u8 = 5;
    pub const PUBKEY: u8 = 6;
    pub const EXTENSIONS: u8 = 7;

    pub const EXT_IS_CA: u8 = 1;
    pub const EXT_KEY_USAGE: u8 = 2;
    pub const EXT_EXT_KEY_USAGE: u8 = 3;
}

/// The distinguished-name fields used by operational credentials
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dn {
    pub node_id: Option<u64>,
    pub fabric_id: Option<u64>,
    pub ca_id: Option<u64>,
}

/// Certificate-chain validation requirements supplied by the consumer:
/// the usages the leaf must carry and the time at which the chain must be
/// valid
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub effective_time: u32,
    pub required_key_usage: u16,
    pub required_ext_key_usage: u16,
}

impl ValidationContext {
    /// The validation requirements of the handshake: a leaf fit for
    /// digital signatures and server authentication, valid at the
    /// compiled-in time lower bound
    pub fn new() -> Self {
        Self {
            effective_time: EFFECTIVE_TIME_LOWER_BOUND,
            required_key_usage: KEY_USAGE_DIGITAL_SIGNATURE,
            required_ext_key_usage: EKU_SERVER_AUTH,
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Cert<'a> {
    tbs_raw: &'a [u8],
    signature: &'a [u8],
    serial: u64,
    issuer: Dn,
    not_before: u32,
    not_after: u32,
    subject: Dn,
    pubkey: &'a [u8],
    is_ca: bool,
    key_usage: u16,
    ext_key_usage: u16,
}

impl<'a> Cert<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;

        let elem = reader.next()?;
        if elem.ctx_tag()? != cert_tags::TBS {
            Err(ErrorCode::TLVNotFound)?;
        }
        let tbs_raw = elem.slice()?;

        let elem = reader.next()?;
        if elem.ctx_tag()? != cert_tags::SIGNATURE {
            Err(ErrorCode::TLVNotFound)?;
        }
        let signature = elem.slice()?;
        if signature.len() != crypto::EC_SIGNATURE_LEN_BYTES {
            Err(ErrorCode::InvalidData)?;
        }

        let mut cert = Self {
            tbs_raw,
            signature,
            serial: 0,
            issuer: Dn::default(),
            not_before: 0,
            not_after: 0,
            subject: Dn::default(),
            pubkey: &[],
            is_ca: false,
            key_usage: 0,
            ext_key_usage: 0,
        };
        cert.parse_tbs()?;

        Ok(cert)
    }

    fn parse_tbs(&mut self) -> Result<(), Error> {
        let mut reader = read_root_struct(self.tbs_raw)?;
        let mut seen_pubkey = false;
        let mut seen_extensions = false;

        loop {
            let elem = reader.next()?;
            if elem.value == ElementValue::EndContainer {
                break;
            }

            match elem.ctx_tag()? {
                cert_tags::SERIAL => self.serial = elem.u64()?,
                cert_tags::ISSUER => {
                    if !elem.is_container_start() {
                        Err(ErrorCode::TLVTypeMismatch)?;
                    }
                    self.issuer = Self::parse_dn(&mut reader)?;
                }
                cert_tags::NOT_BEFORE => self.not_before = elem.u32()?,
                cert_tags::NOT_AFTER => self.not_after = elem.u32()?,
                cert_tags::SUBJECT => {
                    if !elem.is_container_start() {
                        Err(ErrorCode::TLVTypeMismatch)?;
                    }
                    self.subject = Self::parse_dn(&mut reader)?;
                }
                cert_tags::PUBKEY => {
                    self.pubkey = elem.slice()?;
                    if self.pubkey.len() != crypto::EC_POINT_LEN_BYTES {
                        Err(ErrorCode::InvalidData)?;
                    }
                    seen_pubkey = true;
                }
                cert_tags::EXTENSIONS => {
                    if !elem.is_container_start() {
                        Err(ErrorCode::TLVTypeMismatch)?;
                    }
                    self.parse_extensions(&mut reader)?;
                    seen_extensions = true;
                }
                _ => Err(ErrorCode::TLVNotFound)?,
            }
        }

        if !seen_pubkey || !seen_extensions {
            Err(ErrorCode::TLVNotFound)?;
        }

        Ok(())
    }

    fn parse_dn(reader: &mut crate::tlv::TLVReader<'a>) -> Result<Dn, Error> {
        let mut dn = Dn::default();

        loop {
            let elem = reader.next()?;
            if elem.value == ElementValue::EndContainer {
                break;
            }

            match elem.ctx_tag()? {
                dn_tags::NODE_ID => dn.node_id = Some(elem.u64()?),
                dn_tags::FABRIC_ID => dn.fabric_id = Some(elem.u64()?),
                dn_tags::CA_ID => dn.ca_id = Some(elem.u64()?),
                _ => Err(ErrorCode::TLVNotFound)?,
            }
        }

        Ok(dn)
    }

    fn parse_extensions(&mut self, reader: &mut crate::tlv::TLVReader<'a>) -> Result<(), Error> {
        loop {
            let elem = reader.next()?;
            if elem.value == ElementValue::EndContainer {
                break;
            }

            match elem.ctx_tag()? {
                cert_tags::EXT_IS_CA => self.is_ca = elem.bool()?,
                cert_tags::EXT_KEY_USAGE => self.key_usage = elem.u16()?,
                cert_tags::EXT_EXT_KEY_USAGE => self.ext_key_usage = elem.u16()?,
                _ => Err(ErrorCode::TLVNotFound)?,
            }
        }

        Ok(())
    }

    pub fn get_node_id(&self) -> Result<u64, Error> {
        self.subject.node_id.ok_or(ErrorCode::InvalidData.into())
    }

    pub fn get_fabric_id(&self) -> Result<u64, Error> {
        self.subject.fabric_id.ok_or(ErrorCode::InvalidData.into())
    }

    pub fn get_pubkey(&self) -> &'a [u8] {
        self.pubkey
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn key_usage(&self) -> u16 {
        self.key_usage
    }

    pub fn ext_key_usage(&self) -> u16 {
        self.ext_key_usage
    }

    pub fn issuer(&self) -> &Dn {
        &self.issuer
    }

    pub fn subject(&self) -> &Dn {
        &self.subject
    }

    /// Verify this certificate's signature against a signer's public key
    pub fn verify_signed_by(&self, signer_pubkey: &[u8]) -> Result<(), Error> {
        let key = KeyPair::new_from_public(signer_pubkey)?;
        key.verify_msg(self.tbs_raw, self.signature)
    }

    /// Check that the validity window contains the given effective time
    pub fn check_validity(&self, effective_time: u32) -> Result<(), Error> {
        if effective_time < self.not_before {
            Err(ErrorCode::InvalidData)?;
        }
        if self.not_after != CERT_DOESNT_EXPIRE && effective_time > self.not_after {
            Err(ErrorCode::InvalidData)?;
        }
        Ok(())
    }

    /// Start verifying a chain with this certificate as the leaf. Feed
    /// the issuers in order with `add_cert` and close with `finalise`.
    pub fn verify_chain_start(&self) -> CertVerifier<'_, 'a> {
        CertVerifier { cert: self }
    }
}

#[derive(Debug)]
pub struct CertVerifier<'c, 'a> {
    cert: &'c Cert<'a>,
}

impl<'c, 'a> CertVerifier<'c, 'a> {
    pub fn add_cert(self, parent: &'c Cert<'a>) -> Result<Self, Error> {
        if !parent.is_ca() || (parent.key_usage() & KEY_USAGE_KEY_CERT_SIGN) == 0 {
            Err(ErrorCode::InvalidData)?;
        }

        if let (Some(issuer_ca), Some(subject_ca)) =
            (self.cert.issuer().ca_id, parent.subject().ca_id)
        {
            if issuer_ca != subject_ca {
                Err(ErrorCode::InvalidData)?;
            }
        }

        self.cert.verify_signed_by(parent.get_pubkey())?;

        Ok(Self { cert: parent })
    }

    /// Close the chain; the last certificate must be a self-signed CA
    pub fn finalise(self) -> Result<(), Error> {
        if !self.cert.is_ca() {
            Err(ErrorCode::InvalidData)?;
        }
        self.cert.verify_signed_by(self.cert.get_pubkey())
    }
}

/// The inputs for minting a certificate; used by commissioning tooling
/// and the test fixtures
#[derive(Debug, Clone, Copy)]
pub struct CertParams<'a> {
    pub serial: u64,
    pub issuer: Dn,
    pub subject: Dn,
    pub not_before: u32,
    pub not_after: u32,
    pub pubkey: &'a [u8],
    pub is_ca: bool,
    pub key_usage: u16,
    pub ext_key_usage: u16,
}

fn write_dn(tw: &mut TLVWriter, tag: TagType, dn: &Dn) -> Result<(), Error> {
    tw.start_struct(tag)?;
    if let Some(node_id) = dn.node_id {
        tw.u64(TagType::Context(dn_tags::NODE_ID), node_id)?;
    }
    if let Some(fabric_id) = dn.fabric_id {
        tw.u64(TagType::Context(dn_tags::FABRIC_ID), fabric_id)?;
    }
    if let Some(ca_id) = dn.ca_id {
        tw.u64(TagType::Context(dn_tags::CA_ID), ca_id)?;
    }
    tw.end_container()
}

/// Encode and sign a certificate into `buf`, returning the encoded length
pub fn encode_cert(params: &CertParams, signer: &KeyPair, buf: &mut [u8]) -> Result<usize, Error> {
    if params.pubkey.len() != crypto::EC_POINT_LEN_BYTES {
        Err(ErrorCode::InvalidArgument)?;
    }

    let mut tbs = [0; MAX_CERT_TLV_LEN];
    let tbs_len = {
        let mut wb = WriteBuf::new(&mut tbs);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous)?;
        tw.u64(TagType::Context(cert_tags::SERIAL), params.serial)?;
        write_dn(&mut tw, TagType::Context(cert_tags::ISSUER), &params.issuer)?;
        tw.u32(TagType::Context(cert_tags::NOT_BEFORE), params.not_before)?;
        tw.u32(TagType::Context(cert_tags::NOT_AFTER), params.not_after)?;
        write_dn(&mut tw, TagType::Context(cert_tags::SUBJECT), &params.subject)?;
        tw.str8(TagType::Context(cert_tags::PUBKEY), params.pubkey)?;
        tw.start_struct(TagType::Context(cert_tags::EXTENSIONS))?;
        tw.bool(TagType::Context(cert_tags::EXT_IS_CA), params.is_ca)?;
        tw.u16(TagType::Context(cert_tags::EXT_KEY_USAGE), params.key_usage)?;
        tw.u16(
            TagType::Context(cert_tags::EXT_EXT_KEY_USAGE),
            params.ext_key_usage,
        )?;
        tw.end_container()?;
        tw.end_container()?;

        wb.get_tail()
    };

    let mut signature = [0; crypto::EC_SIGNATURE_LEN_BYTES];
    signer.sign_msg(&tbs[..tbs_len], &mut signature)?;

    let mut wb = WriteBuf::new(buf);
    let mut tw = TLVWriter::new(&mut wb);
    tw.start_struct(TagType::Anonymous)?;
    tw.str(TagType::Context(cert_tags::TBS), &tbs[..tbs_len])?;
    tw.str8(TagType::Context(cert_tags::SIGNATURE), &signature)?;
    tw.end_container()?;

    Ok(wb.get_tail())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_rand;

    fn pubkey_of(key: &KeyPair) -> [u8; crypto::EC_POINT_LEN_BYTES] {
        let mut pubkey = [0; crypto::EC_POINT_LEN_BYTES];
        key.get_public_key(&mut pubkey).unwrap();
        pubkey
    }

    fn mint_root(root_key: &KeyPair, buf: &mut [u8]) -> usize {
        let pubkey = pubkey_of(root_key);
        encode_cert(
            &CertParams {
                serial: 1,
                issuer: Dn {
                    ca_id: Some(0xcacb),
                    ..Default::default()
                },
                subject: Dn {
                    ca_id: Some(0xcacb),
                    ..Default::default()
                },
                not_before: 0,
                not_after: CERT_DOESNT_EXPIRE,
                pubkey: &pubkey,
                is_ca: true,
                key_usage: KEY_USAGE_KEY_CERT_SIGN,
                ext_key_usage: 0,
            },
            root_key,
            buf,
        )
        .unwrap()
    }

    fn mint_noc(root_key: &KeyPair, node_key: &KeyPair, fabric_id: u64, buf: &mut [u8]) -> usize {
        let pubkey = pubkey_of(node_key);
        encode_cert(
            &CertParams {
                serial: 2,
                issuer: Dn {
                    ca_id: Some(0xcacb),
                    ..Default::default()
                },
                subject: Dn {
                    node_id: Some(0x1122),
                    fabric_id: Some(fabric_id),
                    ..Default::default()
                },
                not_before: 600_000_000,
                not_after: 900_000_000,
                pubkey: &pubkey,
                is_ca: false,
                key_usage: KEY_USAGE_DIGITAL_SIGNATURE,
                ext_key_usage: EKU_SERVER_AUTH | EKU_CLIENT_AUTH,
            },
            root_key,
            buf,
        )
        .unwrap()
    }

    #[test]
    fn test_chain_accepts_root_signed_noc() {
        let root_key = KeyPair::new(test_rand).unwrap();
        let node_key = KeyPair::new(test_rand).unwrap();

        let mut root_buf = [0; MAX_CERT_TLV_LEN];
        let root_len = mint_root(&root_key, &mut root_buf);
        let mut noc_buf = [0; MAX_CERT_TLV_LEN];
        let noc_len = mint_noc(&root_key, &node_key, 0xfab1, &mut noc_buf);

        let root = Cert::new(&root_buf[..root_len]).unwrap();
        let noc = Cert::new(&noc_buf[..noc_len]).unwrap();

        assert_eq!(noc.get_node_id().unwrap(), 0x1122);
        assert_eq!(noc.get_fabric_id().unwrap(), 0xfab1);

        noc.verify_chain_start()
            .add_cert(&root)
            .unwrap()
            .finalise()
            .unwrap();

        noc.check_validity(EFFECTIVE_TIME_LOWER_BOUND).unwrap();
    }

    #[test]
    fn test_chain_rejects_wrong_root() {
        let root_key = KeyPair::new(test_rand).unwrap();
        let other_root_key = KeyPair::new(test_rand).unwrap();
        let node_key = KeyPair::new(test_rand).unwrap();

        let mut root_buf = [0; MAX_CERT_TLV_LEN];
        let root_len = mint_root(&other_root_key, &mut root_buf);
        let mut noc_buf = [0; MAX_CERT_TLV_LEN];
        let noc_len = mint_noc(&root_key, &node_key, 0xfab1, &mut noc_buf);

        let root = Cert::new(&root_buf[..root_len]).unwrap();
        let noc = Cert::new(&noc_buf[..noc_len]).unwrap();

        assert_eq!(
            noc.verify_chain_start()
                .add_cert(&root)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidSignature
        );
    }

    #[test]
    fn test_chain_rejects_non_ca_issuer() {
        let root_key = KeyPair::new(test_rand).unwrap();
        let node_key = KeyPair::new(test_rand).unwrap();

        let mut noc_buf = [0; MAX_CERT_TLV_LEN];
        let noc_len = mint_noc(&root_key, &node_key, 0xfab1, &mut noc_buf);
        let noc = Cert::new(&noc_buf[..noc_len]).unwrap();

        // A leaf cannot act as an issuer
        assert!(noc.verify_chain_start().add_cert(&noc).is_err());
    }

    #[test]
    fn test_validity_window() {
        let root_key = KeyPair::new(test_rand).unwrap();
        let node_key = KeyPair::new(test_rand).unwrap();

        let mut noc_buf = [0; MAX_CERT_TLV_LEN];
        let noc_len = mint_noc(&root_key, &node_key, 0xfab1, &mut noc_buf);
        let noc = Cert::new(&noc_buf[..noc_len]).unwrap();

        assert!(noc.check_validity(599_999_999).is_err());
        assert!(noc.check_validity(600_000_000).is_ok());
        assert!(noc.check_validity(900_000_001).is_err());
    }

    #[test]
    fn test_tampered_cert_rejected() {
        let root_key = KeyPair::new(test_rand).unwrap();
        let node_key = KeyPair::new(test_rand).unwrap();

        let mut root_buf = [0; MAX_CERT_TLV_LEN];
        let root_len = mint_root(&root_key, &mut root_buf);
        let mut noc_buf = [0; MAX_CERT_TLV_LEN];
        let noc_len = mint_noc(&root_key, &node_key, 0xfab1, &mut noc_buf);

        // Flip a bit inside the TBS octets
        noc_buf[20] ^= 0x01;

        let root = Cert::new(&root_buf[..root_len]).unwrap();
        if let Ok(noc) = Cert::new(&noc_buf[..noc_len]) {
            assert!(noc.verify_chain_start().add_cert(&root).is_err());
        }
    }
}
