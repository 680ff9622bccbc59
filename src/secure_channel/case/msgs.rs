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

//! Codecs for the messages the handshake exchanges: strict decoders for
//! the four TLV Sigma messages and the structures carried inside their
//! encrypted sections, plus the fixed-layout Status Report that closes a
//! handshake. Any wire-format violation surfaces as
//! `InvalidCaseParameter`.

use crate::crypto;
use crate::error::{Error, ErrorCode};
use crate::tlv::{read_root_struct, ElementValue, TLVElement, TLVReader};
use crate::utils::parsebuf::ParseBuf;
use crate::utils::writebuf::WriteBuf;

use super::casep::{CASE_RANDOM_LEN, CASE_RESUMPTION_ID_LEN};

mod sigma1_tags {
    pub const INITIATOR_RANDOM: u8 = 1;
    pub const INITIATOR_SESSID: u8 = 2;
    pub const DEST_ID: u8 = 3;
    pub const INITIATOR_EPH_PUB_KEY: u8 = 4;
    pub const MRP_PARAMS: u8 = 5;
    pub const RESUMPTION_ID: u8 = 6;
    pub const RESUME1_MIC: u8 = 7;
}

mod tbe_tags {
    pub const SENDER_NOC: u8 = 1;
    pub const SENDER_ICAC: u8 = 2;
    pub const SIGNATURE: u8 = 3;
    pub const RESUMPTION_ID: u8 = 4;
}

fn next_ctx<'a>(reader: &mut TLVReader<'a>, tag: u8) -> Result<TLVElement<'a>, Error> {
    let elem = reader.next()?;
    if elem.ctx_tag()? != tag {
        Err(ErrorCode::TLVNotFound)?;
    }
    Ok(elem)
}

fn sized<'a>(data: &'a [u8], len: usize) -> Result<&'a [u8], Error> {
    if data.len() != len {
        Err(ErrorCode::InvalidData)?;
    }
    Ok(data)
}

fn encrypted_section(data: &[u8]) -> Result<&[u8], Error> {
    // The section must hold at least one byte beyond the AEAD tag
    if data.len() <= crypto::AEAD_MIC_LEN_BYTES {
        Err(ErrorCode::InvalidData)?;
    }
    Ok(data)
}

#[derive(Debug)]
pub struct Sigma1<'a> {
    pub initiator_random: &'a [u8],
    pub initiator_sessid: u16,
    pub dest_id: &'a [u8],
    pub initiator_eph_pub_key: &'a [u8],
    pub resumption_id: Option<&'a [u8]>,
    pub resume1_mic: Option<&'a [u8]>,
}

impl<'a> Sigma1<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        Self::decode_strict(buf).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8]) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;

        let initiator_random = sized(
            next_ctx(&mut reader, sigma1_tags::INITIATOR_RANDOM)?.slice()?,
            CASE_RANDOM_LEN,
        )?;
        let initiator_sessid = next_ctx(&mut reader, sigma1_tags::INITIATOR_SESSID)?.u16()?;
        let dest_id = sized(
            next_ctx(&mut reader, sigma1_tags::DEST_ID)?.slice()?,
            crypto::SHA256_HASH_LEN_BYTES,
        )?;
        let initiator_eph_pub_key = sized(
            next_ctx(&mut reader, sigma1_tags::INITIATOR_EPH_PUB_KEY)?.slice()?,
            crypto::EC_POINT_LEN_BYTES,
        )?;

        // Optional members start here
        let mut elem = reader.next()?;

        if elem.value != ElementValue::EndContainer
            && elem.ctx_tag()? == sigma1_tags::MRP_PARAMS
        {
            // Not consumed by the handshake; skip it wholesale
            reader.skip(&elem)?;
            elem = reader.next()?;
        }

        let mut resumption_id = None;
        if elem.value != ElementValue::EndContainer
            && elem.ctx_tag()? == sigma1_tags::RESUMPTION_ID
        {
            resumption_id = Some(sized(elem.slice()?, CASE_RESUMPTION_ID_LEN)?);
            elem = reader.next()?;
        }

        let mut resume1_mic = None;
        if elem.value != ElementValue::EndContainer && elem.ctx_tag()? == sigma1_tags::RESUME1_MIC
        {
            resume1_mic = Some(sized(elem.slice()?, crypto::AEAD_MIC_LEN_BYTES)?);
            elem = reader.next()?;
        }

        if elem.value != ElementValue::EndContainer {
            Err(ErrorCode::TLVNotFound)?;
        }

        // The resumption tags travel as a pair
        if resumption_id.is_some() != resume1_mic.is_some() {
            Err(ErrorCode::InvalidCaseParameter)?;
        }

        Ok(Self {
            initiator_random,
            initiator_sessid,
            dest_id,
            initiator_eph_pub_key,
            resumption_id,
            resume1_mic,
        })
    }

    pub fn resumption_requested(&self) -> bool {
        self.resumption_id.is_some()
    }
}

#[derive(Debug)]
pub struct Sigma2<'a> {
    pub responder_random: &'a [u8],
    pub responder_sessid: u16,
    pub responder_eph_pub_key: &'a [u8],
    pub encrypted2: &'a [u8],
}

impl<'a> Sigma2<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        Self::decode_strict(buf).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8]) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;

        let responder_random = sized(next_ctx(&mut reader, 1)?.slice()?, CASE_RANDOM_LEN)?;
        let responder_sessid = next_ctx(&mut reader, 2)?.u16()?;
        let responder_eph_pub_key =
            sized(next_ctx(&mut reader, 3)?.slice()?, crypto::EC_POINT_LEN_BYTES)?;
        let encrypted2 = encrypted_section(next_ctx(&mut reader, 4)?.slice()?)?;

        Ok(Self {
            responder_random,
            responder_sessid,
            responder_eph_pub_key,
            encrypted2,
        })
    }
}

#[derive(Debug)]
pub struct Sigma3<'a> {
    pub encrypted3: &'a [u8],
}

impl<'a> Sigma3<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        Self::decode_strict(buf).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8]) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;
        let encrypted3 = encrypted_section(next_ctx(&mut reader, 1)?.slice()?)?;

        Ok(Self { encrypted3 })
    }
}

#[derive(Debug)]
pub struct Sigma2Resume<'a> {
    pub resumption_id: &'a [u8],
    pub sigma2_resume_mic: &'a [u8],
    pub responder_sessid: u16,
}

impl<'a> Sigma2Resume<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        Self::decode_strict(buf).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8]) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;

        let resumption_id = sized(next_ctx(&mut reader, 1)?.slice()?, CASE_RESUMPTION_ID_LEN)?;
        let sigma2_resume_mic =
            sized(next_ctx(&mut reader, 2)?.slice()?, crypto::AEAD_MIC_LEN_BYTES)?;
        let responder_sessid = next_ctx(&mut reader, 3)?.u16()?;

        Ok(Self {
            resumption_id,
            sigma2_resume_mic,
            responder_sessid,
        })
    }
}

/// The decrypted contents of the Sigma2/Sigma3 encrypted sections
#[derive(Debug)]
pub struct TbeData<'a> {
    pub noc: &'a [u8],
    pub icac: Option<&'a [u8]>,
    pub signature: &'a [u8],
    pub resumption_id: Option<&'a [u8]>,
}

impl<'a> TbeData<'a> {
    /// Decode a decrypted TBE section. `expect_resumption_id` is set for
    /// Sigma2, whose section additionally carries the fresh resumption id.
    pub fn decode(buf: &'a [u8], expect_resumption_id: bool) -> Result<Self, Error> {
        Self::decode_strict(buf, expect_resumption_id).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8], expect_resumption_id: bool) -> Result<Self, Error> {
        let mut reader = read_root_struct(buf)?;

        let noc_elem = next_ctx(&mut reader, tbe_tags::SENDER_NOC)?;
        let noc = noc_elem.slice()?;
        if noc.is_empty() {
            Err(ErrorCode::InvalidData)?;
        }

        let mut elem = reader.next()?;
        let mut icac = None;
        if elem.value != ElementValue::EndContainer && elem.ctx_tag()? == tbe_tags::SENDER_ICAC {
            icac = Some(elem.slice()?);
            elem = reader.next()?;
        }

        if elem.ctx_tag()? != tbe_tags::SIGNATURE {
            Err(ErrorCode::TLVNotFound)?;
        }
        let signature = sized(elem.slice()?, crypto::EC_SIGNATURE_LEN_BYTES)?;

        let mut resumption_id = None;
        if expect_resumption_id {
            let elem = next_ctx(&mut reader, tbe_tags::RESUMPTION_ID)?;
            resumption_id = Some(sized(elem.slice()?, CASE_RESUMPTION_ID_LEN)?);
        }

        Ok(Self {
            noc,
            icac,
            signature,
            resumption_id,
        })
    }
}

/// General code marking a successful Status Report
pub const GENERAL_CODE_SUCCESS: u16 = 0;
/// General code marking a failed Status Report
pub const GENERAL_CODE_FAILURE: u16 = 1;

/// A Status Report: the little-endian fixed-layout trailer that closes a
/// handshake, successfully or not. Unlike the Sigma messages this is not
/// a tagged structure.
///
/// The general code carries the coarse outcome and the protocol code the
/// CASE-specific reason; whatever the peer sent is preserved raw, since
/// any non-success combination has to be understood as a failure.
#[derive(Debug, Clone)]
pub struct StatusReport<'a> {
    pub general_code: u16,
    pub proto_id: u32,
    pub proto_code: u16,
    pub proto_data: &'a [u8],
}

impl<'a> StatusReport<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        Self::decode_strict(buf).map_err(Error::map_case_parameter)
    }

    fn decode_strict(buf: &'a [u8]) -> Result<Self, Error> {
        let mut pb = ParseBuf::new(buf);

        Ok(Self {
            general_code: pb.le_u16()?,
            proto_id: pb.le_u32()?,
            proto_code: pb.le_u16()?,
            proto_data: pb.as_slice(),
        })
    }

    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u16(self.general_code)?;
        wb.le_u32(self.proto_id)?;
        wb.le_u16(self.proto_code)?;
        wb.copy_from_slice(self.proto_data)
    }

    pub fn is_success(&self) -> bool {
        self.general_code == GENERAL_CODE_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{TLVWriter, TagType};

    fn build_sigma1(
        buf: &mut [u8],
        resumption_id: Option<&[u8]>,
        resume1_mic: Option<&[u8]>,
        mrp_params: bool,
    ) -> usize {
        let mut wb = WriteBuf::new(buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str8(TagType::Context(1), &[0x11; 32]).unwrap();
        tw.u16(TagType::Context(2), 0x1234).unwrap();
        tw.str8(TagType::Context(3), &[0x22; 32]).unwrap();
        tw.str8(TagType::Context(4), &[0x33; 65]).unwrap();
        if mrp_params {
            tw.start_struct(TagType::Context(5)).unwrap();
            tw.u32(TagType::Context(1), 5000).unwrap();
            tw.u32(TagType::Context(2), 300).unwrap();
            tw.end_container().unwrap();
        }
        if let Some(id) = resumption_id {
            tw.str8(TagType::Context(6), id).unwrap();
        }
        if let Some(mic) = resume1_mic {
            tw.str8(TagType::Context(7), mic).unwrap();
        }
        tw.end_container().unwrap();

        wb.get_tail()
    }

    #[test]
    fn test_sigma1_decode() {
        let mut buf = [0; 256];
        let len = build_sigma1(&mut buf, None, None, false);

        let msg = Sigma1::decode(&buf[..len]).unwrap();
        assert_eq!(msg.initiator_random, [0x11; 32]);
        assert_eq!(msg.initiator_sessid, 0x1234);
        assert_eq!(msg.dest_id, [0x22; 32]);
        assert_eq!(msg.initiator_eph_pub_key, [0x33; 65]);
        assert!(!msg.resumption_requested());
    }

    #[test]
    fn test_sigma1_skips_mrp_params() {
        let mut buf = [0; 256];
        let len = build_sigma1(&mut buf, Some(&[0x44; 16]), Some(&[0x55; 16]), true);

        let msg = Sigma1::decode(&buf[..len]).unwrap();
        assert!(msg.resumption_requested());
        assert_eq!(msg.resumption_id.unwrap(), [0x44; 16]);
        assert_eq!(msg.resume1_mic.unwrap(), [0x55; 16]);
    }

    #[test]
    fn test_sigma1_lone_resumption_tag_rejected() {
        let mut buf = [0; 256];

        let len = build_sigma1(&mut buf, Some(&[0x44; 16]), None, false);
        assert_eq!(
            Sigma1::decode(&buf[..len]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );

        let len = build_sigma1(&mut buf, None, Some(&[0x55; 16]), false);
        assert_eq!(
            Sigma1::decode(&buf[..len]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }

    #[test]
    fn test_sigma1_wrong_random_len_rejected() {
        let mut buf = [0; 256];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str8(TagType::Context(1), &[0x11; 31]).unwrap();
        tw.u16(TagType::Context(2), 0x1234).unwrap();
        tw.str8(TagType::Context(3), &[0x22; 32]).unwrap();
        tw.str8(TagType::Context(4), &[0x33; 65]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        assert_eq!(
            Sigma1::decode(&buf[..len]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }

    #[test]
    fn test_sigma1_missing_mandatory_tag_rejected() {
        let mut buf = [0; 256];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str8(TagType::Context(1), &[0x11; 32]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        assert_eq!(
            Sigma1::decode(&buf[..len]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }

    #[test]
    fn test_sigma2_decode() {
        let mut buf = [0; 256];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str8(TagType::Context(1), &[0x66; 32]).unwrap();
        tw.u16(TagType::Context(2), 0xbeef).unwrap();
        tw.str8(TagType::Context(3), &[0x77; 65]).unwrap();
        tw.str16(TagType::Context(4), &[0x88; 48]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        let msg = Sigma2::decode(&buf[..len]).unwrap();
        assert_eq!(msg.responder_random, [0x66; 32]);
        assert_eq!(msg.responder_sessid, 0xbeef);
        assert_eq!(msg.responder_eph_pub_key, [0x77; 65]);
        assert_eq!(msg.encrypted2, [0x88; 48]);
    }

    #[test]
    fn test_sigma2_undersized_encrypted_rejected() {
        let mut buf = [0; 256];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str8(TagType::Context(1), &[0x66; 32]).unwrap();
        tw.u16(TagType::Context(2), 0xbeef).unwrap();
        tw.str8(TagType::Context(3), &[0x77; 65]).unwrap();
        // Exactly one AEAD tag's worth of data carries no plaintext
        tw.str8(TagType::Context(4), &[0x88; 16]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        assert_eq!(
            Sigma2::decode(&buf[..len]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }

    #[test]
    fn test_tbe_decode_with_and_without_icac() {
        let mut buf = [0; 512];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str16(TagType::Context(1), &[0xa1; 100]).unwrap();
        tw.str8(TagType::Context(3), &[0x5d; 64]).unwrap();
        tw.str8(TagType::Context(4), &[0x1d; 16]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        let tbe = TbeData::decode(&buf[..len], true).unwrap();
        assert!(tbe.icac.is_none());
        assert_eq!(tbe.signature, [0x5d; 64]);
        assert_eq!(tbe.resumption_id.unwrap(), [0x1d; 16]);
    }

    #[test]
    fn test_tbe_missing_resumption_id_rejected() {
        let mut buf = [0; 512];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.str16(TagType::Context(1), &[0xaa; 100]).unwrap();
        tw.str8(TagType::Context(3), &[0x5d; 64]).unwrap();
        tw.end_container().unwrap();
        let len = wb.get_tail();

        // Fine for Sigma3, not for Sigma2
        assert!(TbeData::decode(&buf[..len], false).is_ok());
        assert_eq!(
            TbeData::decode(&buf[..len], true).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }

    #[test]
    fn test_status_report_round_trip() {
        let report = StatusReport {
            general_code: GENERAL_CODE_FAILURE,
            proto_id: 0x0000,
            proto_code: 0x0003,
            proto_data: &[0xde, 0xad],
        };

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        report.encode(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [1, 0, 0, 0, 0, 0, 3, 0, 0xde, 0xad]);

        let parsed = StatusReport::decode(wb.as_slice()).unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.proto_id, 0);
        assert_eq!(parsed.proto_code, 3);
        assert_eq!(parsed.proto_data, [0xde, 0xad]);
    }

    #[test]
    fn test_status_report_success() {
        let buf = [0, 0, 0, 0, 0, 0, 0, 0];
        let parsed = StatusReport::decode(&buf).unwrap();
        assert!(parsed.is_success());
        assert!(parsed.proto_data.is_empty());
    }

    #[test]
    fn test_status_report_truncated() {
        assert_eq!(
            StatusReport::decode(&[0, 0, 0, 0]).unwrap_err().code(),
            ErrorCode::InvalidCaseParameter
        );
    }
}
