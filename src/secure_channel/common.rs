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

use num_derive::FromPrimitive;

use crate::error::Error;
use crate::transport::{Exchange, MessageMeta};
use crate::utils::writebuf::WriteBuf;

use super::case::msgs::{StatusReport, GENERAL_CODE_FAILURE, GENERAL_CODE_SUCCESS};

/* Secure Channel protocol ID */
pub const PROTO_ID_SECURE_CHANNEL: u16 = 0x00;

#[derive(FromPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpCode {
    CASESigma1 = 0x30,
    CASESigma2 = 0x31,
    CASESigma3 = 0x32,
    CASESigma2Resume = 0x33,
    StatusReport = 0x40,
}

impl OpCode {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            proto_id: PROTO_ID_SECURE_CHANNEL,
            proto_opcode: *self as u8,
            reliable: true,
        }
    }
}

impl From<OpCode> for MessageMeta {
    fn from(op: OpCode) -> Self {
        op.meta()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SCStatusCodes {
    SessionEstablishmentSuccess = 0x0000,
    InvalidParameter = 0x0002,
    NoSharedTrustRoots = 0x0003,
}

impl SCStatusCodes {
    pub fn as_report<'a>(&self, payload: &'a [u8]) -> StatusReport<'a> {
        let general_code = match self {
            SCStatusCodes::SessionEstablishmentSuccess => GENERAL_CODE_SUCCESS,
            SCStatusCodes::InvalidParameter | SCStatusCodes::NoSharedTrustRoots => {
                GENERAL_CODE_FAILURE
            }
        };

        StatusReport {
            general_code,
            proto_id: PROTO_ID_SECURE_CHANNEL as u32,
            proto_code: *self as u16,
            proto_data: payload,
        }
    }
}

/// Send a Status Report with the given status code over the exchange. No
/// reply is expected to a status report.
pub fn complete_with_status(
    exchange: &mut dyn Exchange,
    status_code: SCStatusCodes,
    payload: &[u8],
) -> Result<(), Error> {
    let mut buf = [0; 64];
    let mut wb = WriteBuf::new(&mut buf);
    status_code.as_report(payload).encode(&mut wb)?;

    exchange.send_message(OpCode::StatusReport.meta(), wb.as_slice(), false)
}
