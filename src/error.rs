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

use core::array::TryFromSliceError;
use core::fmt;

use log::error;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// A null/absent input or an undersized caller-provided buffer
    InvalidArgument,
    /// A wire-format violation in a handshake message: missing mandatory
    /// tag, wrong element type, wrong length, out-of-range integer or an
    /// inconsistent optional-tag pair
    InvalidCaseParameter,
    /// A required precondition (fabric loaded, ephemeral key initialized,
    /// session established) is unmet
    IncorrectState,
    /// No fabric on this device matches the Sigma1 destination identifier
    KeyNotFound,
    /// The peer reported no shared trusted root, or our own credential
    /// validation failed to chain up to the fabric root
    NoSharedTrustedRoot,
    /// Signature verification failure
    InvalidSignature,
    /// AEAD tag verification failure
    InvalidMic,
    /// A message type that is not legal in the current handshake state
    InvalidMessageType,
    /// The response deadline expired
    Timeout,
    /// A serialized session carries an unsupported version byte
    VersionMismatch,
    /// Output buffer exhausted
    NoSpace,
    /// Input buffer exhausted
    TruncatedPacket,
    /// An expected TLV element was not found
    TLVNotFound,
    /// A TLV element has an unexpected type
    TLVTypeMismatch,
    /// Decoded data is structurally valid but semantically out of range
    InvalidData,
    /// Crypto backend failure
    Crypto,
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

pub struct Error {
    code: ErrorCode,
}

impl Error {
    pub const fn new(code: ErrorCode) -> Self {
        Self { code }
    }

    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn remap<F>(self, matcher: F, to: Self) -> Self
    where
        F: FnOnce(&Self) -> bool,
    {
        if matcher(&self) {
            to
        } else {
            self
        }
    }

    /// Narrow low-level parse errors into the wire-format violation error
    /// used at the message codec boundary.
    pub fn map_case_parameter(self) -> Self {
        self.remap(
            |e| {
                matches!(
                    e.code(),
                    ErrorCode::TLVNotFound
                        | ErrorCode::TLVTypeMismatch
                        | ErrorCode::TruncatedPacket
                        | ErrorCode::InvalidData
                )
            },
            Error::new(ErrorCode::InvalidCaseParameter),
        )
    }

    /// Narrow chain-validation failures into the no-shared-root error
    /// reported by the identity validator.
    pub fn map_no_shared_root(self) -> Self {
        self.remap(
            |e| {
                matches!(
                    e.code(),
                    ErrorCode::InvalidSignature | ErrorCode::InvalidData
                )
            },
            Error::new(ErrorCode::NoSharedTrustedRoot),
        )
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_e: TryFromSliceError) -> Self {
        Self::new(ErrorCode::InvalidData)
    }
}

impl From<ccm::aead::Error> for Error {
    fn from(e: ccm::aead::Error) -> Self {
        error!("Error in Crypto (AEAD): {}", e);
        Self::new(ErrorCode::Crypto)
    }
}

impl From<elliptic_curve::Error> for Error {
    fn from(e: elliptic_curve::Error) -> Self {
        error!("Error in Crypto (EC): {}", e);
        Self::new(ErrorCode::Crypto)
    }
}

impl From<p256::ecdsa::Error> for Error {
    fn from(e: p256::ecdsa::Error) -> Self {
        error!("Error in Crypto (p256_ECDSA): {}", e);
        Self::new(ErrorCode::Crypto)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error::{}", self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "{:?}", self.code())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
