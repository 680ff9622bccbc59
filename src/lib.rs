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

//! Native Rust implementation of the CASE handshake
//!
//! CASE (Certificate Authenticated Session Establishment) is the
//! mutually-authenticated key agreement protocol that two commissioned
//! devices on the same fabric run over an unreliable message exchange to
//! derive a shared symmetric secret, a pair of session identifiers and a
//! transcript digest binding the resulting encrypted channel.
//!
//! This crate implements the handshake core: the Sigma1/2/3 state machine
//! with the Sigma2Resume fast path, the message codec, the key schedule,
//! operational credential verification and the resumption record store.
//! The message exchange substrate, network discovery and the encrypted
//! channel itself are consumed through the narrow interfaces in
//! [`transport`].
//!
//! # Examples
//! ```
//! use rs_case::crypto::sys_rand;
//! use rs_case::secure_channel::case::CaseSession;
//!
//! // Arm a responder-side session; it will drive the handshake once the
//! // exchange layer starts feeding it Sigma1 messages via `on_message`.
//! let mut session = CaseSession::new(sys_rand);
//! session.listen(100).unwrap();
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

pub mod cert;
pub mod crypto;
pub mod error;
pub mod fabric;
pub mod secure_channel;
pub mod tlv;
pub mod transport;
pub mod utils;
