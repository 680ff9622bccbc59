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

//! The narrow view of the message-exchange substrate the handshake
//! consumes. The substrate owns reliability, ordering and the response
//! timer; the session only sends payloads and is called back with inbound
//! messages and timer expiry.

use core::fmt;
use core::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use crate::error::Error;

/// A non-owning identifier for an exchange; the session stores this
/// instead of a reference so that terminal transitions can null it out
/// without creating an ownership cycle with the exchange's dispatcher
pub type ExchangeId = u32;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageMeta {
    pub proto_id: u16,
    pub proto_opcode: u8,
    pub reliable: bool,
}

impl MessageMeta {
    pub const fn new(proto_id: u16, proto_opcode: u8, reliable: bool) -> Self {
        Self {
            proto_id,
            proto_opcode,
            reliable,
        }
    }

    pub fn opcode<T: num::FromPrimitive>(&self) -> Option<T> {
        num::FromPrimitive::from_u8(self.proto_opcode)
    }
}

/// The transport address of a peer. Opaque to the handshake; recorded in
/// the session for the consumer's benefit.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum Address {
    Udp(SocketAddr),
}

impl Address {
    pub fn unspecified() -> Self {
        Self::Udp(SocketAddr::V6(SocketAddrV6::new(
            Ipv6Addr::UNSPECIFIED,
            0,
            0,
            0,
        )))
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Udp(addr) => write!(f, "UDP {}", addr),
        }
    }
}

/// An active message exchange with a peer.
///
/// `send_message` with `expects_response` set arms the substrate's reply
/// timer; its expiry is delivered back to the session as `on_timeout`.
pub trait Exchange {
    fn id(&self) -> ExchangeId;

    fn send_message(
        &mut self,
        meta: MessageMeta,
        payload: &[u8],
        expects_response: bool,
    ) -> Result<(), Error>;

    fn close(&mut self);
}
