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

//! A compact TLV codec for the tagged binary structures exchanged during
//! the handshake: anonymous outer structs with context-numbered fields.
//!
//! The element encoding is the standard one: a control byte carrying the
//! tag form in its upper three bits and the value type in the lower five,
//! followed by the tag payload, the length (for strings) and the value,
//! all little-endian.

/* Tag Types */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TagType {
    Anonymous,
    Context(u8),
}

pub const TAG_SHIFT_BITS: u8 = 5;
pub const TAG_MASK: u8 = 0xe0;
pub const TYPE_MASK: u8 = 0x1f;

pub(crate) const TAG_CTRL_ANONYMOUS: u8 = 0x00;
pub(crate) const TAG_CTRL_CONTEXT: u8 = 0x01;

pub(crate) const TYPE_S8: u8 = 0x00;
pub(crate) const TYPE_S16: u8 = 0x01;
pub(crate) const TYPE_S32: u8 = 0x02;
pub(crate) const TYPE_S64: u8 = 0x03;
pub(crate) const TYPE_U8: u8 = 0x04;
pub(crate) const TYPE_U16: u8 = 0x05;
pub(crate) const TYPE_U32: u8 = 0x06;
pub(crate) const TYPE_U64: u8 = 0x07;
pub(crate) const TYPE_FALSE: u8 = 0x08;
pub(crate) const TYPE_TRUE: u8 = 0x09;
pub(crate) const TYPE_F32: u8 = 0x0a;
pub(crate) const TYPE_F64: u8 = 0x0b;
pub(crate) const TYPE_UTF8L: u8 = 0x0c;
pub(crate) const TYPE_UTF16L: u8 = 0x0d;
pub(crate) const TYPE_STR8L: u8 = 0x10;
pub(crate) const TYPE_STR16L: u8 = 0x11;
pub(crate) const TYPE_STR32L: u8 = 0x12;
pub(crate) const TYPE_NULL: u8 = 0x14;
pub(crate) const TYPE_STRUCT: u8 = 0x15;
pub(crate) const TYPE_ARRAY: u8 = 0x16;
pub(crate) const TYPE_LIST: u8 = 0x17;
pub(crate) const TYPE_END_CNT: u8 = 0x18;

mod parser;
mod writer;

pub use parser::*;
pub use writer::*;
