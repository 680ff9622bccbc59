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

use crate::error::*;
use crate::utils::writebuf::WriteBuf;

use super::*;

pub struct TLVWriter<'a, 'b> {
    buf: &'b mut WriteBuf<'a>,
}

impl<'a, 'b> TLVWriter<'a, 'b> {
    pub fn new(buf: &'b mut WriteBuf<'a>) -> Self {
        Self { buf }
    }

    fn put_control(&mut self, tag: TagType, value_type: u8) -> Result<(), Error> {
        match tag {
            TagType::Anonymous => {
                self.buf
                    .le_u8((TAG_CTRL_ANONYMOUS << TAG_SHIFT_BITS) | value_type)
            }
            TagType::Context(ctx) => {
                self.buf
                    .le_u8((TAG_CTRL_CONTEXT << TAG_SHIFT_BITS) | value_type)?;
                self.buf.le_u8(ctx)
            }
        }
    }

    pub fn u8(&mut self, tag: TagType, data: u8) -> Result<(), Error> {
        self.put_control(tag, TYPE_U8)?;
        self.buf.le_u8(data)
    }

    /// Write an unsigned 16-bit value, compacted to a U8 element when the
    /// value fits
    pub fn u16(&mut self, tag: TagType, data: u16) -> Result<(), Error> {
        if data <= u8::MAX as u16 {
            self.u8(tag, data as u8)
        } else {
            self.put_control(tag, TYPE_U16)?;
            self.buf.le_u16(data)
        }
    }

    pub fn u32(&mut self, tag: TagType, data: u32) -> Result<(), Error> {
        if data <= u16::MAX as u32 {
            self.u16(tag, data as u16)
        } else {
            self.put_control(tag, TYPE_U32)?;
            self.buf.le_u32(data)
        }
    }

    pub fn u64(&mut self, tag: TagType, data: u64) -> Result<(), Error> {
        if data <= u32::MAX as u64 {
            self.u32(tag, data as u32)
        } else {
            self.put_control(tag, TYPE_U64)?;
            self.buf.le_u64(data)
        }
    }

    pub fn bool(&mut self, tag: TagType, data: bool) -> Result<(), Error> {
        self.put_control(tag, if data { TYPE_TRUE } else { TYPE_FALSE })
    }

    /// Write an octet string with a one-byte length
    pub fn str8(&mut self, tag: TagType, data: &[u8]) -> Result<(), Error> {
        if data.len() > u8::MAX as usize {
            return Err(ErrorCode::InvalidArgument.into());
        }
        self.put_control(tag, TYPE_STR8L)?;
        self.buf.le_u8(data.len() as u8)?;
        self.buf.copy_from_slice(data)
    }

    /// Write an octet string with a two-byte length
    pub fn str16(&mut self, tag: TagType, data: &[u8]) -> Result<(), Error> {
        if data.len() > u16::MAX as usize {
            return Err(ErrorCode::InvalidArgument.into());
        }
        self.put_control(tag, TYPE_STR16L)?;
        self.buf.le_u16(data.len() as u16)?;
        self.buf.copy_from_slice(data)
    }

    /// Write an octet string, choosing the shortest length form
    pub fn str(&mut self, tag: TagType, data: &[u8]) -> Result<(), Error> {
        if data.len() <= u8::MAX as usize {
            self.str8(tag, data)
        } else {
            self.str16(tag, data)
        }
    }

    pub fn start_struct(&mut self, tag: TagType) -> Result<(), Error> {
        self.put_control(tag, TYPE_STRUCT)
    }

    pub fn end_container(&mut self) -> Result<(), Error> {
        self.buf
            .le_u8((TAG_CTRL_ANONYMOUS << TAG_SHIFT_BITS) | TYPE_END_CNT)
    }

    pub fn get_tail(&self) -> usize {
        self.buf.get_tail()
    }
}
