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

use core::convert::TryInto;

use crate::error::*;

/// A buffer for reading little-endian data from a byte slice.
pub struct ParseBuf<'a> {
    buf: &'a [u8],
    read_off: usize,
}

impl<'a> ParseBuf<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, read_off: 0 }
    }

    // Return the data that is yet to be parsed as a slice
    pub fn as_slice(&self) -> &'a [u8] {
        &self.buf[self.read_off..]
    }

    pub fn parsed_as_slice(&self) -> &'a [u8] {
        &self.buf[..self.read_off]
    }

    pub fn left(&self) -> usize {
        self.buf.len() - self.read_off
    }

    fn parse_head_with<F, R>(&mut self, size: usize, f: F) -> Result<R, Error>
    where
        F: FnOnce(&Self) -> R,
    {
        if self.left() >= size {
            let data = f(self);
            self.read_off += size;
            return Ok(data);
        }
        Err(ErrorCode::TruncatedPacket.into())
    }

    pub fn bytes(&mut self, size: usize) -> Result<&'a [u8], Error> {
        if self.left() >= size {
            let data = &self.buf[self.read_off..self.read_off + size];
            self.read_off += size;
            return Ok(data);
        }
        Err(ErrorCode::TruncatedPacket.into())
    }

    pub fn le_u8(&mut self) -> Result<u8, Error> {
        self.parse_head_with(1, |x| x.buf[x.read_off])
    }

    pub fn le_u16(&mut self) -> Result<u16, Error> {
        self.parse_head_with(2, |x| {
            u16::from_le_bytes(x.buf[x.read_off..x.read_off + 2].try_into().unwrap())
        })
    }

    pub fn le_u32(&mut self) -> Result<u32, Error> {
        self.parse_head_with(4, |x| {
            u32::from_le_bytes(x.buf[x.read_off..x.read_off + 4].try_into().unwrap())
        })
    }

    pub fn le_u64(&mut self) -> Result<u64, Error> {
        self.parse_head_with(8, |x| {
            u64::from_le_bytes(x.buf[x.read_off..x.read_off + 8].try_into().unwrap())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ParseBuf;

    #[test]
    fn test_parse_with_success() {
        let test_slice = [0x01, 65, 0, 0xbe, 0xba, 0xfe, 0xca, 0xa, 0xb, 0xc, 0xd];
        let mut buf = ParseBuf::new(&test_slice);

        assert_eq!(buf.le_u8().unwrap(), 0x01);
        assert_eq!(buf.le_u16().unwrap(), 65);
        assert_eq!(buf.le_u32().unwrap(), 0xcafebabe);
        assert_eq!(buf.as_slice(), [0xa, 0xb, 0xc, 0xd]);
    }

    #[test]
    fn test_parse_with_overrun() {
        let test_slice = [0x01, 65];
        let mut buf = ParseBuf::new(&test_slice);

        assert_eq!(buf.le_u8().unwrap(), 0x01);

        assert!(buf.le_u16().is_err());
        assert!(buf.le_u32().is_err());

        // Now consume the leftover byte
        assert_eq!(buf.le_u8().unwrap(), 65);

        assert!(buf.le_u8().is_err());
        assert_eq!(buf.as_slice(), [] as [u8; 0]);
    }

    #[test]
    fn test_parsed_as_slice() {
        let test_slice = [0x01, 65, 0, 0xbe, 0xba, 0xfe, 0xca];
        let mut buf = ParseBuf::new(&test_slice);

        assert_eq!(buf.parsed_as_slice(), [] as [u8; 0]);
        assert_eq!(buf.le_u8().unwrap(), 0x1);
        assert_eq!(buf.le_u16().unwrap(), 65);
        assert_eq!(buf.le_u32().unwrap(), 0xcafebabe);
        assert_eq!(buf.parsed_as_slice(), [0x01, 65, 0, 0xbe, 0xba, 0xfe, 0xca]);
    }
}
