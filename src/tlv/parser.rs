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
use crate::utils::parsebuf::ParseBuf;

use super::*;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ElementValue<'a> {
    Uint(u64),
    Int(i64),
    Bool(bool),
    F32(f32),
    F64(f64),
    Str(&'a [u8]),
    Utf(&'a [u8]),
    Null,
    Struct,
    Array,
    List,
    EndContainer,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TLVElement<'a> {
    pub tag: TagType,
    pub value: ElementValue<'a>,
}

impl<'a> TLVElement<'a> {
    pub fn ctx_tag(&self) -> Result<u8, Error> {
        match self.tag {
            TagType::Context(ctx) => Ok(ctx),
            _ => Err(ErrorCode::TLVNotFound.into()),
        }
    }

    pub fn u8(&self) -> Result<u8, Error> {
        match self.value {
            ElementValue::Uint(v) if v <= u8::MAX as u64 => Ok(v as u8),
            ElementValue::Uint(_) => Err(ErrorCode::InvalidData.into()),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u16(&self) -> Result<u16, Error> {
        match self.value {
            ElementValue::Uint(v) if v <= u16::MAX as u64 => Ok(v as u16),
            ElementValue::Uint(_) => Err(ErrorCode::InvalidData.into()),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u32(&self) -> Result<u32, Error> {
        match self.value {
            ElementValue::Uint(v) if v <= u32::MAX as u64 => Ok(v as u32),
            ElementValue::Uint(_) => Err(ErrorCode::InvalidData.into()),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u64(&self) -> Result<u64, Error> {
        match self.value {
            ElementValue::Uint(v) => Ok(v),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn slice(&self) -> Result<&'a [u8], Error> {
        match self.value {
            ElementValue::Str(s) => Ok(s),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn bool(&self) -> Result<bool, Error> {
        match self.value {
            ElementValue::Bool(b) => Ok(b),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn is_container_start(&self) -> bool {
        matches!(
            self.value,
            ElementValue::Struct | ElementValue::Array | ElementValue::List
        )
    }
}

/// A strict cursor over a TLV stream. Only anonymous and context tags are
/// accepted; any malformed element aborts the parse.
pub struct TLVReader<'a> {
    pb: ParseBuf<'a>,
}

impl<'a> TLVReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { pb: ParseBuf::new(buf) }
    }

    /// Read the next element from the stream
    pub fn next(&mut self) -> Result<TLVElement<'a>, Error> {
        let control = self.pb.le_u8()?;

        let tag = match control >> TAG_SHIFT_BITS {
            TAG_CTRL_ANONYMOUS => TagType::Anonymous,
            TAG_CTRL_CONTEXT => TagType::Context(self.pb.le_u8()?),
            _ => return Err(ErrorCode::TLVTypeMismatch.into()),
        };

        let value = match control & TYPE_MASK {
            TYPE_S8 => ElementValue::Int(self.pb.le_u8()? as i8 as i64),
            TYPE_S16 => ElementValue::Int(self.pb.le_u16()? as i16 as i64),
            TYPE_S32 => ElementValue::Int(self.pb.le_u32()? as i32 as i64),
            TYPE_S64 => ElementValue::Int(self.pb.le_u64()? as i64),
            TYPE_U8 => ElementValue::Uint(self.pb.le_u8()? as u64),
            TYPE_U16 => ElementValue::Uint(self.pb.le_u16()? as u64),
            TYPE_U32 => ElementValue::Uint(self.pb.le_u32()? as u64),
            TYPE_U64 => ElementValue::Uint(self.pb.le_u64()?),
            TYPE_FALSE => ElementValue::Bool(false),
            TYPE_TRUE => ElementValue::Bool(true),
            TYPE_F32 => ElementValue::F32(f32::from_le_bytes(
                self.pb.bytes(4)?.try_into().unwrap(),
            )),
            TYPE_F64 => ElementValue::F64(f64::from_le_bytes(
                self.pb.bytes(8)?.try_into().unwrap(),
            )),
            TYPE_UTF8L => {
                let len = self.pb.le_u8()? as usize;
                ElementValue::Utf(self.pb.bytes(len)?)
            }
            TYPE_UTF16L => {
                let len = self.pb.le_u16()? as usize;
                ElementValue::Utf(self.pb.bytes(len)?)
            }
            TYPE_STR8L => {
                let len = self.pb.le_u8()? as usize;
                ElementValue::Str(self.pb.bytes(len)?)
            }
            TYPE_STR16L => {
                let len = self.pb.le_u16()? as usize;
                ElementValue::Str(self.pb.bytes(len)?)
            }
            TYPE_STR32L => {
                let len = self.pb.le_u32()? as usize;
                ElementValue::Str(self.pb.bytes(len)?)
            }
            TYPE_NULL => ElementValue::Null,
            TYPE_STRUCT => ElementValue::Struct,
            TYPE_ARRAY => ElementValue::Array,
            TYPE_LIST => ElementValue::List,
            TYPE_END_CNT => ElementValue::EndContainer,
            _ => return Err(ErrorCode::TLVTypeMismatch.into()),
        };

        Ok(TLVElement { tag, value })
    }

    /// Skip over the given element; consumes the whole container when the
    /// element is a container start
    pub fn skip(&mut self, element: &TLVElement) -> Result<(), Error> {
        if !element.is_container_start() {
            // Scalar payloads were already consumed by `next`
            return Ok(());
        }

        let mut depth = 1_usize;
        while depth > 0 {
            let elem = self.next()?;
            if elem.is_container_start() {
                depth += 1;
            } else if elem.value == ElementValue::EndContainer {
                depth -= 1;
            }
        }

        Ok(())
    }
}

/// Position a reader inside the mandatory anonymous outer struct of a
/// handshake message
pub fn read_root_struct(buf: &[u8]) -> Result<TLVReader<'_>, Error> {
    let mut reader = TLVReader::new(buf);
    let elem = reader.next()?;
    if elem.tag != TagType::Anonymous || elem.value != ElementValue::Struct {
        Err(ErrorCode::TLVTypeMismatch)?;
    }
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::writebuf::WriteBuf;

    #[test]
    fn test_write_parse_round_trip() {
        let mut buf = [0; 128];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.u8(TagType::Context(1), 0x17).unwrap();
        tw.u16(TagType::Context(2), 0xcafe).unwrap();
        tw.u64(TagType::Context(3), 0x1122334455667788).unwrap();
        tw.str8(TagType::Context(4), &[0xaa, 0xbb]).unwrap();
        tw.bool(TagType::Context(5), true).unwrap();
        tw.end_container().unwrap();

        let len = wb.get_tail();
        let mut reader = read_root_struct(&buf[..len]).unwrap();

        let elem = reader.next().unwrap();
        assert_eq!(elem.ctx_tag().unwrap(), 1);
        assert_eq!(elem.u8().unwrap(), 0x17);

        let elem = reader.next().unwrap();
        assert_eq!(elem.ctx_tag().unwrap(), 2);
        assert_eq!(elem.u16().unwrap(), 0xcafe);

        let elem = reader.next().unwrap();
        assert_eq!(elem.ctx_tag().unwrap(), 3);
        assert_eq!(elem.u64().unwrap(), 0x1122334455667788);

        let elem = reader.next().unwrap();
        assert_eq!(elem.slice().unwrap(), &[0xaa, 0xbb]);

        let elem = reader.next().unwrap();
        assert!(elem.bool().unwrap());

        let elem = reader.next().unwrap();
        assert_eq!(elem.value, ElementValue::EndContainer);
    }

    #[test]
    fn test_u16_compaction() {
        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        // Small values shrink to a U8 element; the typed accessor still
        // reads them back at the requested width
        tw.u16(TagType::Context(2), 0x42).unwrap();
        let len = wb.get_tail();
        assert_eq!(&buf[..len], &[0x24, 2, 0x42]);

        let mut reader = TLVReader::new(&buf[..len]);
        assert_eq!(reader.next().unwrap().u16().unwrap(), 0x42);
    }

    #[test]
    fn test_out_of_range_integer() {
        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.u32(TagType::Context(1), 0x10000).unwrap();
        let len = wb.get_tail();

        let mut reader = TLVReader::new(&buf[..len]);
        let elem = reader.next().unwrap();
        assert_eq!(elem.u16().unwrap_err().code(), ErrorCode::InvalidData);
        assert_eq!(elem.u32().unwrap(), 0x10000);
    }

    #[test]
    fn test_wrong_type() {
        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.str8(TagType::Context(1), &[1, 2, 3]).unwrap();
        let len = wb.get_tail();

        let mut reader = TLVReader::new(&buf[..len]);
        let elem = reader.next().unwrap();
        assert_eq!(elem.u16().unwrap_err().code(), ErrorCode::TLVTypeMismatch);
    }

    #[test]
    fn test_truncated() {
        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.str8(TagType::Context(1), &[1, 2, 3, 4, 5, 6]).unwrap();
        let len = wb.get_tail();

        let mut reader = TLVReader::new(&buf[..len - 2]);
        assert_eq!(
            reader.next().unwrap_err().code(),
            ErrorCode::TruncatedPacket
        );
    }

    #[test]
    fn test_skip_nested_container() {
        let mut buf = [0; 64];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.start_struct(TagType::Context(5)).unwrap();
        tw.u32(TagType::Context(1), 5000).unwrap();
        tw.start_struct(TagType::Context(2)).unwrap();
        tw.u8(TagType::Context(1), 1).unwrap();
        tw.end_container().unwrap();
        tw.end_container().unwrap();
        tw.u8(TagType::Context(6), 0x66).unwrap();
        tw.end_container().unwrap();

        let len = wb.get_tail();
        let mut reader = read_root_struct(&buf[..len]).unwrap();

        let elem = reader.next().unwrap();
        assert_eq!(elem.ctx_tag().unwrap(), 5);
        assert!(elem.is_container_start());
        reader.skip(&elem).unwrap();

        let elem = reader.next().unwrap();
        assert_eq!(elem.ctx_tag().unwrap(), 6);
        assert_eq!(elem.u8().unwrap(), 0x66);
    }
}
