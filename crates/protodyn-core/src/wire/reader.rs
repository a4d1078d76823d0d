use super::varint::{decode_u32, decode_u64, zigzag_decode32, zigzag_decode64};
use super::{split_tag, WireType};
use crate::codec::RECURSION_LIMIT;
use crate::error::{Error, Result};
use crate::long::Int64;
use bytes::Bytes;

/// A cursor over an immutable byte buffer.
///
/// Construction never copies: the reader shares the [`Bytes`] it is given,
/// and length-delimited reads hand back views into the same storage.
#[derive(Debug, Clone)]
pub struct Reader {
    buf: Bytes,
    pos: usize,
    len: usize,
}

impl Reader {
    /// Creates a reader over `buf`
    pub fn new(buf: impl Into<Bytes>) -> Self {
        let buf = buf.into();
        let len = buf.len();
        Self { buf, pos: 0, len }
    }

    /// Creates a reader over a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Current read position
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total readable length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Whether every byte has been consumed
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.len
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.pos + needed > self.len {
            return Err(Error::buffer_overrun(self.pos, needed, self.remaining()));
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads a varint as an unsigned 32-bit value
    pub fn uint32(&mut self) -> Result<u32> {
        let (value, consumed) = decode_u32(&self.buf[..self.len], self.pos)?;
        self.pos += consumed;
        Ok(value)
    }

    /// Reads a varint as a signed 32-bit value
    pub fn int32(&mut self) -> Result<i32> {
        self.uint32().map(|v| v as i32)
    }

    /// Reads a zig-zag encoded varint as a signed 32-bit value
    pub fn sint32(&mut self) -> Result<i32> {
        self.uint32().map(zigzag_decode32)
    }

    /// Reads a varint as an unsigned 64-bit value
    pub fn uint64(&mut self) -> Result<Int64> {
        let (value, consumed) = decode_u64(&self.buf[..self.len], self.pos)?;
        self.pos += consumed;
        Ok(value)
    }

    /// Reads a varint as a signed 64-bit value
    pub fn int64(&mut self) -> Result<Int64> {
        self.uint64().map(Int64::to_signed)
    }

    /// Reads a zig-zag encoded varint as a signed 64-bit value
    pub fn sint64(&mut self) -> Result<Int64> {
        self.uint64().map(zigzag_decode64)
    }

    /// Reads a varint as a boolean
    pub fn bool(&mut self) -> Result<bool> {
        self.uint64().map(|v| !v.is_zero())
    }

    /// Reads 4 little-endian bytes as an unsigned value
    pub fn fixed32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    /// Reads 4 little-endian bytes as a signed value
    pub fn sfixed32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    /// Reads 8 little-endian bytes as an unsigned value
    pub fn fixed64(&mut self) -> Result<Int64> {
        self.take::<8>().map(|b| Int64::from_bytes(b, true, true))
    }

    /// Reads 8 little-endian bytes as a signed value
    pub fn sfixed64(&mut self) -> Result<Int64> {
        self.take::<8>().map(|b| Int64::from_bytes(b, false, true))
    }

    /// Reads a little-endian `float`
    pub fn float(&mut self) -> Result<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    /// Reads a little-endian `double`
    pub fn double(&mut self) -> Result<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }

    /// Reads a length-prefixed byte run, returned as a view into the buffer
    pub fn bytes(&mut self) -> Result<Bytes> {
        let length = self.uint32()? as usize;
        self.slice(length)
    }

    /// Takes the next `length` bytes as a view, with no length prefix
    pub fn slice(&mut self, length: usize) -> Result<Bytes> {
        self.ensure(length)?;
        let start = self.pos;
        self.pos += length;
        Ok(self.buf.slice(start..self.pos))
    }

    /// Reads a length-prefixed UTF-8 string
    pub fn string(&mut self) -> Result<String> {
        let offset = self.pos;
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::InvalidUtf8 { offset })
    }

    /// Reads a tag, returning the field id and wire type
    pub fn tag(&mut self) -> Result<(u32, WireType)> {
        let offset = self.pos;
        let (id, wire_type) = split_tag(self.uint32()?);
        let wire_type = WireType::try_from(wire_type)
            .map_err(|_| Error::InvalidWireType { wire_type, offset })?;
        Ok((id, wire_type))
    }

    /// Skips `length` bytes, or a single varint when `length` is `None`
    pub fn skip(&mut self, length: Option<usize>) -> Result<()> {
        match length {
            Some(length) => {
                self.ensure(length)?;
                self.pos += length;
            }
            None => {
                self.uint64()?;
            }
        }
        Ok(())
    }

    /// Skips the payload of a field of the given wire type.
    ///
    /// A start-group skips nested fields until the next end-group tag. The
    /// closing tag's id is not known here, so any id closes the outer
    /// group; use [`Reader::skip_field`] when the opening tag was read.
    pub fn skip_type(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => self.skip(None),
            WireType::I64 => self.skip(Some(8)),
            WireType::Len => {
                let length = self.uint32()? as usize;
                self.skip(Some(length))
            }
            WireType::StartGroup => self.skip_group(None, 0),
            WireType::I32 => self.skip(Some(4)),
            WireType::EndGroup => Err(Error::InvalidWireType {
                wire_type: WireType::EndGroup as u32,
                offset: self.pos,
            }),
        }
    }

    /// Skips the payload of field `id`, whose tag has just been read.
    ///
    /// Groups must close with an end-group tag for the same id, and may
    /// nest at most [`RECURSION_LIMIT`] levels below `depth`.
    pub fn skip_field(&mut self, id: u32, wire_type: WireType, depth: usize) -> Result<()> {
        match wire_type {
            WireType::StartGroup => self.skip_group(Some(id), depth),
            other => self.skip_type(other),
        }
    }

    fn skip_group(&mut self, id: Option<u32>, depth: usize) -> Result<()> {
        if depth > RECURSION_LIMIT {
            return Err(Error::RecursionLimit {
                limit: RECURSION_LIMIT,
                offset: self.pos,
            });
        }
        loop {
            let offset = self.pos;
            let (inner_id, inner) = self.tag()?;
            match inner {
                WireType::EndGroup if id.map_or(true, |id| id == inner_id) => return Ok(()),
                WireType::EndGroup => {
                    return Err(Error::InvalidWireType {
                        wire_type: WireType::EndGroup as u32,
                        offset,
                    })
                }
                WireType::StartGroup => self.skip_group(Some(inner_id), depth + 1)?,
                other => self.skip_type(other)?,
            }
        }
    }
}
