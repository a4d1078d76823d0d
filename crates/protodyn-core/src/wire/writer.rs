use super::varint::{
    varint32_len, varint64_len, write_varint32, write_varint64, zigzag_encode32, zigzag_encode64,
};
use super::{make_tag, WireType};
use crate::long::Int64;
use bytes::Bytes;

/// A queued write: the payload plus its encoded byte length
#[derive(Debug, Clone)]
struct Op {
    len: usize,
    kind: OpKind,
}

#[derive(Debug, Clone)]
enum OpKind {
    Varint32(u32),
    Varint64(Int64),
    Fixed32(u32),
    Fixed64(Int64),
    Float(f32),
    Double(f64),
    Raw(Bytes),
}

impl Op {
    fn write(&self, buf: &mut [u8], pos: usize) -> usize {
        match &self.kind {
            OpKind::Varint32(v) => write_varint32(buf, pos, *v),
            OpKind::Varint64(v) => write_varint64(buf, pos, *v),
            OpKind::Fixed32(v) => put(buf, pos, &v.to_le_bytes()),
            OpKind::Fixed64(v) => put(buf, pos, &v.to_bytes(true)),
            OpKind::Float(v) => put(buf, pos, &v.to_le_bytes()),
            OpKind::Double(v) => put(buf, pos, &v.to_le_bytes()),
            OpKind::Raw(b) => put(buf, pos, b),
        }
    }
}

fn put(buf: &mut [u8], pos: usize, bytes: &[u8]) -> usize {
    buf[pos..pos + bytes.len()].copy_from_slice(bytes);
    pos + bytes.len()
}

/// Operation chain saved by [`Writer::fork`]
#[derive(Debug, Default)]
struct State {
    ops: Vec<Op>,
    len: usize,
}

/// An append-only encoder that defers byte production until [`finish`](Writer::finish).
///
/// Every write queues an operation and adds its size to a running total,
/// so the output buffer is allocated exactly once at the right size.
/// [`fork`](Writer::fork) and [`ldelim`](Writer::ldelim) length-prefix a
/// nested message without encoding it twice.
#[derive(Debug, Default)]
pub struct Writer {
    ops: Vec<Op>,
    len: usize,
    states: Vec<State>,
}

impl Writer {
    /// Creates an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes queued on the current chain
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been queued on the current chain
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, len: usize, kind: OpKind) -> &mut Self {
        self.ops.push(Op { len, kind });
        self.len += len;
        self
    }

    /// Writes a field tag
    pub fn tag(&mut self, id: u32, wire_type: WireType) -> &mut Self {
        self.uint32(make_tag(id, wire_type))
    }

    /// Writes an unsigned 32-bit varint
    pub fn uint32(&mut self, value: u32) -> &mut Self {
        self.push(varint32_len(value), OpKind::Varint32(value))
    }

    /// Writes a signed 32-bit varint; negative values take 10 bytes
    pub fn int32(&mut self, value: i32) -> &mut Self {
        if value < 0 {
            self.push(10, OpKind::Varint64(Int64::from_int(value, false)))
        } else {
            self.uint32(value as u32)
        }
    }

    /// Writes a zig-zag encoded 32-bit varint
    pub fn sint32(&mut self, value: i32) -> &mut Self {
        self.uint32(zigzag_encode32(value))
    }

    /// Writes an unsigned 64-bit varint
    pub fn uint64(&mut self, value: impl Into<Int64>) -> &mut Self {
        let value = value.into();
        self.push(varint64_len(value), OpKind::Varint64(value))
    }

    /// Writes a signed 64-bit varint
    pub fn int64(&mut self, value: impl Into<Int64>) -> &mut Self {
        self.uint64(value)
    }

    /// Writes a zig-zag encoded 64-bit varint
    pub fn sint64(&mut self, value: impl Into<Int64>) -> &mut Self {
        self.uint64(zigzag_encode64(value.into()))
    }

    /// Writes a boolean varint
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.push(1, OpKind::Varint32(u32::from(value)))
    }

    /// Writes 4 little-endian bytes
    pub fn fixed32(&mut self, value: u32) -> &mut Self {
        self.push(4, OpKind::Fixed32(value))
    }

    /// Writes 4 little-endian bytes
    pub fn sfixed32(&mut self, value: i32) -> &mut Self {
        self.fixed32(value as u32)
    }

    /// Writes 8 little-endian bytes
    pub fn fixed64(&mut self, value: impl Into<Int64>) -> &mut Self {
        self.push(8, OpKind::Fixed64(value.into()))
    }

    /// Writes 8 little-endian bytes
    pub fn sfixed64(&mut self, value: impl Into<Int64>) -> &mut Self {
        self.fixed64(value)
    }

    /// Writes a little-endian `float`
    pub fn float(&mut self, value: f32) -> &mut Self {
        self.push(4, OpKind::Float(value))
    }

    /// Writes a little-endian `double`
    pub fn double(&mut self, value: f64) -> &mut Self {
        self.push(8, OpKind::Double(value))
    }

    /// Writes a length-prefixed byte run
    pub fn bytes(&mut self, value: impl Into<Bytes>) -> &mut Self {
        let value = value.into();
        let len = value.len();
        self.uint32(len as u32);
        if len > 0 {
            self.push(len, OpKind::Raw(value));
        }
        self
    }

    /// Writes a length-prefixed UTF-8 string
    pub fn string(&mut self, value: &str) -> &mut Self {
        self.bytes(Bytes::copy_from_slice(value.as_bytes()))
    }

    /// Starts a new operation chain, saving the current one
    pub fn fork(&mut self) -> &mut Self {
        let saved = State {
            ops: std::mem::take(&mut self.ops),
            len: self.len,
        };
        self.states.push(saved);
        self.len = 0;
        self
    }

    /// Drops the current chain and restores the last forked one.
    /// Without a saved chain the writer is emptied.
    pub fn reset(&mut self) -> &mut Self {
        match self.states.pop() {
            Some(state) => {
                self.ops = state.ops;
                self.len = state.len;
            }
            None => {
                self.ops.clear();
                self.len = 0;
            }
        }
        self
    }

    /// Restores the last forked chain, appending the current chain to it
    /// behind a varint of its byte length
    pub fn ldelim(&mut self) -> &mut Self {
        let ops = std::mem::take(&mut self.ops);
        let len = self.len;
        self.reset();
        self.uint32(len as u32);
        self.ops.extend(ops);
        self.len += len;
        self
    }

    /// Produces the encoded bytes with a single allocation and empties the writer
    pub fn finish(&mut self) -> Bytes {
        let mut buf = vec![0u8; self.len];
        let mut pos = 0;
        for op in &self.ops {
            let next = op.write(&mut buf, pos);
            debug_assert_eq!(next - pos, op.len);
            pos = next;
        }
        self.ops.clear();
        self.len = 0;
        self.states.clear();
        Bytes::from(buf)
    }
}
