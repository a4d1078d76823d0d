//! Low-level protobuf wire format.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field id and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: SGROUP/EGROUP (legacy groups)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! [`Reader`] and [`Writer`] are the two cursors the codec drives; the
//! free functions in [`varint`] do the byte-level work for both.

mod reader;
pub mod varint;
mod writer;

use crate::error::{Error, Result};

pub use reader::Reader;
pub use writer::Writer;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u32> for WireType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::InvalidWireType {
                wire_type: value,
                offset: 0,
            }),
        }
    }
}

/// Maximum valid protobuf field id (2^29 - 1)
pub const MAX_FIELD_ID: u32 = 536_870_911;

/// Builds a tag varint value from a field id and wire type
pub const fn make_tag(id: u32, wire_type: WireType) -> u32 {
    (id << 3) | wire_type as u32
}

/// Splits a tag into its field id and raw wire type bits
pub const fn split_tag(tag: u32) -> (u32, u32) {
    (tag >> 3, tag & 7)
}
