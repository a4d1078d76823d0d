//! Base-128 varint and zig-zag coding.
//!
//! 64-bit varints work on the two halves of an [`Int64`] instead of a
//! native integer, splitting the value into 28/28/8-bit parts for length
//! calculation.

use crate::error::{Error, Result};
use crate::long::Int64;

/// Longest possible varint encoding (a 64-bit value)
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes needed to encode `value` as a varint
pub const fn varint32_len(value: u32) -> usize {
    if value < 1 << 7 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 21 {
        3
    } else if value < 1 << 28 {
        4
    } else {
        5
    }
}

/// Number of bytes needed to encode `value` as a varint
pub fn varint64_len(value: Int64) -> usize {
    let part0 = value.low();
    let part1 = (value.low() >> 28) | (value.high() << 4);
    let part2 = value.high() >> 24;

    if part2 == 0 {
        if part1 == 0 {
            if part0 < 1 << 14 {
                if part0 < 1 << 7 {
                    1
                } else {
                    2
                }
            } else if part0 < 1 << 21 {
                3
            } else {
                4
            }
        } else if part1 < 1 << 14 {
            if part1 < 1 << 7 {
                5
            } else {
                6
            }
        } else if part1 < 1 << 21 {
            7
        } else {
            8
        }
    } else if part2 < 1 << 7 {
        9
    } else {
        10
    }
}

/// Writes `value` at `buf[pos..]`, returning the position after it.
///
/// The caller sizes `buf` with [`varint32_len`].
pub fn write_varint32(buf: &mut [u8], mut pos: usize, mut value: u32) -> usize {
    while value > 127 {
        buf[pos] = (value & 127) as u8 | 128;
        value >>= 7;
        pos += 1;
    }
    buf[pos] = value as u8;
    pos + 1
}

/// Writes `value` at `buf[pos..]`, returning the position after it.
///
/// The caller sizes `buf` with [`varint64_len`].
pub fn write_varint64(buf: &mut [u8], mut pos: usize, value: Int64) -> usize {
    let mut low = value.low();
    let mut high = value.high();
    while high != 0 {
        buf[pos] = (low & 127) as u8 | 128;
        low = (low >> 7) | (high << 25);
        high >>= 7;
        pos += 1;
    }
    while low > 127 {
        buf[pos] = (low & 127) as u8 | 128;
        low >>= 7;
        pos += 1;
    }
    buf[pos] = low as u8;
    pos + 1
}

/// Appends the varint encoding of `value` to `out`
pub fn encode_u32(value: u32, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + varint32_len(value), 0);
    write_varint32(out, start, value);
}

/// Appends the varint encoding of `value` to `out`
pub fn encode_u64(value: Int64, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + varint64_len(value), 0);
    write_varint64(out, start, value);
}

fn byte_at(buf: &[u8], start: usize, index: usize) -> Result<u32> {
    buf.get(start + index)
        .map(|&b| u32::from(b))
        .ok_or(Error::TruncatedVarint { offset: start })
}

/// Decodes a 32-bit varint starting at `buf[pos]`.
///
/// Returns the value and the number of bytes consumed. Groups beyond
/// the 32nd bit are read and discarded, so a sign-extended 10-byte
/// negative `int32` decodes to its low 32 bits.
pub fn decode_u32(buf: &[u8], pos: usize) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let b = byte_at(buf, pos, i)?;
        value |= (b & 127) << (7 * i);
        if b < 128 {
            return Ok((value, i + 1));
        }
    }
    for i in 5..MAX_VARINT_LEN {
        if byte_at(buf, pos, i)? < 128 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::MalformedVarint { offset: pos })
}

/// Decodes a 64-bit varint starting at `buf[pos]` into an unsigned [`Int64`].
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u64(buf: &[u8], pos: usize) -> Result<(Int64, usize)> {
    let mut low: u32 = 0;
    let mut high: u32 = 0;

    for i in 0..4 {
        let b = byte_at(buf, pos, i)?;
        low |= (b & 127) << (7 * i);
        if b < 128 {
            return Ok((Int64::from_parts(low, high, true), i + 1));
        }
    }

    let b = byte_at(buf, pos, 4)?;
    low |= (b & 127) << 28;
    high |= (b & 127) >> 4;
    if b < 128 {
        return Ok((Int64::from_parts(low, high, true), 5));
    }

    for i in 0..5 {
        let b = byte_at(buf, pos, 5 + i)?;
        high |= (b & 127) << (7 * i + 3);
        if b < 128 {
            return Ok((Int64::from_parts(low, high, true), 6 + i));
        }
    }

    Err(Error::MalformedVarint { offset: pos })
}

/// Zig-zag encodes a signed 32-bit integer
pub const fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Reverses [`zigzag_encode32`]
pub const fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Zig-zag encodes a signed 64-bit integer, producing an unsigned value
pub fn zigzag_encode64(n: Int64) -> Int64 {
    n.shift_left(1).xor(n.shift_right(63)).to_unsigned()
}

/// Reverses [`zigzag_encode64`], producing a signed value
pub fn zigzag_decode64(n: Int64) -> Int64 {
    let n = n.to_signed();
    n.shift_right_unsigned(1).xor(n.and(Int64::ONE).negate())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded32(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        encode_u32(value, &mut out);
        out
    }

    #[test]
    fn test_varint32_thresholds() {
        for (value, len) in [
            (0u32, 1usize),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (268_435_455, 4),
            (268_435_456, 5),
            (u32::MAX, 5),
        ] {
            assert_eq!(varint32_len(value), len, "length of {value}");
            let bytes = encoded32(value);
            assert_eq!(bytes.len(), len);
            assert_eq!(decode_u32(&bytes, 0).unwrap(), (value, len));
        }
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encoded32(1), [0x01]);
        assert_eq!(encoded32(150), [0x96, 0x01]);
        assert_eq!(encoded32(300), [0xAC, 0x02]);
    }

    #[test]
    fn test_varint64() {
        let mut out = Vec::new();
        encode_u64(Int64::MAX_UNSIGNED_VALUE, &mut out);
        assert_eq!(out, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(
            decode_u64(&out, 0).unwrap(),
            (Int64::MAX_UNSIGNED_VALUE, 10)
        );

        for shift in 0..64 {
            let value = Int64::from_u64(1u64 << shift);
            let mut out = Vec::new();
            encode_u64(value, &mut out);
            assert_eq!(out.len(), varint64_len(value), "length of 1 << {shift}");
            assert_eq!(decode_u64(&out, 0).unwrap(), (value, out.len()));
        }
    }

    #[test]
    fn test_negative_int32_decodes_from_ten_bytes() {
        let mut out = Vec::new();
        encode_u64(Int64::from_int(-1, false), &mut out);
        assert_eq!(out.len(), 10);
        let (value, len) = decode_u32(&out, 0).unwrap();
        assert_eq!(value as i32, -1);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_truncated_and_malformed() {
        assert!(matches!(
            decode_u32(&[0x80, 0x80], 0),
            Err(Error::TruncatedVarint { offset: 0 })
        ));
        assert!(matches!(
            decode_u64(&[0x08, 0xFF], 1),
            Err(Error::TruncatedVarint { offset: 1 })
        ));
        let overlong = [0xFFu8; 11];
        assert!(matches!(
            decode_u64(&overlong, 0),
            Err(Error::MalformedVarint { .. })
        ));
        assert!(matches!(
            decode_u32(&overlong, 0),
            Err(Error::MalformedVarint { .. })
        ));
    }

    #[test]
    fn test_zigzag32() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
        assert_eq!(zigzag_encode32(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        for n in [0, 1, -1, 12345, -12345, i32::MAX, i32::MIN] {
            assert_eq!(zigzag_decode32(zigzag_encode32(n)), n);
        }
    }

    #[test]
    fn test_zigzag64() {
        assert_eq!(zigzag_encode64(Int64::NEG_ONE).as_u64(), 1);
        assert_eq!(zigzag_encode64(Int64::ONE).as_u64(), 2);
        assert_eq!(zigzag_encode64(Int64::MIN_VALUE), Int64::MAX_UNSIGNED_VALUE);
        for n in [0i64, 1, -1, 1 << 40, -(1 << 40), i64::MAX, i64::MIN] {
            let value = Int64::from_i64(n);
            assert_eq!(zigzag_decode64(zigzag_encode64(value)), value);
        }
    }
}
