//! 64-bit integer value type stored as two 32-bit halves.
//!
//! [`Int64`] is what the codec hands out for every field whose wire
//! representation exceeds 32 bits (`int64`, `uint64`, `sint64`, `fixed64`,
//! `sfixed64`). Both halves always hold their unsigned bit pattern; the
//! `unsigned` tag only changes how the value compares and formats.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Largest magnitude an `f64` represents exactly (2^53 - 1)
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// An immutable 64-bit integer built from a low and a high 32-bit half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Int64 {
    low: u32,
    high: u32,
    unsigned: bool,
}

impl Int64 {
    /// Signed zero
    pub const ZERO: Int64 = Int64::from_parts(0, 0, false);
    /// Unsigned zero
    pub const UZERO: Int64 = Int64::from_parts(0, 0, true);
    /// Signed one
    pub const ONE: Int64 = Int64::from_parts(1, 0, false);
    /// Signed minus one
    pub const NEG_ONE: Int64 = Int64::from_parts(u32::MAX, u32::MAX, false);
    /// Smallest signed value, -2^63
    pub const MIN_VALUE: Int64 = Int64::from_parts(0, 0x8000_0000, false);
    /// Largest signed value, 2^63 - 1
    pub const MAX_VALUE: Int64 = Int64::from_parts(u32::MAX, 0x7fff_ffff, false);
    /// Largest unsigned value, 2^64 - 1
    pub const MAX_UNSIGNED_VALUE: Int64 = Int64::from_parts(u32::MAX, u32::MAX, true);

    /// Creates a value from its two halves
    pub const fn from_parts(low: u32, high: u32, unsigned: bool) -> Self {
        Self {
            low,
            high,
            unsigned,
        }
    }

    /// Creates a value from a 32-bit integer, sign-extending it
    pub const fn from_int(value: i32, unsigned: bool) -> Self {
        let high = if value < 0 { u32::MAX } else { 0 };
        Self::from_parts(value as u32, high, unsigned)
    }

    /// Creates a signed value from a native `i64`
    pub const fn from_i64(value: i64) -> Self {
        Self::from_parts(value as u32, (value >> 32) as u32, false)
    }

    /// Creates an unsigned value from a native `u64`
    pub const fn from_u64(value: u64) -> Self {
        Self::from_parts(value as u32, (value >> 32) as u32, true)
    }

    /// Creates a value from a float, saturating at the representable range.
    /// NaN maps to zero.
    pub fn from_f64(value: f64, unsigned: bool) -> Self {
        if unsigned {
            Self::from_u64(value as u64)
        } else {
            Self::from_i64(value as i64)
        }
    }

    /// Parses a string in the given radix (2..=36).
    ///
    /// A leading `-` negates the result, wrapping for unsigned values.
    /// Overlong inputs wrap modulo 2^64.
    pub fn from_str_radix(input: &str, unsigned: bool, radix: u32) -> Result<Self> {
        let parse_error = |reason: &str| Error::ParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if !(2..=36).contains(&radix) {
            return Err(parse_error("radix out of range"));
        }

        let (negative, digits) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        if digits.is_empty() {
            return Err(parse_error("empty string"));
        }

        let mut magnitude: u64 = 0;
        for c in digits.chars() {
            let digit = c
                .to_digit(radix)
                .ok_or_else(|| parse_error("invalid digit"))?;
            magnitude = magnitude
                .wrapping_mul(u64::from(radix))
                .wrapping_add(u64::from(digit));
        }

        let value = Self::from_parts(magnitude as u32, (magnitude >> 32) as u32, unsigned);
        Ok(if negative { value.negate() } else { value })
    }

    /// Reassembles a value from its 8-byte representation
    pub fn from_bytes(bytes: [u8; 8], unsigned: bool, little_endian: bool) -> Self {
        let bits = if little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        };
        Self::from_parts(bits as u32, (bits >> 32) as u32, unsigned)
    }

    /// Low 32 bits
    pub const fn low(&self) -> u32 {
        self.low
    }

    /// High 32 bits
    pub const fn high(&self) -> u32 {
        self.high
    }

    /// Whether this value is interpreted as unsigned
    pub const fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    /// Raw bit pattern as an unsigned native integer
    pub const fn as_u64(&self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }

    /// Raw bit pattern as a signed native integer
    pub const fn as_i64(&self) -> i64 {
        self.as_u64() as i64
    }

    /// Same bits, signed interpretation
    pub const fn to_signed(self) -> Self {
        Self::from_parts(self.low, self.high, false)
    }

    /// Same bits, unsigned interpretation
    pub const fn to_unsigned(self) -> Self {
        Self::from_parts(self.low, self.high, true)
    }

    /// Whether the value is zero
    pub const fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    /// Whether the value is below zero (never true for unsigned values)
    pub const fn is_negative(&self) -> bool {
        !self.unsigned && self.high & 0x8000_0000 != 0
    }

    /// Whether the lowest bit is set
    pub const fn is_odd(&self) -> bool {
        self.low & 1 == 1
    }

    /// Whether the value survives a round trip through `f64`
    pub fn is_safe_integer(&self) -> bool {
        if self.is_negative() {
            self.as_i64().unsigned_abs() <= MAX_SAFE_INTEGER
        } else {
            self.as_u64() <= MAX_SAFE_INTEGER
        }
    }

    /// Nearest `f64`
    pub fn to_f64(&self) -> f64 {
        if self.unsigned {
            self.as_u64() as f64
        } else {
            self.as_i64() as f64
        }
    }

    /// Wrapping addition of the two halves with carry
    pub fn add(self, other: Self) -> Self {
        let low = u64::from(self.low) + u64::from(other.low);
        let carry = (low >> 32) as u32;
        let high = self
            .high
            .wrapping_add(other.high)
            .wrapping_add(carry);
        Self::from_parts(low as u32, high, self.unsigned)
    }

    /// Wrapping subtraction
    pub fn subtract(self, other: Self) -> Self {
        self.add(other.negate())
    }

    /// Two's-complement negation; `MIN_VALUE.negate() == MIN_VALUE`
    pub fn negate(self) -> Self {
        self.not().add(Self::from_parts(1, 0, self.unsigned))
    }

    /// Bitwise NOT
    pub fn not(self) -> Self {
        Self::from_parts(!self.low, !self.high, self.unsigned)
    }

    /// Bitwise AND
    pub fn and(self, other: Self) -> Self {
        Self::from_parts(self.low & other.low, self.high & other.high, self.unsigned)
    }

    /// Bitwise OR
    pub fn or(self, other: Self) -> Self {
        Self::from_parts(self.low | other.low, self.high | other.high, self.unsigned)
    }

    /// Bitwise XOR
    pub fn xor(self, other: Self) -> Self {
        Self::from_parts(self.low ^ other.low, self.high ^ other.high, self.unsigned)
    }

    /// Left shift by `bits % 64`
    pub fn shift_left(self, bits: u32) -> Self {
        let bits = bits & 63;
        match bits {
            0 => self,
            1..=31 => Self::from_parts(
                self.low << bits,
                (self.high << bits) | (self.low >> (32 - bits)),
                self.unsigned,
            ),
            _ => Self::from_parts(0, self.low << (bits - 32), self.unsigned),
        }
    }

    /// Arithmetic right shift by `bits % 64`
    pub fn shift_right(self, bits: u32) -> Self {
        let bits = bits & 63;
        let high = self.high as i32;
        match bits {
            0 => self,
            1..=31 => Self::from_parts(
                (self.low >> bits) | (self.high << (32 - bits)),
                (high >> bits) as u32,
                self.unsigned,
            ),
            _ => Self::from_parts(
                (high >> (bits - 32)) as u32,
                if high >= 0 { 0 } else { u32::MAX },
                self.unsigned,
            ),
        }
    }

    /// Logical right shift by `bits % 64`
    pub fn shift_right_unsigned(self, bits: u32) -> Self {
        let bits = bits & 63;
        match bits {
            0 => self,
            1..=31 => Self::from_parts(
                (self.low >> bits) | (self.high << (32 - bits)),
                self.high >> bits,
                self.unsigned,
            ),
            32 => Self::from_parts(self.high, 0, self.unsigned),
            _ => Self::from_parts(self.high >> (bits - 32), 0, self.unsigned),
        }
    }

    /// Sign- and signedness-aware comparison.
    ///
    /// A negative signed value sorts below any non-negative value. When
    /// either side is unsigned the bit patterns compare as unsigned.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ if !self.unsigned && !other.unsigned => self.as_i64().cmp(&other.as_i64()),
            _ => self.as_u64().cmp(&other.as_u64()),
        }
    }

    /// Wrapping multiplication
    pub fn multiply(self, other: Self) -> Self {
        let product = self.as_u64().wrapping_mul(other.as_u64());
        Self::from_parts(product as u32, (product >> 32) as u32, self.unsigned)
    }

    /// Truncating division; `MIN_VALUE / -1 == MIN_VALUE`
    pub fn divide(self, other: Self) -> Result<Self> {
        if other.is_zero() {
            return Err(Error::DivisionByZero);
        }
        if self.unsigned {
            Ok(Self::from_u64(self.as_u64() / other.as_u64()))
        } else {
            Ok(Self::from_i64(self.as_i64().wrapping_div(other.as_i64())))
        }
    }

    /// Remainder of truncating division
    pub fn modulo(self, other: Self) -> Result<Self> {
        if other.is_zero() {
            return Err(Error::DivisionByZero);
        }
        if self.unsigned {
            Ok(Self::from_u64(self.as_u64() % other.as_u64()))
        } else {
            Ok(Self::from_i64(self.as_i64().wrapping_rem(other.as_i64())))
        }
    }

    /// Formats the value in the given radix (2..=36)
    pub fn to_string_radix(&self, radix: u32) -> Result<String> {
        if !(2..=36).contains(&radix) {
            return Err(Error::ParseError {
                input: radix.to_string(),
                reason: "radix out of range".to_string(),
            });
        }

        let negative = self.is_negative();
        let mut magnitude = if negative {
            self.as_i64().unsigned_abs()
        } else {
            self.as_u64()
        };

        if magnitude == 0 {
            return Ok("0".to_string());
        }

        let mut digits = Vec::with_capacity(65);
        while magnitude > 0 {
            digits.push(DIGITS[(magnitude % u64::from(radix)) as usize]);
            magnitude /= u64::from(radix);
        }
        if negative {
            digits.push(b'-');
        }
        digits.reverse();
        Ok(digits.into_iter().map(char::from).collect())
    }

    /// The 8-byte representation
    pub fn to_bytes(&self, little_endian: bool) -> [u8; 8] {
        if little_endian {
            self.as_u64().to_le_bytes()
        } else {
            self.as_u64().to_be_bytes()
        }
    }
}

impl fmt::Display for Int64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "{}", self.as_i64())
        } else {
            write!(f, "{}", self.as_u64())
        }
    }
}

impl FromStr for Int64 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_radix(s, false, 10)
    }
}

impl From<i64> for Int64 {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<u64> for Int64 {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<i32> for Int64 {
    fn from(value: i32) -> Self {
        Self::from_int(value, false)
    }
}

impl From<u32> for Int64 {
    fn from(value: u32) -> Self {
        Self::from_parts(value, 0, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves() {
        let v = Int64::from_i64(-2);
        assert_eq!(v.low(), 0xffff_fffe);
        assert_eq!(v.high(), 0xffff_ffff);
        assert!(v.is_negative());
        assert!(!v.to_unsigned().is_negative());
    }

    #[test]
    fn test_add_carries_into_high() {
        let a = Int64::from_parts(u32::MAX, 0, true);
        let sum = a.add(Int64::from_parts(1, 0, true));
        assert_eq!(sum.low(), 0);
        assert_eq!(sum.high(), 1);
        assert_eq!(Int64::MAX_UNSIGNED_VALUE.add(Int64::from(1u32)), Int64::UZERO);
    }

    #[test]
    fn test_negate_wraps_at_min() {
        assert_eq!(Int64::MIN_VALUE.negate(), Int64::MIN_VALUE);
        assert_eq!(Int64::ONE.negate(), Int64::NEG_ONE);
        assert_eq!(Int64::from_i64(12345).negate().as_i64(), -12345);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Int64::NEG_ONE.compare(&Int64::ONE), Ordering::Less);
        assert_eq!(
            Int64::MAX_UNSIGNED_VALUE.compare(&Int64::from_u64(1)),
            Ordering::Greater
        );
        assert_eq!(Int64::MIN_VALUE.compare(&Int64::MAX_VALUE), Ordering::Less);
        assert_eq!(Int64::from(7i32).compare(&Int64::from(7u32)), Ordering::Equal);
    }

    #[test]
    fn test_shifts() {
        let one = Int64::ONE;
        assert_eq!(one.shift_left(40).as_u64(), 1 << 40);
        assert_eq!(one.shift_left(64), one);
        assert_eq!(Int64::NEG_ONE.shift_right(40), Int64::NEG_ONE);
        assert_eq!(Int64::NEG_ONE.shift_right_unsigned(60).as_u64(), 0xf);
        assert_eq!(Int64::from_i64(-256).shift_right(4).as_i64(), -16);
        assert_eq!(Int64::from_u64(1 << 63).shift_right_unsigned(32).as_u64(), 1 << 31);
    }

    #[test]
    fn test_string_conversion() {
        let v = Int64::from_str_radix("-9223372036854775808", false, 10).unwrap();
        assert_eq!(v, Int64::MIN_VALUE);
        assert_eq!(v.to_string(), "-9223372036854775808");
        assert_eq!(
            Int64::MAX_UNSIGNED_VALUE.to_string_radix(16).unwrap(),
            "ffffffffffffffff"
        );
        assert_eq!(Int64::from_str_radix("ff", true, 16).unwrap().as_u64(), 255);
        assert_eq!("42".parse::<Int64>().unwrap().as_i64(), 42);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Int64::from_str_radix("", false, 10),
            Err(Error::ParseError { .. })
        ));
        assert!(Int64::from_str_radix("12x", false, 10).is_err());
        assert!(Int64::from_str_radix("1-2", false, 10).is_err());
        assert!(Int64::from_str_radix("1", false, 40).is_err());
    }

    #[test]
    fn test_multiply_and_divide() {
        let a = Int64::from_i64(-7);
        let b = Int64::from_i64(3);
        assert_eq!(a.multiply(b).as_i64(), -21);
        assert_eq!(a.divide(b).unwrap().as_i64(), -2);
        assert_eq!(a.modulo(b).unwrap().as_i64(), -1);
        assert_eq!(Int64::MIN_VALUE.divide(Int64::NEG_ONE).unwrap(), Int64::MIN_VALUE);
        assert!(matches!(a.divide(Int64::ZERO), Err(Error::DivisionByZero)));
    }

    #[test]
    fn test_bytes_and_floats() {
        let v = Int64::from_u64(0x0102_0304_0506_0708);
        assert_eq!(v.to_bytes(true), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(Int64::from_bytes(v.to_bytes(false), true, false), v);
        assert_eq!(Int64::from_f64(f64::NAN, false), Int64::ZERO);
        assert_eq!(Int64::from_f64(-1.0, true), Int64::UZERO);
        assert_eq!(Int64::from_f64(1e300, false), Int64::MAX_VALUE);
        assert!(Int64::from_i64(1 << 53).to_f64() > 0.0);
        assert!(!Int64::from_i64(1 << 53).is_safe_integer());
        assert!(Int64::from_i64(-(1 << 52)).is_safe_integer());
    }
}
