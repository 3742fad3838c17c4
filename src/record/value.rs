//! Typed values and their serial codes.
//!
//! Each value in a stored record is tagged with a serial code that fixes
//! its stored width:
//!
//! | Code | Width | Meaning |
//! |---|---|---|
//! | 0 | 0 | NULL |
//! | 1,2,3,4 | 1,2,3,4 | signed LE integer of that width |
//! | 5 | 6 | signed 48-bit LE integer |
//! | 6 | 8 | signed 64-bit LE integer |
//! | 7 | 8 | big-endian IEEE-754 double |
//! | 8 | 0 | the integer 0 |
//! | 9 | 0 | the integer 1 |
//! | 10,11 | — | reserved, rejected on read |
//! | even ≥ 12 | (n−12)/2 | blob |
//! | odd ≥ 13 | (n−13)/2 | text |

use crate::error::{Result, StorageError};
use crate::types::bytes;
use std::borrow::Cow;

/// A single typed value inside a record.
///
/// Text and blob payloads are `Cow` slices: parsed records borrow the
/// page buffer they were read from, and `into_owned` deep-copies. A
/// borrowing value therefore cannot outlive its page by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(Cow<'a, [u8]>),
    Blob(Cow<'a, [u8]>),
}

impl<'a> Value<'a> {
    /// Text value borrowing a string
    pub fn text(s: &'a str) -> Self {
        Value::Text(Cow::Borrowed(s.as_bytes()))
    }

    /// Text value owning its bytes
    pub fn text_owned(s: impl Into<String>) -> Value<'static> {
        Value::Text(Cow::Owned(s.into().into_bytes()))
    }

    /// Blob value borrowing a byte slice
    pub fn blob(bytes: &'a [u8]) -> Self {
        Value::Blob(Cow::Borrowed(bytes))
    }

    /// Blob value owning its bytes
    pub fn blob_owned(bytes: impl Into<Vec<u8>>) -> Value<'static> {
        Value::Blob(Cow::Owned(bytes.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload as UTF-8, if this is a text value with valid encoding
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Raw byte payload of a text or blob value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(b) | Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// The serial code this value serializes under
    pub fn serial_code(&self) -> u64 {
        match self {
            Value::Null => 0,
            Value::Integer(0) => 8,
            Value::Integer(1) => 9,
            Value::Integer(v) => match bytes::int_width(*v) {
                1 => 1,
                2 => 2,
                3 => 3,
                4 => 4,
                6 => 5,
                _ => 6,
            },
            Value::Real(_) => 7,
            Value::Blob(b) => 12 + 2 * b.len() as u64,
            Value::Text(t) => 13 + 2 * t.len() as u64,
        }
    }

    /// Stored width of this value's body in bytes
    pub fn content_size(&self) -> usize {
        match self {
            Value::Null | Value::Integer(0) | Value::Integer(1) => 0,
            Value::Integer(v) => bytes::int_width(*v),
            Value::Real(_) => 8,
            Value::Text(b) | Value::Blob(b) => b.len(),
        }
    }

    /// Write this value's body into `out` (which must be exactly
    /// `content_size` bytes).
    pub(crate) fn write_content(&self, out: &mut [u8]) {
        match self {
            Value::Null | Value::Integer(0) | Value::Integer(1) => {}
            Value::Integer(v) => bytes::write_int_le(out, *v),
            Value::Real(f) => bytes::write_f64_be(out, *f),
            Value::Text(b) | Value::Blob(b) => out.copy_from_slice(b),
        }
    }

    /// Decode one value of the given serial code from the start of `body`.
    ///
    /// Returns the value and the number of body bytes consumed.
    pub(crate) fn from_serial(code: u64, body: &'a [u8]) -> Result<(Value<'a>, usize)> {
        let take = |n: usize| -> Result<&'a [u8]> {
            body.get(..n).ok_or_else(|| {
                StorageError::deserialize(format!(
                    "value of serial code {} needs {} bytes, {} available",
                    code,
                    n,
                    body.len()
                ))
            })
        };

        match code {
            0 => Ok((Value::Null, 0)),
            1..=6 => {
                let width = [1usize, 2, 3, 4, 6, 8][code as usize - 1];
                Ok((Value::Integer(bytes::read_int_le(take(width)?)), width))
            }
            7 => Ok((Value::Real(bytes::read_f64_be(take(8)?)), 8)),
            8 => Ok((Value::Integer(0), 0)),
            9 => Ok((Value::Integer(1), 0)),
            10 | 11 => Err(StorageError::deserialize(format!(
                "reserved serial code {}",
                code
            ))),
            _ => {
                let len = ((code - 12) / 2) as usize;
                let payload = Cow::Borrowed(take(len)?);
                let value = if code % 2 == 0 {
                    Value::Blob(payload)
                } else {
                    Value::Text(payload)
                };
                Ok((value, len))
            }
        }
    }

    /// Deep-copy any borrowed payload
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Null => Value::Null,
            Value::Integer(v) => Value::Integer(v),
            Value::Real(v) => Value::Real(v),
            Value::Text(b) => Value::Text(Cow::Owned(b.into_owned())),
            Value::Blob(b) => Value::Blob(Cow::Owned(b.into_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_serial_codes() {
        assert_eq!(Value::Integer(0).serial_code(), 8);
        assert_eq!(Value::Integer(1).serial_code(), 9);
        assert_eq!(Value::Integer(2).serial_code(), 1);
        assert_eq!(Value::Integer(-1).serial_code(), 1);
        assert_eq!(Value::Integer(1000).serial_code(), 2);
        assert_eq!(Value::Integer(100_000).serial_code(), 3);
        assert_eq!(Value::Integer(1 << 25).serial_code(), 4);
        assert_eq!(Value::Integer(1 << 40).serial_code(), 5);
        assert_eq!(Value::Integer(i64::MIN).serial_code(), 6);
    }

    #[test]
    fn test_literal_shortcuts_have_no_body() {
        assert_eq!(Value::Integer(0).content_size(), 0);
        assert_eq!(Value::Integer(1).content_size(), 0);
        assert_eq!(Value::Null.content_size(), 0);
    }

    #[test]
    fn test_text_blob_codes() {
        assert_eq!(Value::text("abc").serial_code(), 13 + 6);
        assert_eq!(Value::blob(&[1, 2, 3, 4]).serial_code(), 12 + 8);
        assert_eq!(Value::text("").serial_code(), 13);
        assert_eq!(Value::blob(&[]).serial_code(), 12);
    }

    #[test]
    fn test_reserved_codes_rejected() {
        assert!(Value::from_serial(10, &[]).is_err());
        assert!(Value::from_serial(11, &[]).is_err());
    }

    #[test]
    fn test_from_serial_truncated_body() {
        assert!(Value::from_serial(6, &[0, 1, 2]).is_err());
        assert!(Value::from_serial(13 + 20, b"short").is_err());
    }

    #[test]
    fn test_integer_roundtrip_via_serial() {
        for v in [0i64, 1, -1, 77, -300, 70_000, 1 << 30, 1 << 45, i64::MAX] {
            let value = Value::Integer(v);
            let mut body = vec![0u8; value.content_size()];
            value.write_content(&mut body);
            let (decoded, n) = Value::from_serial(value.serial_code(), &body).unwrap();
            assert_eq!(n, body.len());
            assert_eq!(decoded.as_integer(), Some(v));
        }
    }
}
