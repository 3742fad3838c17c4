//! Record (cell payload) codec.
//!
//! A stored record is the byte sequence
//!
//! ```text
//! varint(payload_size) || varint(rowid) || varint(header_size)
//!   || varint(serial_code) × N || value_body × N
//! ```
//!
//! `header_size` counts only the serial-code varints; `payload_size`
//! counts everything after its own varint. Parsing borrows text and blob
//! payloads from the input buffer; `into_owned` detaches a record from
//! its page.

mod value;

pub use value::Value;

use crate::error::{Result, StorageError};
use crate::schema::Column;
use crate::types::varint::{read_varint, varint_len, write_varint};
use crate::types::{DB_HEADER_SIZE, PAGE_SIZE};

/// Upper bound on a serialized record.
///
/// A quarter of the smallest usable node area: after a split-by-count the
/// receiving half of a page is then always able to hold one more record
/// of this size.
pub const MAX_RECORD_SIZE: usize = (PAGE_SIZE - DB_HEADER_SIZE - 12) / 4;

/// One (rowid, values) row, possibly borrowing page bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    pub rowid: i64,
    pub values: Vec<Value<'a>>,
}

impl<'a> Record<'a> {
    pub fn new(rowid: i64, values: Vec<Value<'a>>) -> Self {
        Self { rowid, values }
    }

    /// Exact serialized size of `(rowid, values)`, including the leading
    /// `payload_size` varint.
    pub fn calculate_size(rowid: i64, values: &[Value<'_>]) -> usize {
        let inner = Self::inner_size(rowid, values);
        varint_len(inner as u64) + inner
    }

    fn inner_size(rowid: i64, values: &[Value<'_>]) -> usize {
        let header_size: usize = values
            .iter()
            .map(|v| varint_len(v.serial_code()))
            .sum();
        let body_size: usize = values.iter().map(|v| v.content_size()).sum();
        varint_len(rowid as u64) + varint_len(header_size as u64) + header_size + body_size
    }

    /// Serialize `(rowid, values)` into `buf`, returning bytes written.
    pub fn serialize(buf: &mut [u8], rowid: i64, values: &[Value<'_>]) -> Result<usize> {
        let inner = Self::inner_size(rowid, values);
        let total = varint_len(inner as u64) + inner;
        if buf.len() < total {
            return Err(StorageError::serialization(format!(
                "record needs {} bytes, buffer holds {}",
                total,
                buf.len()
            )));
        }

        let header_size: usize = values
            .iter()
            .map(|v| varint_len(v.serial_code()))
            .sum();

        let mut pos = write_varint(buf, inner as u64);
        pos += write_varint(&mut buf[pos..], rowid as u64);
        pos += write_varint(&mut buf[pos..], header_size as u64);
        for v in values {
            pos += write_varint(&mut buf[pos..], v.serial_code());
        }
        for v in values {
            let width = v.content_size();
            v.write_content(&mut buf[pos..pos + width]);
            pos += width;
        }
        debug_assert_eq!(pos, total);
        Ok(total)
    }

    /// Parse a record from the start of `buf`.
    ///
    /// Returns the record (text/blob values borrow `buf`) and the total
    /// number of bytes consumed.
    pub fn parse(buf: &'a [u8]) -> Result<(Record<'a>, usize)> {
        let (payload_size, size_len) =
            read_varint(buf).ok_or_else(|| StorageError::deserialize("truncated payload size"))?;
        let total = size_len
            .checked_add(payload_size as usize)
            .filter(|&t| t <= buf.len())
            .ok_or_else(|| {
                StorageError::deserialize(format!(
                    "payload size {} exceeds buffer of {} bytes",
                    payload_size,
                    buf.len()
                ))
            })?;
        let payload = &buf[size_len..total];

        let (rowid_raw, rowid_len) =
            read_varint(payload).ok_or_else(|| StorageError::deserialize("truncated rowid"))?;
        let (header_size, hdr_len) = read_varint(&payload[rowid_len..])
            .ok_or_else(|| StorageError::deserialize("truncated header size"))?;

        let codes_start = rowid_len + hdr_len;
        let codes_end = codes_start
            .checked_add(header_size as usize)
            .filter(|&e| e <= payload.len())
            .ok_or_else(|| {
                StorageError::deserialize(format!("header size {} exceeds payload", header_size))
            })?;

        let mut codes = Vec::new();
        let mut off = codes_start;
        while off < codes_end {
            let (code, n) = read_varint(&payload[off..codes_end])
                .ok_or_else(|| StorageError::deserialize("serial code crosses header end"))?;
            off += n;
            codes.push(code);
        }

        let mut values = Vec::with_capacity(codes.len());
        let mut body = codes_end;
        for code in codes {
            let (value, consumed) = Value::from_serial(code, &payload[body..])?;
            body += consumed;
            values.push(value);
        }
        if body != payload.len() {
            return Err(StorageError::deserialize(format!(
                "payload size {} does not match decoded length {}",
                payload.len(),
                body
            )));
        }

        Ok((
            Record {
                rowid: rowid_raw as i64,
                values,
            },
            total,
        ))
    }

    /// Deep-copy all borrowed payloads, detaching the record from its page
    pub fn into_owned(self) -> Record<'static> {
        Record {
            rowid: self.rowid,
            values: self.values.into_iter().map(Value::into_owned).collect(),
        }
    }
}

/// Decode only the rowid of the record at the start of `buf`. O(1) and
/// allocation-free.
pub fn peek_rowid(buf: &[u8]) -> Result<i64> {
    let (_, size_len) =
        read_varint(buf).ok_or_else(|| StorageError::deserialize("truncated payload size"))?;
    let (rowid, _) = read_varint(&buf[size_len..])
        .ok_or_else(|| StorageError::deserialize("truncated rowid"))?;
    Ok(rowid as i64)
}

/// Decode only the total size (including the leading varint) of the
/// record at the start of `buf`. O(1) and allocation-free.
pub fn peek_size(buf: &[u8]) -> Result<usize> {
    let (payload_size, size_len) =
        read_varint(buf).ok_or_else(|| StorageError::deserialize("truncated payload size"))?;
    Ok(size_len + payload_size as usize)
}

/// Check `values` against a table's column list: arity, NOT NULL, and
/// type compatibility. INTEGER columns take integers; REAL columns take
/// integers or floats; TEXT and BLOB columns take either byte-carrying
/// value; NULL satisfies any nullable column.
pub fn validate(values: &[Value<'_>], columns: &[Column]) -> Result<()> {
    use crate::schema::ColumnType;

    if values.len() != columns.len() {
        return Err(StorageError::schema(format!(
            "expected {} values, got {}",
            columns.len(),
            values.len()
        )));
    }
    for (value, column) in values.iter().zip(columns) {
        let ok = match (value, column.ty) {
            (Value::Null, _) => {
                if column.not_null {
                    return Err(StorageError::schema(format!(
                        "column {} is NOT NULL",
                        column.name
                    )));
                }
                true
            }
            (Value::Integer(_), ColumnType::Integer | ColumnType::Real) => true,
            (Value::Real(_), ColumnType::Real) => true,
            (Value::Text(_) | Value::Blob(_), ColumnType::Text | ColumnType::Blob) => true,
            _ => false,
        };
        if !ok {
            return Err(StorageError::schema(format!(
                "value {:?} does not fit column {} ({:?})",
                value, column.name, column.ty
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use std::borrow::Cow;

    fn sample_values() -> Vec<Value<'static>> {
        vec![
            Value::Null,
            Value::Integer(0),
            Value::Integer(1),
            Value::Integer(-42),
            Value::Integer(1 << 40),
            Value::Real(3.5),
            Value::text_owned("hello world"),
            Value::blob_owned(vec![0xAA, 0xBB, 0xCC]),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let values = sample_values();
        let size = Record::calculate_size(7, &values);
        let mut buf = vec![0u8; size];
        let written = Record::serialize(&mut buf, 7, &values).unwrap();
        assert_eq!(written, size);

        let (rec, consumed) = Record::parse(&buf).unwrap();
        assert_eq!(consumed, size);
        assert_eq!(rec.rowid, 7);
        assert_eq!(rec.values.len(), values.len());
        assert_eq!(rec.values, values);
    }

    #[test]
    fn test_size_identity() {
        let cases: Vec<(i64, Vec<Value<'static>>)> = vec![
            (1, vec![]),
            (-1, vec![Value::Null]),
            (i64::MAX, sample_values()),
            (500, vec![Value::text_owned("x".repeat(300))]),
        ];
        for (rowid, values) in cases {
            let size = Record::calculate_size(rowid, &values);
            let mut buf = vec![0u8; size + 32];
            let written = Record::serialize(&mut buf, rowid, &values).unwrap();
            assert_eq!(written, size);
        }
    }

    #[test]
    fn test_rowid_probe_matches_parse() {
        for rowid in [0i64, 1, -5, 1 << 33, i64::MAX] {
            let values = vec![Value::Integer(9), Value::text_owned("abc")];
            let size = Record::calculate_size(rowid, &values);
            let mut buf = vec![0u8; size];
            Record::serialize(&mut buf, rowid, &values).unwrap();

            let (rec, consumed) = Record::parse(&buf).unwrap();
            assert_eq!(peek_rowid(&buf).unwrap(), rec.rowid);
            assert_eq!(peek_size(&buf).unwrap(), consumed);
        }
    }

    #[test]
    fn test_serialize_into_small_buffer_fails() {
        let values = vec![Value::text_owned("some text")];
        let size = Record::calculate_size(1, &values);
        let mut buf = vec![0u8; size - 1];
        assert!(matches!(
            Record::serialize(&mut buf, 1, &values),
            Err(StorageError::SerializationFailed(_))
        ));
    }

    #[test]
    fn test_parse_borrows_from_buffer() {
        let values = vec![Value::text_owned("borrowed")];
        let size = Record::calculate_size(3, &values);
        let mut buf = vec![0u8; size];
        Record::serialize(&mut buf, 3, &values).unwrap();

        let (rec, _) = Record::parse(&buf).unwrap();
        match &rec.values[0] {
            Value::Text(Cow::Borrowed(slice)) => {
                let buf_range = buf.as_ptr() as usize..buf.as_ptr() as usize + buf.len();
                assert!(buf_range.contains(&(slice.as_ptr() as usize)));
            }
            other => panic!("expected borrowed text, got {:?}", other),
        }

        let owned = rec.into_owned();
        assert_eq!(owned.values[0].as_text(), Some("borrowed"));
    }

    #[test]
    fn test_parse_rejects_reserved_code() {
        // header_size=1, one serial code 10, empty body
        let payload = [1u8 /* rowid */, 1 /* header size */, 10 /* code */];
        let mut buf = vec![payload.len() as u8];
        buf.extend_from_slice(&payload);
        assert!(Record::parse(&buf).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_buffer() {
        let values = vec![Value::text_owned("0123456789")];
        let size = Record::calculate_size(1, &values);
        let mut buf = vec![0u8; size];
        Record::serialize(&mut buf, 1, &values).unwrap();
        for cut in [1, size / 2, size - 1] {
            assert!(Record::parse(&buf[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_parse_rejects_size_mismatch() {
        let values = vec![Value::Integer(5)];
        let size = Record::calculate_size(1, &values);
        let mut buf = vec![0u8; size];
        Record::serialize(&mut buf, 1, &values).unwrap();
        // Inflate the declared payload size past the real content.
        buf[0] += 1;
        buf.push(0);
        assert!(Record::parse(&buf).is_err());
    }

    #[test]
    fn test_validate() {
        let columns = vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("score", ColumnType::Real),
            Column::new("name", ColumnType::Text),
            Column::new("data", ColumnType::Blob),
        ];

        let good = vec![
            Value::Integer(1),
            Value::Integer(10),
            Value::blob_owned(vec![1]),
            Value::text_owned("interchangeable"),
        ];
        assert!(validate(&good, &columns).is_ok());

        // NULL in a NOT NULL column
        let bad_null = vec![
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
        ];
        assert!(validate(&bad_null, &columns).is_err());

        // Float into INTEGER
        let bad_type = vec![
            Value::Real(1.5),
            Value::Real(1.5),
            Value::Null,
            Value::Null,
        ];
        assert!(validate(&bad_type, &columns).is_err());

        // Arity mismatch
        assert!(validate(&[Value::Integer(1)], &columns).is_err());
    }
}
