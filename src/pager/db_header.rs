//! Database header.
//!
//! The first 100 bytes of page 1 identify the file and record global
//! metadata; the rest of page 1 belongs to the schema tree.

use crate::error::{Result, StorageError};
use crate::types::bytes::{read_u32_le, write_u32_le};
use crate::types::{PageId, DB_HEADER_SIZE, PAGE_SIZE};

/// Magic bytes identifying a valid database file
pub const MAGIC: &[u8; 13] = b"MAGNI_DB_v1.0";

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Database header
///
/// Layout (100 bytes, integers little-endian):
/// ```text
/// Offset  Size  Description
/// 0       13    Magic string "MAGNI_DB_v1.0"
/// 13      4     Page size (currently always 4096)
/// 17      4     Total page count
/// 21      4     Schema version (currently 1)
/// 25      75    Reserved, zero-filled
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DbHeader {
    pub page_size: u32,
    pub page_count: u32,
    pub schema_version: u32,
}

impl DbHeader {
    /// Header for a fresh single-page database
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE as u32,
            page_count: 1,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Read and validate a header from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let fail = |reason: String| StorageError::invalid_header(PageId::SCHEMA_ROOT, reason);

        if bytes.len() < DB_HEADER_SIZE {
            return Err(fail("database header truncated".into()));
        }
        if &bytes[0..13] != MAGIC {
            return Err(fail("bad magic bytes".into()));
        }

        let page_size = read_u32_le(&bytes[13..17]);
        let page_count = read_u32_le(&bytes[17..21]);
        let schema_version = read_u32_le(&bytes[21..25]);

        if page_size != PAGE_SIZE as u32 {
            return Err(fail(format!(
                "unsupported page size {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }
        if schema_version != SCHEMA_VERSION {
            return Err(fail(format!(
                "unsupported schema version {}",
                schema_version
            )));
        }

        Ok(Self {
            page_size,
            page_count,
            schema_version,
        })
    }

    /// Write this header into the first 100 bytes of `bytes`
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..DB_HEADER_SIZE].fill(0);
        bytes[0..13].copy_from_slice(MAGIC);
        write_u32_le(&mut bytes[13..17], self.page_size);
        write_u32_le(&mut bytes[17..21], self.page_count);
        write_u32_le(&mut bytes[21..25], self.schema_version);
    }
}

impl Default for DbHeader {
    fn default() -> Self {
        Self::new()
    }
}
