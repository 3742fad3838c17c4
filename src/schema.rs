//! Schema catalog.
//!
//! Table metadata lives as ordinary rows in a dedicated tree rooted at
//! page 1. Each row carries six values in fixed order: `type`, `name`,
//! `tbl_name`, `rootpage`, `sql`, and a blob encoding the column list
//! (which does not fit the fixed six-slot shape). The rowid is the
//! FNV-1a hash of the table name masked to 63 bits; a collision surfaces
//! as `DuplicateRowid` and is treated as a schema error.

use crate::btree::{Tree, TreeConfig};
use crate::error::{Result, StorageError};
use crate::pager::Pager;
use crate::record::{Record, Value};
use crate::types::{PageId, MAX_COLS};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Blob,
}

impl ColumnType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Integer),
            1 => Some(Self::Text),
            2 => Some(Self::Real),
            3 => Some(Self::Blob),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Integer => 0,
            Self::Text => 1,
            Self::Real => 2,
            Self::Blob => 3,
        }
    }
}

/// One column of a table descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub pk: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            pk: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.pk = true;
        self
    }
}

/// A table descriptor as stored in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub root_page: PageId,
    pub sql: String,
    pub columns: Vec<Column>,
}

/// Catalog rowid for a table name: FNV-1a 64-bit, masked to 63 bits so
/// it is always a non-negative rowid.
pub fn table_rowid(name: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for &byte in name.as_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & (u64::MAX >> 1)) as i64
}

/// Enforce descriptor invariants: 1..=MAX_COLS columns, unique names,
/// at most one primary key.
pub fn validate_columns(columns: &[Column]) -> Result<()> {
    if columns.is_empty() {
        return Err(StorageError::schema("a table needs at least one column"));
    }
    if columns.len() > MAX_COLS {
        return Err(StorageError::schema(format!(
            "{} columns exceed the limit of {}",
            columns.len(),
            MAX_COLS
        )));
    }

    let mut names = HashSet::new();
    let mut pk_count = 0;
    for column in columns {
        if !names.insert(column.name.as_str()) {
            return Err(StorageError::schema(format!(
                "duplicate column name {}",
                column.name
            )));
        }
        if column.pk {
            pk_count += 1;
        }
    }
    if pk_count > 1 {
        return Err(StorageError::schema("more than one primary key column"));
    }
    Ok(())
}

/// Column-list blob: `u32 count || { u32 name_len, name, u8 type,
/// u8 flags } × count`, integers little-endian, flag bit 1 = NOT NULL,
/// bit 2 = primary key.
fn encode_columns(columns: &[Column]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(columns.len() as u32).to_le_bytes());
    for column in columns {
        out.extend_from_slice(&(column.name.len() as u32).to_le_bytes());
        out.extend_from_slice(column.name.as_bytes());
        out.push(column.ty.as_byte());
        let mut flags = 0u8;
        if column.not_null {
            flags |= 1;
        }
        if column.pk {
            flags |= 2;
        }
        out.push(flags);
    }
    out
}

fn decode_columns(bytes: &[u8]) -> Result<Vec<Column>> {
    let fail = |msg: &str| StorageError::deserialize(format!("column blob: {msg}"));

    let count_bytes: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| fail("truncated count"))?;
    let count = u32::from_le_bytes(count_bytes) as usize;
    if count > MAX_COLS {
        return Err(fail("column count over limit"));
    }

    let mut columns = Vec::with_capacity(count);
    let mut off = 4;
    for _ in 0..count {
        let len_bytes: [u8; 4] = bytes
            .get(off..off + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| fail("truncated name length"))?;
        let name_len = u32::from_le_bytes(len_bytes) as usize;
        off += 4;

        let name_bytes = bytes
            .get(off..off + name_len)
            .ok_or_else(|| fail("truncated name"))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| fail("name is not UTF-8"))?
            .to_string();
        off += name_len;

        let &ty_byte = bytes.get(off).ok_or_else(|| fail("missing type"))?;
        let ty = ColumnType::from_byte(ty_byte).ok_or_else(|| fail("unknown column type"))?;
        let &flags = bytes.get(off + 1).ok_or_else(|| fail("missing flags"))?;
        off += 2;

        columns.push(Column {
            name,
            ty,
            not_null: flags & 1 != 0,
            pk: flags & 2 != 0,
        });
    }
    Ok(columns)
}

fn decode_table_row(rec: &Record<'_>) -> Result<TableInfo> {
    let fail = |msg: &str| StorageError::deserialize(format!("catalog row: {msg}"));

    if rec.values.len() != 6 {
        return Err(fail("expected six values"));
    }
    let name = rec.values[1]
        .as_text()
        .ok_or_else(|| fail("name is not text"))?
        .to_string();
    let root = rec.values[3]
        .as_integer()
        .ok_or_else(|| fail("rootpage is not an integer"))?;
    if root < 2 || root > u32::MAX as i64 {
        return Err(fail("rootpage out of range"));
    }
    let sql = rec.values[4]
        .as_text()
        .ok_or_else(|| fail("sql is not text"))?
        .to_string();
    let columns = decode_columns(
        rec.values[5]
            .as_bytes()
            .ok_or_else(|| fail("column list is not a blob"))?,
    )?;

    Ok(TableInfo {
        name,
        root_page: PageId::new(root as u32),
        sql,
        columns,
    })
}

/// Table catalog over the schema tree on page 1
pub struct Catalog {
    tree: Tree,
}

impl Catalog {
    pub(crate) fn open(pager: Arc<Pager>) -> Catalog {
        Self {
            tree: Tree::open(pager, PageId::SCHEMA_ROOT, TreeConfig::default()),
        }
    }

    /// Register a table descriptor. Fails with `DuplicateRowid` when the
    /// name (or its hash) is already present.
    pub fn add_table(&self, info: &TableInfo) -> Result<()> {
        validate_columns(&info.columns)?;
        if info.root_page.value() < 2 {
            return Err(StorageError::schema(format!(
                "table root page {} collides with the schema tree",
                info.root_page
            )));
        }

        let blob = encode_columns(&info.columns);
        let values = [
            Value::text("table"),
            Value::text(&info.name),
            Value::text(&info.name),
            Value::Integer(info.root_page.value() as i64),
            Value::text(&info.sql),
            Value::blob(&blob),
        ];
        self.tree.insert(table_rowid(&info.name), &values)?;
        debug!("registered table {} at root {}", info.name, info.root_page);
        Ok(())
    }

    /// Look up a table by name (deep copy of the descriptor)
    pub fn table(&self, name: &str) -> Result<Option<TableInfo>> {
        match self.tree.find(table_rowid(name)) {
            Ok(rec) => {
                let info = decode_table_row(&rec)?;
                // A hash hit for a different name is not a match.
                Ok((info.name == name).then_some(info))
            }
            Err(StorageError::CellNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains_table(&self, name: &str) -> Result<bool> {
        Ok(self.table(name)?.is_some())
    }

    /// All table descriptors, sorted by name
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let mut cursor = self.tree.cursor()?;
        let mut tables = Vec::new();
        while cursor.is_valid() {
            if let Some(rec) = cursor.record()? {
                tables.push(decode_table_row(&rec)?);
            }
            cursor.advance()?;
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    /// Remove a table's descriptor. Its data pages are left in place.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        if self.table(name)?.is_none() {
            return Err(StorageError::schema(format!("no such table: {name}")));
        }
        self.tree.delete(table_rowid(name))?;
        debug!("dropped table {}", name);
        Ok(())
    }
}
