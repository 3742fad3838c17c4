//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database file could not be opened or created
    #[error("failed to open database file {path:?}: {source}")]
    FileOpenFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A page write did not cover the full page
    #[error("short write on page {page}: wrote {written} of {expected} bytes")]
    ShortWrite {
        page: PageId,
        written: usize,
        expected: usize,
    },

    /// Every frame in the page cache is pinned
    #[error("page cache full: all {capacity} frames are pinned")]
    CacheFull { capacity: usize },

    /// Requested page lies beyond the end of the file
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// Page number is not addressable (zero, or not the next allocatable page)
    #[error("invalid page number {0}")]
    InvalidPageNum(u32),

    /// Page header bytes do not describe a valid B-tree node
    #[error("invalid page header on page {page}: {reason}")]
    InvalidPageHeader { page: PageId, reason: String },

    /// A cell pointer points outside the page's content region
    #[error("invalid cell pointer on page {page} at index {index}")]
    InvalidCellPointer { page: PageId, index: usize },

    /// An offset range does not fit inside the page
    #[error("range {start}..{end} out of bounds on page {page}")]
    InvalidBounds {
        page: PageId,
        start: usize,
        end: usize,
    },

    /// Cell bytes could not be decoded into a record
    #[error("cell deserialization failed: {0}")]
    CellDeserializeFailed(String),

    /// A record could not be serialized
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The page cannot hold another cell; consumed internally by splits
    #[error("page {page} is full: need {needed} bytes, {available} available")]
    PageFull {
        page: PageId,
        needed: usize,
        available: usize,
    },

    /// A row with this rowid already exists in the tree
    #[error("duplicate rowid {0}")]
    DuplicateRowid(i64),

    /// No cell with the requested rowid
    #[error("no cell with rowid {0}")]
    CellNotFound(i64),

    /// Table descriptor validation failure
    #[error("schema error: {0}")]
    SchemaError(String),
}

impl StorageError {
    /// Create an invalid page header error
    pub fn invalid_header(page: PageId, reason: impl Into<String>) -> Self {
        Self::InvalidPageHeader {
            page,
            reason: reason.into(),
        }
    }

    /// Create a cell deserialization error
    pub fn deserialize(msg: impl Into<String>) -> Self {
        Self::CellDeserializeFailed(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationFailed(msg.into())
    }

    /// Create a schema validation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaError(msg.into())
    }
}
