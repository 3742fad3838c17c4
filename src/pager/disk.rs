//! Page-granular file I/O.
//!
//! The disk manager reads and writes whole pages at `(n−1)·page_size`
//! offsets and tracks the file's logical length. Allocation is logical:
//! the new page's bytes reach the file only when the cache flushes them.

use crate::error::{Result, StorageError};
use crate::pager::db_header::DbHeader;
use crate::types::{PageBuf, PageId, DB_HEADER_SIZE, PAGE_SIZE};
use log::{debug, trace};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// File-backed page store
pub struct DiskManager {
    file: Mutex<File>,
    /// Logical file length; may exceed the physical length until pending
    /// allocations are flushed.
    file_len: AtomicU64,
    header: Mutex<DbHeader>,
}

impl DiskManager {
    /// Open or create the database file, validating the header of an
    /// existing database.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| StorageError::FileOpenFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let len = file.metadata()?.len();
        let header = if len == 0 {
            DbHeader::new()
        } else if len >= DB_HEADER_SIZE as u64 {
            let mut buf = [0u8; DB_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let header = DbHeader::read(&buf)?;
            if header.page_count as u64 * PAGE_SIZE as u64 > len {
                return Err(StorageError::invalid_header(
                    PageId::SCHEMA_ROOT,
                    format!(
                        "header claims {} pages but the file holds {} bytes",
                        header.page_count, len
                    ),
                ));
            }
            header
        } else {
            return Err(StorageError::invalid_header(
                PageId::SCHEMA_ROOT,
                format!("file of {} bytes is too short for a database", len),
            ));
        };

        debug!(
            "opened database {:?}: {} pages on disk",
            path,
            len / PAGE_SIZE as u64
        );

        Ok(Self {
            file: Mutex::new(file),
            file_len: AtomicU64::new(len),
            header: Mutex::new(header),
        })
    }

    /// Number of pages in the (logical) file
    pub fn page_count(&self) -> u32 {
        (self.file_len.load(Ordering::Acquire) / PAGE_SIZE as u64) as u32
    }

    /// Current header with an up-to-date page count
    pub fn header(&self) -> DbHeader {
        let mut header = *self.header.lock();
        header.page_count = self.page_count();
        header
    }

    /// Read page `id` from disk
    pub fn read_page(&self, id: PageId) -> Result<PageBuf> {
        if !id.is_valid() {
            return Err(StorageError::InvalidPageNum(id.value()));
        }
        if id.value() > self.page_count() {
            return Err(StorageError::PageNotFound(id));
        }

        trace!("reading page {}", id);
        let mut buf = PageBuf::new();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(id.file_offset(PAGE_SIZE)))?;
        file.read_exact(buf.as_bytes_mut())?;
        Ok(buf)
    }

    /// Write a full page to its file offset
    pub fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if !id.is_valid() || id.value() > self.page_count() {
            return Err(StorageError::InvalidPageNum(id.value()));
        }
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBounds {
                page: id,
                start: 0,
                end: data.len(),
            });
        }

        trace!("writing page {}", id);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(id.file_offset(PAGE_SIZE)))?;
        file.write_all(data).map_err(|e| {
            if e.kind() == ErrorKind::WriteZero {
                StorageError::ShortWrite {
                    page: id,
                    written: 0,
                    expected: PAGE_SIZE,
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(())
    }

    /// Extend the file logically by one page and return its number.
    pub fn allocate_id(&self) -> PageId {
        let prev = self
            .file_len
            .fetch_add(PAGE_SIZE as u64, Ordering::AcqRel);
        let id = PageId::new((prev / PAGE_SIZE as u64) as u32 + 1);
        debug!("allocated page {}", id);
        id
    }

    /// Flush OS buffers to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_file_has_no_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("test.db"))?;
        assert_eq!(dm.page_count(), 0);
        assert!(matches!(
            dm.read_page(PageId::new(1)),
            Err(StorageError::PageNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_allocate_write_read() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("test.db"))?;

        let p1 = dm.allocate_id();
        let p2 = dm.allocate_id();
        assert_eq!(p1, PageId::new(1));
        assert_eq!(p2, PageId::new(2));
        assert_eq!(dm.page_count(), 2);

        let mut data = PageBuf::new();
        data.as_bytes_mut()[0..5].copy_from_slice(b"hello");
        dm.write_page(p2, data.as_bytes())?;

        let read = dm.read_page(p2)?;
        assert_eq!(&read[0..5], b"hello");
        Ok(())
    }

    #[test]
    fn test_page_zero_is_invalid() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("test.db"))?;
        assert!(matches!(
            dm.read_page(PageId::NONE),
            Err(StorageError::InvalidPageNum(0))
        ));
        Ok(())
    }

    #[test]
    fn test_reopen_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, vec![0x5A; PAGE_SIZE]).unwrap();
        assert!(DiskManager::open(&path).is_err());
    }

    #[test]
    fn test_reopen_accepts_valid_header() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let dm = DiskManager::open(&path)?;
            let p1 = dm.allocate_id();
            let mut page = PageBuf::new();
            dm.header().write(page.as_bytes_mut());
            dm.write_page(p1, page.as_bytes())?;
            dm.sync()?;
        }
        let dm = DiskManager::open(&path)?;
        assert_eq!(dm.page_count(), 1);
        assert_eq!(dm.header().page_count, 1);
        Ok(())
    }
}
