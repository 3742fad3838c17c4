//! Bounded page cache with pin/dirty/evict discipline.
//!
//! The pager caches up to `max_cache_pages` frames. Callers borrow pages
//! through RAII guards: holding a guard pins the frame, dropping it
//! unpins. A pinned frame is never evicted; a dirty frame is written back
//! before its slot is reused or the pager shuts down.
//!
//! The pin count lives outside the frame's data lock so that eviction can
//! skip pinned frames without touching locks held by the pinning thread.

use crate::error::{Result, StorageError};
use crate::pager::disk::DiskManager;
use crate::pager::lru::LruList;
use crate::types::{PageBuf, PageId};
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Smallest usable cache: a tree operation can pin a handful of pages at
/// once (parent, both split halves, the descent target).
const MIN_CACHE_PAGES: usize = 8;

/// A cached page frame
struct Frame {
    pin_count: AtomicU32,
    state: RwLock<FrameState>,
}

struct FrameState {
    buf: PageBuf,
    dirty: bool,
}

impl Frame {
    fn new(buf: PageBuf, dirty: bool, pins: u32) -> Self {
        Self {
            pin_count: AtomicU32::new(pins),
            state: RwLock::new(FrameState { buf, dirty }),
        }
    }

    fn pins(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without matching pin");
    }
}

struct CacheInner {
    frames: HashMap<PageId, Arc<Frame>>,
    lru: LruList,
}

/// Bounded page cache over the database file
pub struct Pager {
    disk: DiskManager,
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl Pager {
    /// Open or create the database file with a cache of `max_cache_pages`
    /// frames.
    pub fn open(path: &Path, max_cache_pages: usize) -> Result<Self> {
        let capacity = max_cache_pages.max(MIN_CACHE_PAGES);
        let disk = DiskManager::open(path)?;
        Ok(Self {
            disk,
            inner: Mutex::new(CacheInner {
                frames: HashMap::with_capacity(capacity),
                lru: LruList::new(capacity),
            }),
            capacity,
        })
    }

    /// Number of pages in the database file
    pub fn page_count(&self) -> u32 {
        self.disk.page_count()
    }

    /// Cache capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently cached
    pub fn cached_frames(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Pin count of a cached page, if cached
    pub fn pin_count(&self, id: PageId) -> Option<u32> {
        self.inner.lock().frames.get(&id).map(|frame| frame.pins())
    }

    /// Fetch page `id` for reading; the returned guard pins the frame.
    pub fn fetch_page(&self, id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.frame_for(id)?;
        frame.pin();
        Ok(PageGuard {
            page: id,
            frame,
            pager: self,
        })
    }

    /// Fetch page `id` for writing; pins the frame and marks it dirty.
    pub fn fetch_page_mut(&self, id: PageId) -> Result<PageGuardMut<'_>> {
        let frame = self.frame_for(id)?;
        frame.pin();
        frame.state.write().dirty = true;
        Ok(PageGuardMut {
            page: id,
            frame,
            pager: self,
        })
    }

    /// Extend the file by one page and return its pinned, dirty,
    /// zero-filled frame. The disk write is deferred until flush.
    pub fn allocate_page(&self) -> Result<(PageId, PageGuardMut<'_>)> {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= self.capacity {
            self.evict_locked(&mut inner)?;
        }
        let id = self.disk.allocate_id();
        let frame = Arc::new(Frame::new(PageBuf::new(), true, 1));
        inner.frames.insert(id, frame.clone());
        inner.lru.touch(id);
        drop(inner);
        Ok((
            id,
            PageGuardMut {
                page: id,
                frame,
                pager: self,
            },
        ))
    }

    /// Fetch page `id` if it exists, or allocate it when it would be the
    /// next page in the file. Returns the guard and whether the page was
    /// freshly created.
    pub fn fetch_or_allocate(&self, id: PageId) -> Result<(PageGuardMut<'_>, bool)> {
        if !id.is_valid() {
            return Err(StorageError::InvalidPageNum(id.value()));
        }
        let count = self.disk.page_count();
        if id.value() <= count {
            Ok((self.fetch_page_mut(id)?, false))
        } else if id.value() == count + 1 {
            let (got, guard) = self.allocate_page()?;
            debug_assert_eq!(got, id);
            Ok((guard, true))
        } else {
            Err(StorageError::InvalidPageNum(id.value()))
        }
    }

    /// Write the named page to disk if dirty
    pub fn flush_page(&self, id: PageId) -> Result<()> {
        let frame = self.inner.lock().frames.get(&id).cloned();
        if let Some(frame) = frame {
            self.flush_frame(id, &frame)?;
        }
        Ok(())
    }

    /// Write every dirty cached page to disk
    pub fn flush_all(&self) -> Result<()> {
        let frames: Vec<(PageId, Arc<Frame>)> = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .map(|(&id, frame)| (id, frame.clone()))
                .collect()
        };
        for (id, frame) in frames {
            self.flush_frame(id, &frame)?;
        }
        Ok(())
    }

    /// Flush all dirty pages and fsync the file
    pub fn sync_file(&self) -> Result<()> {
        self.flush_all()?;
        self.disk.sync()
    }

    /// Flush, fsync, and verify no page is still pinned.
    ///
    /// # Panics
    ///
    /// Panics if a page guard is still alive; dropping the pager with
    /// outstanding pins is a caller bug.
    pub fn close(&self) -> Result<()> {
        self.sync_file()?;
        let inner = self.inner.lock();
        for (id, frame) in inner.frames.iter() {
            let pins = frame.pins();
            assert!(pins == 0, "page {} still pinned at close ({} pins)", id, pins);
        }
        Ok(())
    }

    fn flush_frame(&self, id: PageId, frame: &Frame) -> Result<()> {
        let mut state = frame.state.write();
        if state.dirty {
            if id == PageId::SCHEMA_ROOT {
                // Page 1 carries the database header in its first bytes.
                self.disk.header().write(state.buf.as_bytes_mut());
            }
            self.disk.write_page(id, state.buf.as_bytes())?;
            state.dirty = false;
        }
        Ok(())
    }

    fn frame_for(&self, id: PageId) -> Result<Arc<Frame>> {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&id) {
            let frame = frame.clone();
            inner.lru.touch(id);
            return Ok(frame);
        }

        if inner.frames.len() >= self.capacity {
            self.evict_locked(&mut inner)?;
        }

        trace!("cache miss on page {}", id);
        let buf = self.disk.read_page(id)?;
        let frame = Arc::new(Frame::new(buf, false, 0));
        inner.frames.insert(id, frame.clone());
        inner.lru.touch(id);
        Ok(frame)
    }

    /// Free one cache slot: evict the least recently used unpinned frame,
    /// flushing it first when dirty. Fails with `CacheFull` when every
    /// frame is pinned. Pinned frames are skipped by their atomic pin
    /// count alone, so a thread holding page locks can still trigger
    /// eviction of other frames.
    fn evict_locked(&self, inner: &mut CacheInner) -> Result<()> {
        let order = inner.lru.victims();

        for &id in &order {
            if let Some(frame) = inner.frames.get(&id) {
                if frame.pins() != 0 {
                    continue;
                }
                let state = frame.state.read();
                if !state.dirty {
                    drop(state);
                    inner.frames.remove(&id);
                    inner.lru.remove(id);
                    trace!("evicted clean page {}", id);
                    return Ok(());
                }
            }
        }

        for &id in &order {
            if let Some(frame) = inner.frames.get(&id) {
                if frame.pins() != 0 {
                    continue;
                }
                let mut state = frame.state.write();
                if state.dirty {
                    if id == PageId::SCHEMA_ROOT {
                        self.disk.header().write(state.buf.as_bytes_mut());
                    }
                    self.disk.write_page(id, state.buf.as_bytes())?;
                    state.dirty = false;
                }
                drop(state);
                inner.frames.remove(&id);
                inner.lru.remove(id);
                debug!("flushed and evicted page {}", id);
                return Ok(());
            }
        }

        Err(StorageError::CacheFull {
            capacity: self.capacity,
        })
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if let Err(e) = self.sync_file() {
            warn!("failed to flush pages on drop: {}", e);
        }
    }
}

/// RAII pin for read access to a page
pub struct PageGuard<'a> {
    page: PageId,
    frame: Arc<Frame>,
    pager: &'a Pager,
}

impl<'a> PageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.page
    }

    /// Lock the frame for reading
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.state.read(),
        }
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.frame.unpin();
        self.pager.inner.lock().lru.touch(self.page);
    }
}

/// Shared view of a page's bytes
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, FrameState>,
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

/// RAII pin for write access to a page
pub struct PageGuardMut<'a> {
    page: PageId,
    frame: Arc<Frame>,
    pager: &'a Pager,
}

impl<'a> PageGuardMut<'a> {
    pub fn page_id(&self) -> PageId {
        self.page
    }

    /// Lock the frame for writing; marks it dirty
    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.state.write();
        guard.dirty = true;
        PageRefMut { guard }
    }

    /// Lock the frame for reading
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.state.read(),
        }
    }
}

impl<'a> Drop for PageGuardMut<'a> {
    fn drop(&mut self) {
        self.frame.unpin();
        self.pager.inner.lock().lru.touch(self.page);
    }
}

/// Exclusive view of a page's bytes
pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, FrameState>,
}

impl<'a> std::ops::Deref for PageRefMut<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

impl<'a> std::ops::DerefMut for PageRefMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pager(dir: &tempfile::TempDir, capacity: usize) -> Pager {
        Pager::open(&dir.path().join("test.db"), capacity).unwrap()
    }

    #[test]
    fn test_allocate_write_fetch() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 16);

        // Offset 200 keeps the marker clear of page 1's header region.
        let id = {
            let (id, guard) = pager.allocate_page()?;
            guard.write().as_bytes_mut()[200..204].copy_from_slice(b"abcd");
            id
        };
        pager.flush_all()?;

        let guard = pager.fetch_page(id)?;
        assert_eq!(&guard.read()[200..204], b"abcd");
        Ok(())
    }

    #[test]
    fn test_pin_identity_and_counts() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 16);

        let (id, guard) = pager.allocate_page()?;
        assert_eq!(pager.pin_count(id), Some(1));
        drop(guard);
        assert_eq!(pager.pin_count(id), Some(0));

        let g1 = pager.fetch_page(id)?;
        let g2 = pager.fetch_page(id)?;
        assert_eq!(pager.pin_count(id), Some(2));
        // Both guards expose the same frame buffer.
        assert_eq!(g1.read().as_ptr(), g2.read().as_ptr());
        drop(g1);
        drop(g2);
        assert_eq!(pager.pin_count(id), Some(0));
        Ok(())
    }

    #[test]
    fn test_eviction_under_pressure() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 8);

        // Allocate more pages than the cache holds, writing a marker in each.
        let mut ids = Vec::new();
        for i in 0..20u8 {
            let (id, guard) = pager.allocate_page()?;
            guard.write().as_bytes_mut()[200] = i;
            ids.push(id);
        }
        assert!(pager.cached_frames() <= 8);

        // Every page is still readable: evicted dirty pages were flushed.
        for (i, &id) in ids.iter().enumerate() {
            let guard = pager.fetch_page(id)?;
            assert_eq!(guard.read()[200], i as u8);
        }
        Ok(())
    }

    #[test]
    fn test_cache_full_when_all_pinned() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 8);

        let mut guards = Vec::new();
        for _ in 0..8 {
            guards.push(pager.allocate_page()?);
        }
        match pager.allocate_page() {
            Err(StorageError::CacheFull { capacity }) => assert_eq!(capacity, 8),
            other => panic!("expected CacheFull, got {:?}", other.map(|(id, _)| id)),
        }

        // Releasing one pin frees a slot.
        guards.pop();
        assert!(pager.allocate_page().is_ok());
        Ok(())
    }

    #[test]
    fn test_eviction_skips_pinned_frames_while_locked() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 8);

        let mut ids = Vec::new();
        for _ in 0..8 {
            let (id, guard) = pager.allocate_page()?;
            ids.push(id);
            drop(guard);
        }

        // Hold a write lock on one frame while forcing an eviction; the
        // evictor must not touch the locked, pinned frame.
        let guard = pager.fetch_page_mut(ids[0])?;
        let page = guard.write();
        let (_, g2) = pager.allocate_page()?;
        drop(g2);
        drop(page);
        drop(guard);
        Ok(())
    }

    #[test]
    fn test_fetch_beyond_file_fails() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 8);
        assert!(matches!(
            pager.fetch_page(PageId::new(5)),
            Err(StorageError::PageNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_fetch_or_allocate() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open_pager(&dir, 8);

        let (guard, created) = pager.fetch_or_allocate(PageId::new(1))?;
        assert!(created);
        drop(guard);

        let (guard, created) = pager.fetch_or_allocate(PageId::new(1))?;
        assert!(!created);
        drop(guard);

        // Page 3 would leave a hole.
        assert!(matches!(
            pager.fetch_or_allocate(PageId::new(3)),
            Err(StorageError::InvalidPageNum(3))
        ));
        Ok(())
    }

    #[test]
    fn test_durability_across_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut expected = Vec::new();

        {
            let pager = Pager::open(&path, 8)?;
            for i in 0..5u8 {
                let (id, guard) = pager.allocate_page()?;
                let mut page = guard.write();
                for b in page.as_bytes_mut().iter_mut() {
                    *b = i;
                }
                drop(page);
                drop(guard);
                expected.push(id);
            }
            pager.sync_file()?;
            pager.close()?;
        }

        // Page 1's first 100 bytes were stamped with the database header;
        // everything else must read back byte-identical.
        let pager = Pager::open(&path, 8)?;
        assert_eq!(pager.page_count(), 5);
        for (i, &id) in expected.iter().enumerate() {
            let guard = pager.fetch_page(id)?;
            let page = guard.read();
            let body_start = if id == PageId::SCHEMA_ROOT {
                crate::types::DB_HEADER_SIZE
            } else {
                0
            };
            assert!(page[body_start..].iter().all(|&b| b == i as u8));
        }
        Ok(())
    }
}
