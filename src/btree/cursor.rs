//! Ordered traversal cursor.
//!
//! A cursor is a stack of `(page, cell_index)` entries from the root to
//! the current leaf cell. It stores page numbers rather than pointers,
//! so it survives suspension: any page may be evicted and re-read
//! between calls. At an interior entry the index names the child the
//! path went through (`cell_count` means the rightmost child).

use crate::btree::node::{NodeKind, NodeRef};
use crate::error::{Result, StorageError};
use crate::pager::Pager;
use crate::record::Record;
use crate::types::PageId;
use std::sync::Arc;

/// Positional reference into a tree, iterating records in rowid order
pub struct Cursor {
    pager: Arc<Pager>,
    stack: Vec<(PageId, usize)>,
    valid: bool,
}

impl Cursor {
    /// Position at the first record of the tree rooted at `root`
    pub(crate) fn start(pager: Arc<Pager>, root: PageId) -> Result<Cursor> {
        let mut cursor = Self {
            pager,
            stack: Vec::new(),
            valid: false,
        };
        cursor.descend_leftmost(root)?;
        if !cursor.valid {
            // The leftmost leaf can be empty after deletes; walk on.
            cursor.climb_to_next_leaf()?;
        }
        Ok(cursor)
    }

    /// Whether the cursor points at a record
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Rowid of the current record
    pub fn rowid(&self) -> Result<Option<i64>> {
        if !self.valid {
            return Ok(None);
        }
        let &(page, idx) = match self.stack.last() {
            Some(top) => top,
            None => return Ok(None),
        };
        let guard = self.pager.fetch_page(page)?;
        let pref = guard.read();
        let nref = NodeRef::read(pref.as_bytes(), page)?;
        if idx >= nref.cell_count() {
            return Ok(None);
        }
        Ok(Some(nref.key_at(idx)?))
    }

    /// Deep copy of the current record
    pub fn record(&self) -> Result<Option<Record<'static>>> {
        if !self.valid {
            return Ok(None);
        }
        let &(page, idx) = match self.stack.last() {
            Some(top) => top,
            None => return Ok(None),
        };
        let guard = self.pager.fetch_page(page)?;
        let pref = guard.read();
        let nref = NodeRef::read(pref.as_bytes(), page)?;
        if idx >= nref.cell_count() {
            return Ok(None);
        }
        let (rec, _) = nref.record_at(idx)?;
        Ok(Some(rec.into_owned()))
    }

    /// Step to the next record; returns whether the cursor is still valid
    pub fn advance(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let (page, idx) = match self.stack.last_mut() {
            Some(top) => {
                top.1 += 1;
                *top
            }
            None => {
                self.valid = false;
                return Ok(false);
            }
        };

        let count = {
            let guard = self.pager.fetch_page(page)?;
            let pref = guard.read();
            NodeRef::read(pref.as_bytes(), page)?.cell_count()
        };
        if idx < count {
            return Ok(true);
        }
        self.climb_to_next_leaf()
    }

    /// Pop the exhausted leaf and move to the leftmost record of the
    /// next subtree in key order.
    fn climb_to_next_leaf(&mut self) -> Result<bool> {
        loop {
            self.stack.pop();
            let (page, idx) = match self.stack.last_mut() {
                Some(top) => {
                    top.1 += 1;
                    *top
                }
                None => {
                    self.valid = false;
                    return Ok(false);
                }
            };

            let child = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                let count = nref.cell_count();
                if idx < count {
                    Some(nref.child_at(idx)?)
                } else if idx == count {
                    Some(nref.rightmost_child())
                } else {
                    None
                }
            };

            if let Some(child) = child {
                if !child.is_valid() {
                    return Err(StorageError::invalid_header(page, "missing child pointer"));
                }
                self.descend_leftmost(child)?;
                if self.valid {
                    return Ok(true);
                }
                // Reached another empty leaf; keep climbing.
            }
        }
    }

    /// Push the path to the leftmost leaf under `page`; the cursor is
    /// valid iff that leaf holds at least one cell.
    fn descend_leftmost(&mut self, start: PageId) -> Result<()> {
        let mut page = start;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                match nref.kind() {
                    NodeKind::Leaf => {
                        self.stack.push((page, 0));
                        self.valid = nref.cell_count() > 0;
                        return Ok(());
                    }
                    NodeKind::Interior => {
                        self.stack.push((page, 0));
                        if nref.cell_count() > 0 {
                            nref.child_at(0)?
                        } else {
                            nref.rightmost_child()
                        }
                    }
                }
            };
            if !next.is_valid() {
                return Err(StorageError::invalid_header(page, "missing child pointer"));
            }
            page = next;
        }
    }
}
