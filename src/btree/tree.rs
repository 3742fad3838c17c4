//! B+ tree operations.
//!
//! A tree is identified by its root page number; the same algorithms
//! serve the schema catalog (rooted at page 1) and user tables. Inserts
//! descend recursively and propagate at most one split per level; a
//! split of the root moves its content into two fresh children and
//! re-initializes the root in place, so the root page number never
//! changes.

use crate::btree::cursor::Cursor;
use crate::btree::node::{self, ChildSlot, NodeKind, NodeMut, NodeRef};
use crate::error::{Result, StorageError};
use crate::pager::Pager;
use crate::record::{Record, Value, MAX_RECORD_SIZE};
use crate::types::PageId;
use itertools::Itertools;
use log::debug;
use std::sync::Arc;

/// Per-tree options
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Reject inserts whose rowid already exists (on by default).
    /// Disabling this waives the uniqueness invariant for the tree.
    pub check_duplicates: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            check_duplicates: true,
        }
    }
}

/// A rowid-keyed B+ tree stored in the pager's file
pub struct Tree {
    pager: Arc<Pager>,
    root: PageId,
    config: TreeConfig,
}

enum InsertOutcome {
    Done,
    Split { right: PageId, separator: i64 },
}

impl Tree {
    /// Allocate and initialize a fresh tree; returns a handle rooted at
    /// the new leaf page.
    pub fn create(pager: Arc<Pager>, config: TreeConfig) -> Result<Tree> {
        let root = {
            let (page, guard) = pager.allocate_page()?;
            let mut pref = guard.write();
            NodeMut::init_leaf(pref.as_bytes_mut(), page);
            page
        };
        debug!("created tree rooted at page {}", root);
        Ok(Self {
            pager,
            root,
            config,
        })
    }

    /// Handle to an existing tree rooted at `root`
    pub fn open(pager: Arc<Pager>, root: PageId, config: TreeConfig) -> Tree {
        Self {
            pager,
            root,
            config,
        }
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Look up `rowid`, returning a deep copy of its record.
    pub fn find(&self, rowid: i64) -> Result<Record<'static>> {
        let mut page = self.root;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                match nref.kind() {
                    NodeKind::Leaf => {
                        let idx = nref
                            .find_key(rowid)?
                            .ok_or(StorageError::CellNotFound(rowid))?;
                        let (rec, _) = nref.record_at(idx)?;
                        return Ok(rec.into_owned());
                    }
                    NodeKind::Interior => nref.find_child(rowid)?.1,
                }
            };
            page = next;
        }
    }

    /// Insert `(rowid, values)`.
    pub fn insert(&self, rowid: i64, values: &[Value<'_>]) -> Result<()> {
        let size = Record::calculate_size(rowid, values);
        if size > MAX_RECORD_SIZE {
            return Err(StorageError::serialization(format!(
                "record of {} bytes exceeds the {}-byte limit",
                size, MAX_RECORD_SIZE
            )));
        }
        match self.insert_rec(self.root, rowid, values)? {
            InsertOutcome::Done => Ok(()),
            InsertOutcome::Split { .. } => Err(StorageError::invalid_header(
                self.root,
                "split escaped the root",
            )),
        }
    }

    /// Delete the record with `rowid`.
    pub fn delete(&self, rowid: i64) -> Result<()> {
        let mut page = self.root;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                match nref.kind() {
                    NodeKind::Leaf => None,
                    NodeKind::Interior => Some(nref.find_child(rowid)?.1),
                }
            };
            match next {
                Some(child) => page = child,
                None => break,
            }
        }

        let guard = self.pager.fetch_page_mut(page)?;
        let mut pref = guard.write();
        let mut leaf = NodeMut::read(pref.as_bytes_mut(), page)?;
        leaf.delete_leaf_record(rowid)
    }

    /// 1 + the largest rowid in the tree (1 when empty)
    pub fn next_rowid(&self) -> Result<i64> {
        // Fast path: the rightmost leaf holds the maximum unless deletes
        // emptied it.
        let mut page = self.root;
        loop {
            let step = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                match nref.kind() {
                    NodeKind::Leaf => {
                        let n = nref.cell_count();
                        if n > 0 {
                            return Ok(nref.key_at(n - 1)?.saturating_add(1));
                        }
                        None
                    }
                    NodeKind::Interior => Some(nref.rightmost_child()),
                }
            };
            match step {
                Some(child) => page = child,
                None => break,
            }
        }

        // Rightmost leaf is empty: scan the chain for the last live key.
        let mut page = self.leftmost_leaf()?;
        let mut max: Option<i64> = None;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                let n = nref.cell_count();
                if n > 0 {
                    max = Some(nref.key_at(n - 1)?);
                }
                nref.next_leaf()
            };
            if !next.is_valid() {
                return Ok(max.map_or(1, |m| m.saturating_add(1)));
            }
            page = next;
        }
    }

    /// Number of records, via the leaf chain
    pub fn count_rows(&self) -> Result<u64> {
        let mut page = self.leftmost_leaf()?;
        let mut count = 0u64;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                count += nref.cell_count() as u64;
                nref.next_leaf()
            };
            if !next.is_valid() {
                return Ok(count);
            }
            page = next;
        }
    }

    /// Cursor positioned at the first record
    pub fn cursor(&self) -> Result<Cursor> {
        Cursor::start(self.pager.clone(), self.root)
    }

    /// Walk the whole tree checking structural invariants: header sanity,
    /// strictly ascending keys within `(min, max]` bounds at every node,
    /// and a leaf chain that visits exactly the leaves in key order.
    pub fn verify(&self) -> Result<()> {
        let mut leaves = Vec::new();
        self.verify_node(self.root, None, None, &mut leaves)?;

        for (i, &leaf) in leaves.iter().enumerate() {
            let guard = self.pager.fetch_page(leaf)?;
            let pref = guard.read();
            let nref = NodeRef::read(pref.as_bytes(), leaf)?;
            let next = nref.next_leaf();
            let expected = leaves.get(i + 1).copied().unwrap_or(PageId::NONE);
            if next != expected {
                return Err(StorageError::invalid_header(
                    leaf,
                    format!("leaf chain points to {} (expected {})", next, expected),
                ));
            }
        }
        Ok(())
    }

    fn verify_node(
        &self,
        page: PageId,
        min_exclusive: Option<i64>,
        max_inclusive: Option<i64>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let children = {
            let guard = self.pager.fetch_page(page)?;
            let pref = guard.read();
            let nref = NodeRef::read(pref.as_bytes(), page)?;

            let mut keys = Vec::with_capacity(nref.cell_count());
            for i in 0..nref.cell_count() {
                keys.push(nref.key_at(i)?);
            }
            if !keys.iter().tuple_windows().all(|(a, b)| a < b) {
                return Err(StorageError::invalid_header(
                    page,
                    "keys not strictly ascending",
                ));
            }
            for &key in &keys {
                let low_ok = min_exclusive.map_or(true, |m| key > m);
                let high_ok = max_inclusive.map_or(true, |m| key <= m);
                if !low_ok || !high_ok {
                    return Err(StorageError::invalid_header(
                        page,
                        format!(
                            "key {} outside bounds ({:?}, {:?}]",
                            key, min_exclusive, max_inclusive
                        ),
                    ));
                }
            }

            match nref.kind() {
                NodeKind::Leaf => {
                    leaves.push(page);
                    Vec::new()
                }
                NodeKind::Interior => {
                    let mut children = Vec::with_capacity(keys.len() + 1);
                    let mut low = min_exclusive;
                    for (i, &sep) in keys.iter().enumerate() {
                        children.push((nref.child_at(i)?, low, Some(sep)));
                        low = Some(sep);
                    }
                    children.push((nref.rightmost_child(), low, max_inclusive));
                    children
                }
            }
        };

        for (child, low, high) in children {
            if !child.is_valid() {
                return Err(StorageError::invalid_header(page, "missing child pointer"));
            }
            self.verify_node(child, low, high, leaves)?;
        }
        Ok(())
    }

    fn leftmost_leaf(&self) -> Result<PageId> {
        let mut page = self.root;
        loop {
            let next = {
                let guard = self.pager.fetch_page(page)?;
                let pref = guard.read();
                let nref = NodeRef::read(pref.as_bytes(), page)?;
                match nref.kind() {
                    NodeKind::Leaf => return Ok(page),
                    NodeKind::Interior => {
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

    fn insert_rec(&self, page: PageId, rowid: i64, values: &[Value<'_>]) -> Result<InsertOutcome> {
        let kind = {
            let guard = self.pager.fetch_page(page)?;
            let pref = guard.read();
            NodeRef::read(pref.as_bytes(), page)?.kind()
        };
        match kind {
            NodeKind::Leaf => self.insert_into_leaf(page, rowid, values),
            NodeKind::Interior => self.insert_into_interior(page, rowid, values),
        }
    }

    fn insert_into_leaf(
        &self,
        page: PageId,
        rowid: i64,
        values: &[Value<'_>],
    ) -> Result<InsertOutcome> {
        {
            let guard = self.pager.fetch_page_mut(page)?;
            let mut pref = guard.write();
            let mut leaf = NodeMut::read(pref.as_bytes_mut(), page)?;
            match leaf.insert_leaf_record(rowid, values, self.config.check_duplicates) {
                Ok(()) => return Ok(InsertOutcome::Done),
                Err(StorageError::PageFull { .. }) => {}
                Err(e) => return Err(e),
            }

            if page != self.root {
                let (rpage, rguard) = self.pager.allocate_page()?;
                let mut rref = rguard.write();
                let mut right = NodeMut::init_leaf(rref.as_bytes_mut(), rpage);
                let separator = node::split_leaf(&mut leaf, &mut right)?;
                debug!("split leaf {} -> {} at key {}", page, rpage, separator);
                if rowid <= separator {
                    leaf.insert_leaf_record(rowid, values, self.config.check_duplicates)?;
                } else {
                    right.insert_leaf_record(rowid, values, self.config.check_duplicates)?;
                }
                return Ok(InsertOutcome::Split {
                    right: rpage,
                    separator,
                });
            }
        }

        // The root leaf is full: grow the tree by one level, then redo
        // the descent against the new interior root.
        self.grow_root(None)?;
        self.insert_rec(self.root, rowid, values)
    }

    fn insert_into_interior(
        &self,
        page: PageId,
        rowid: i64,
        values: &[Value<'_>],
    ) -> Result<InsertOutcome> {
        let (slot, child) = {
            let guard = self.pager.fetch_page(page)?;
            let pref = guard.read();
            let nref = NodeRef::read(pref.as_bytes(), page)?;
            nref.find_child(rowid)?
        };

        let (right, separator) = match self.insert_rec(child, rowid, values)? {
            InsertOutcome::Done => return Ok(InsertOutcome::Done),
            InsertOutcome::Split { right, separator } => (right, separator),
        };

        // The child split in place: `child` kept the low half, `right`
        // received the high half. Route the slot we descended through to
        // `right` and add a cell binding `child` to the new separator.
        let pending = {
            let guard = self.pager.fetch_page_mut(page)?;
            let mut pref = guard.write();
            let mut interior = NodeMut::read(pref.as_bytes_mut(), page)?;
            match slot {
                ChildSlot::Cell(i) => interior.set_cell_child(i, right)?,
                ChildSlot::Rightmost => interior.set_rightmost(right),
            }
            match interior.insert_interior_cell(child, separator) {
                Ok(()) => return Ok(InsertOutcome::Done),
                Err(StorageError::PageFull { .. }) => {}
                Err(e) => return Err(e),
            }

            if page != self.root {
                let (ipage, iguard) = self.pager.allocate_page()?;
                let mut iref = iguard.write();
                let mut iright = NodeMut::init_interior(iref.as_bytes_mut(), ipage);
                let promoted = node::split_interior(&mut interior, &mut iright)?;
                debug!("split interior {} -> {} at key {}", page, ipage, promoted);
                if separator <= promoted {
                    interior.insert_interior_cell(child, separator)?;
                } else {
                    iright.insert_interior_cell(child, separator)?;
                }
                return Ok(InsertOutcome::Split {
                    right: ipage,
                    separator: promoted,
                });
            }
            (child, separator)
        };

        // The root interior is full and still owes a cell for the child
        // split; growth places it in the proper half.
        self.grow_root(Some(pending))?;
        Ok(InsertOutcome::Done)
    }

    /// Grow the tree by one level: move the root's content into two fresh
    /// children and re-initialize the root as an interior node over them.
    /// The root page number is preserved. `pending` is an interior cell
    /// owed to the old root by a child split that triggered the growth.
    fn grow_root(&self, pending: Option<(PageId, i64)>) -> Result<()> {
        let root = self.root;
        let root_guard = self.pager.fetch_page_mut(root)?;
        let mut root_ref = root_guard.write();

        let (lpage, lguard) = self.pager.allocate_page()?;
        let mut lref = lguard.write();
        let (rpage, rguard) = self.pager.allocate_page()?;
        let mut rref = rguard.write();

        let src = NodeRef::read(root_ref.as_bytes(), root)?;
        let kind = src.kind();
        let separator = match kind {
            NodeKind::Leaf => {
                let mut left = NodeMut::init_leaf(lref.as_bytes_mut(), lpage);
                left.set_next_leaf(src.next_leaf());
                left.absorb(&src)?;
                let mut right = NodeMut::init_leaf(rref.as_bytes_mut(), rpage);
                node::split_leaf(&mut left, &mut right)?
            }
            NodeKind::Interior => {
                let mut left = NodeMut::init_interior(lref.as_bytes_mut(), lpage);
                left.set_rightmost(src.rightmost_child());
                left.absorb(&src)?;
                let mut right = NodeMut::init_interior(rref.as_bytes_mut(), rpage);
                node::split_interior(&mut left, &mut right)?
            }
        };
        debug!(
            "growing root {}: children {} and {}, separator {}",
            root, lpage, rpage, separator
        );

        let mut new_root = NodeMut::init_interior(root_ref.as_bytes_mut(), root);
        new_root.set_rightmost(rpage);
        new_root.insert_interior_cell(lpage, separator)?;

        if let Some((child, sep)) = pending {
            if sep <= separator {
                let mut left = NodeMut::read(lref.as_bytes_mut(), lpage)?;
                left.insert_interior_cell(child, sep)?;
            } else {
                let mut right = NodeMut::read(rref.as_bytes_mut(), rpage)?;
                right.insert_interior_cell(child, sep)?;
            }
        }
        Ok(())
    }
}
