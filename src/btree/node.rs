//! B+ tree page layout.
//!
//! Every tree page carries a 12-byte node header at its header offset
//! (100 on page 1, 0 elsewhere), followed by the cell pointer array;
//! cell content grows downward from the end of the page:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ node header (8 common + 4 extension bytes)   │
//! ├──────────────────────────────────────────────┤
//! │ cell pointer array: cell_count × u16 LE  →   │
//! ├──────────────────────────────────────────────┤
//! │                free space                    │
//! ├──────────────────────────────────────────────┤
//! │       ←  [cell2][cell1][cell0]               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Common header: type byte (5 = interior, 13 = leaf), first_freeblock
//! u16 LE (reserved), cell_count u16 LE, cell_content_offset u16 LE,
//! fragmented_bytes u8. The 4-byte extension is the rightmost child
//! pointer (interior) or the next-leaf link (leaf), both big-endian.
//!
//! Leaf cells hold serialized records; interior cells hold a big-endian
//! child pointer followed by a varint separator key. A cell `(child, sep)`
//! covers keys in `(prev_sep, sep]`; the rightmost child covers keys
//! above the last separator.

use crate::error::{Result, StorageError};
use crate::record::{self, Record, Value};
use crate::types::bytes::{read_u32_be, write_u32_be};
use crate::types::varint::{read_varint, varint_len, write_varint};
use crate::types::{PageBuf, PageId, DB_HEADER_SIZE, PAGE_SIZE};

/// Page type byte for leaf nodes
pub const LEAF_TYPE: u8 = 13;

/// Page type byte for interior nodes
pub const INTERIOR_TYPE: u8 = 5;

/// Node header length: 8 common bytes + 4 extension bytes
pub const NODE_HEADER_LEN: usize = 12;

/// Where the node header starts on the given page. Page 1 reserves its
/// first 100 bytes for the database header.
pub fn header_offset(page: PageId) -> usize {
    if page == PageId::SCHEMA_ROOT {
        DB_HEADER_SIZE
    } else {
        0
    }
}

/// Node type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Interior,
}

impl NodeKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            LEAF_TYPE => Some(Self::Leaf),
            INTERIOR_TYPE => Some(Self::Interior),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Leaf => LEAF_TYPE,
            Self::Interior => INTERIOR_TYPE,
        }
    }
}

/// Decoded node header; the shared prefix plus the type-specific link
#[derive(Debug, Clone, Copy)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub first_freeblock: u16,
    pub cell_count: u16,
    pub cell_content_offset: u16,
    pub fragmented_bytes: u8,
    /// Interior: rightmost child page. Leaf: next leaf page (0 = none).
    link: u32,
}

impl NodeHeader {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            first_freeblock: 0,
            cell_count: 0,
            cell_content_offset: PAGE_SIZE as u16,
            fragmented_bytes: 0,
            link: 0,
        }
    }

    fn read(data: &[u8], base: usize, page: PageId) -> Result<Self> {
        if data.len() < base + NODE_HEADER_LEN {
            return Err(StorageError::invalid_header(page, "page too small for header"));
        }
        let h = &data[base..base + NODE_HEADER_LEN];
        let kind = NodeKind::from_byte(h[0]).ok_or_else(|| {
            StorageError::invalid_header(page, format!("unknown page type {}", h[0]))
        })?;
        let header = Self {
            kind,
            first_freeblock: u16::from_le_bytes([h[1], h[2]]),
            cell_count: u16::from_le_bytes([h[3], h[4]]),
            cell_content_offset: u16::from_le_bytes([h[5], h[6]]),
            fragmented_bytes: h[7],
            link: read_u32_be(&h[8..12]),
        };

        let header_end = base + NODE_HEADER_LEN;
        let cc = header.cell_content_offset as usize;
        if cc > PAGE_SIZE || cc < header_end + 2 * header.cell_count as usize {
            return Err(StorageError::invalid_header(
                page,
                format!(
                    "content offset {} overlaps pointer array ({} cells)",
                    cc, header.cell_count
                ),
            ));
        }
        Ok(header)
    }

    fn write(&self, data: &mut [u8], base: usize) {
        let h = &mut data[base..base + NODE_HEADER_LEN];
        h[0] = self.kind.as_byte();
        h[1..3].copy_from_slice(&self.first_freeblock.to_le_bytes());
        h[3..5].copy_from_slice(&self.cell_count.to_le_bytes());
        h[5..7].copy_from_slice(&self.cell_content_offset.to_le_bytes());
        h[7] = self.fragmented_bytes;
        write_u32_be(&mut h[8..12], self.link);
    }
}

/// Which slot of an interior node a descent went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSlot {
    Cell(usize),
    Rightmost,
}

/// Read-only view of a tree page
pub struct NodeRef<'a> {
    data: &'a [u8],
    page: PageId,
    base: usize,
    header: NodeHeader,
}

impl<'a> NodeRef<'a> {
    pub fn read(data: &'a [u8], page: PageId) -> Result<Self> {
        if data.len() < PAGE_SIZE {
            return Err(StorageError::InvalidBounds {
                page,
                start: 0,
                end: data.len(),
            });
        }
        let base = header_offset(page);
        let header = NodeHeader::read(data, base, page)?;
        Ok(Self {
            data,
            page,
            base,
            header,
        })
    }

    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn kind(&self) -> NodeKind {
        self.header.kind
    }

    pub fn is_leaf(&self) -> bool {
        self.header.kind == NodeKind::Leaf
    }

    pub fn cell_count(&self) -> usize {
        self.header.cell_count as usize
    }

    pub fn fragmented_bytes(&self) -> u8 {
        self.header.fragmented_bytes
    }

    pub fn cell_content_offset(&self) -> usize {
        self.header.cell_content_offset as usize
    }

    /// Next leaf in the chain (leaf pages only; NONE at the end)
    pub fn next_leaf(&self) -> PageId {
        debug_assert!(self.is_leaf());
        PageId::new(self.header.link)
    }

    /// Rightmost child (interior pages only)
    pub fn rightmost_child(&self) -> PageId {
        debug_assert!(!self.is_leaf());
        PageId::new(self.header.link)
    }

    fn header_end(&self) -> usize {
        self.base + NODE_HEADER_LEN
    }

    fn pointer_array_end(&self) -> usize {
        self.header_end() + 2 * self.cell_count()
    }

    /// Bytes available for one more cell plus its pointer slot
    pub fn free_space(&self) -> usize {
        self.cell_content_offset()
            .saturating_sub(self.pointer_array_end())
    }

    /// Absolute offset of cell `index`
    pub fn cell_pointer(&self, index: usize) -> Result<usize> {
        if index >= self.cell_count() {
            return Err(StorageError::InvalidCellPointer {
                page: self.page,
                index,
            });
        }
        let at = self.header_end() + 2 * index;
        let ptr = u16::from_le_bytes([self.data[at], self.data[at + 1]]) as usize;
        if ptr < self.cell_content_offset() || ptr >= PAGE_SIZE {
            return Err(StorageError::InvalidCellPointer {
                page: self.page,
                index,
            });
        }
        Ok(ptr)
    }

    /// Cell bytes from the cell's start to the end of the page
    fn cell_tail(&self, index: usize) -> Result<&'a [u8]> {
        let ptr = self.cell_pointer(index)?;
        Ok(&self.data[ptr..PAGE_SIZE])
    }

    /// Encoded size of cell `index`
    pub fn cell_size(&self, index: usize) -> Result<usize> {
        let tail = self.cell_tail(index)?;
        match self.header.kind {
            NodeKind::Leaf => record::peek_size(tail),
            NodeKind::Interior => {
                let (_, n) = read_varint(tail.get(4..).unwrap_or(&[])).ok_or_else(|| {
                    StorageError::deserialize("truncated interior separator")
                })?;
                Ok(4 + n)
            }
        }
    }

    /// The exact byte range of cell `index`
    pub fn raw_cell(&self, index: usize) -> Result<&'a [u8]> {
        let ptr = self.cell_pointer(index)?;
        let size = self.cell_size(index)?;
        let end = ptr + size;
        if end > PAGE_SIZE {
            return Err(StorageError::InvalidBounds {
                page: self.page,
                start: ptr,
                end,
            });
        }
        Ok(&self.data[ptr..end])
    }

    /// Key of cell `index`: the rowid on leaves, the separator on
    /// interior nodes.
    pub fn key_at(&self, index: usize) -> Result<i64> {
        let tail = self.cell_tail(index)?;
        match self.header.kind {
            NodeKind::Leaf => record::peek_rowid(tail),
            NodeKind::Interior => {
                let (sep, _) = read_varint(tail.get(4..).unwrap_or(&[])).ok_or_else(|| {
                    StorageError::deserialize("truncated interior separator")
                })?;
                Ok(sep as i64)
            }
        }
    }

    /// Child pointer of interior cell `index`
    pub fn child_at(&self, index: usize) -> Result<PageId> {
        debug_assert!(!self.is_leaf());
        let tail = self.cell_tail(index)?;
        if tail.len() < 4 {
            return Err(StorageError::InvalidCellPointer {
                page: self.page,
                index,
            });
        }
        Ok(PageId::new(read_u32_be(&tail[..4])))
    }

    /// Parse the record stored in leaf cell `index`, borrowing the page.
    pub fn record_at(&self, index: usize) -> Result<(Record<'a>, usize)> {
        if !self.is_leaf() {
            return Err(StorageError::invalid_header(
                self.page,
                "record read on interior page",
            ));
        }
        Record::parse(self.raw_cell(index)?)
    }

    /// First index whose key is ≥ `key` (== cell_count when none)
    pub fn lower_bound(&self, key: i64) -> Result<usize> {
        let mut lo = 0;
        let mut hi = self.cell_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Index of the cell with exactly this key, if present
    pub fn find_key(&self, key: i64) -> Result<Option<usize>> {
        let idx = self.lower_bound(key)?;
        if idx < self.cell_count() && self.key_at(idx)? == key {
            Ok(Some(idx))
        } else {
            Ok(None)
        }
    }

    /// Which child to descend into for `key`: the first cell whose
    /// separator is ≥ key, or the rightmost child.
    pub fn find_child(&self, key: i64) -> Result<(ChildSlot, PageId)> {
        debug_assert!(!self.is_leaf());
        let idx = self.lower_bound(key)?;
        if idx < self.cell_count() {
            Ok((ChildSlot::Cell(idx), self.child_at(idx)?))
        } else {
            let child = self.rightmost_child();
            if !child.is_valid() {
                return Err(StorageError::invalid_header(
                    self.page,
                    "interior node without rightmost child",
                ));
            }
            Ok((ChildSlot::Rightmost, child))
        }
    }
}

/// Mutable view of a tree page
pub struct NodeMut<'a> {
    data: &'a mut [u8],
    page: PageId,
    base: usize,
    header: NodeHeader,
}

impl<'a> NodeMut<'a> {
    pub fn read(data: &'a mut [u8], page: PageId) -> Result<Self> {
        if data.len() < PAGE_SIZE {
            return Err(StorageError::InvalidBounds {
                page,
                start: 0,
                end: data.len(),
            });
        }
        let base = header_offset(page);
        let header = NodeHeader::read(data, base, page)?;
        Ok(Self {
            data,
            page,
            base,
            header,
        })
    }

    /// Initialize `data` as an empty leaf page
    pub fn init_leaf(data: &'a mut [u8], page: PageId) -> Self {
        let base = header_offset(page);
        let header = NodeHeader::new(NodeKind::Leaf);
        header.write(data, base);
        Self {
            data,
            page,
            base,
            header,
        }
    }

    /// Initialize `data` as an empty interior page
    pub fn init_interior(data: &'a mut [u8], page: PageId) -> Self {
        let base = header_offset(page);
        let header = NodeHeader::new(NodeKind::Interior);
        header.write(data, base);
        Self {
            data,
            page,
            base,
            header,
        }
    }

    /// Read-only view of this node
    pub fn view(&self) -> NodeRef<'_> {
        NodeRef {
            data: self.data,
            page: self.page,
            base: self.base,
            header: self.header,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn kind(&self) -> NodeKind {
        self.header.kind
    }

    pub fn cell_count(&self) -> usize {
        self.header.cell_count as usize
    }

    pub fn next_leaf(&self) -> PageId {
        self.view().next_leaf()
    }

    pub fn rightmost_child(&self) -> PageId {
        self.view().rightmost_child()
    }

    fn sync_header(&mut self) {
        self.header.write(self.data, self.base);
    }

    pub fn set_next_leaf(&mut self, page: PageId) {
        debug_assert_eq!(self.header.kind, NodeKind::Leaf);
        self.header.link = page.value();
        self.sync_header();
    }

    pub fn set_rightmost(&mut self, page: PageId) {
        debug_assert_eq!(self.header.kind, NodeKind::Interior);
        self.header.link = page.value();
        self.sync_header();
    }

    /// Overwrite the child pointer of interior cell `index` in place
    pub fn set_cell_child(&mut self, index: usize, child: PageId) -> Result<()> {
        debug_assert_eq!(self.header.kind, NodeKind::Interior);
        let ptr = self.view().cell_pointer(index)?;
        if ptr + 4 > PAGE_SIZE {
            return Err(StorageError::InvalidCellPointer {
                page: self.page,
                index,
            });
        }
        write_u32_be(&mut self.data[ptr..ptr + 4], child.value());
        Ok(())
    }

    fn set_pointer(&mut self, index: usize, offset: usize) {
        let at = self.base + NODE_HEADER_LEN + 2 * index;
        self.data[at..at + 2].copy_from_slice(&(offset as u16).to_le_bytes());
    }

    fn check_space(&self, cell_size: usize) -> Result<()> {
        let header_end = self.base + NODE_HEADER_LEN;
        let needed_low = header_end + 2 * (self.cell_count() + 1);
        let cc = self.header.cell_content_offset as usize;
        if needed_low + cell_size > cc {
            return Err(StorageError::PageFull {
                page: self.page,
                needed: cell_size + 2,
                available: self.view().free_space(),
            });
        }
        Ok(())
    }

    /// Insert a record into a leaf at its sorted position.
    pub fn insert_leaf_record(
        &mut self,
        rowid: i64,
        values: &[Value<'_>],
        check_duplicates: bool,
    ) -> Result<()> {
        debug_assert_eq!(self.header.kind, NodeKind::Leaf);
        let size = Record::calculate_size(rowid, values);
        self.check_space(size)?;

        let idx = self.view().lower_bound(rowid)?;
        if check_duplicates && idx < self.cell_count() && self.view().key_at(idx)? == rowid {
            return Err(StorageError::DuplicateRowid(rowid));
        }

        let cc = self.header.cell_content_offset as usize;
        let new_cc = cc - size;
        Record::serialize(&mut self.data[new_cc..cc], rowid, values)?;
        self.open_pointer_slot(idx);
        self.set_pointer(idx, new_cc);
        self.header.cell_count += 1;
        self.header.cell_content_offset = new_cc as u16;
        self.sync_header();
        Ok(())
    }

    /// Insert an interior cell `(child, separator)` at its sorted position.
    pub fn insert_interior_cell(&mut self, child: PageId, separator: i64) -> Result<()> {
        debug_assert_eq!(self.header.kind, NodeKind::Interior);
        let size = 4 + varint_len(separator as u64);
        self.check_space(size)?;

        let idx = self.view().lower_bound(separator)?;
        let cc = self.header.cell_content_offset as usize;
        let new_cc = cc - size;
        write_u32_be(&mut self.data[new_cc..new_cc + 4], child.value());
        write_varint(&mut self.data[new_cc + 4..cc], separator as u64);
        self.open_pointer_slot(idx);
        self.set_pointer(idx, new_cc);
        self.header.cell_count += 1;
        self.header.cell_content_offset = new_cc as u16;
        self.sync_header();
        Ok(())
    }

    /// Shift pointers right by one slot to open index `idx`
    fn open_pointer_slot(&mut self, idx: usize) {
        let count = self.cell_count();
        let start = self.base + NODE_HEADER_LEN + 2 * idx;
        let end = self.base + NODE_HEADER_LEN + 2 * count;
        self.data.copy_within(start..end, start + 2);
    }

    /// Remove the leaf cell holding `rowid`.
    pub fn delete_leaf_record(&mut self, rowid: i64) -> Result<()> {
        debug_assert_eq!(self.header.kind, NodeKind::Leaf);
        let idx = self
            .view()
            .find_key(rowid)?
            .ok_or(StorageError::CellNotFound(rowid))?;
        let ptr = self.view().cell_pointer(idx)?;
        let size = self.view().cell_size(idx)?;

        // Close the pointer gap.
        let count = self.cell_count();
        let start = self.base + NODE_HEADER_LEN + 2 * (idx + 1);
        let end = self.base + NODE_HEADER_LEN + 2 * count;
        self.data.copy_within(start..end, start - 2);
        self.header.cell_count -= 1;

        if ptr == self.header.cell_content_offset as usize {
            self.header.cell_content_offset += size as u16;
        } else {
            let add = size.min(255) as u8;
            self.header.fragmented_bytes = self.header.fragmented_bytes.saturating_add(add);
        }
        self.sync_header();
        Ok(())
    }

    /// Append a pre-encoded cell. The caller must append cells in
    /// ascending key order.
    pub fn append_raw(&mut self, cell: &[u8]) -> Result<()> {
        self.check_space(cell.len())?;
        let cc = self.header.cell_content_offset as usize;
        let new_cc = cc - cell.len();
        self.data[new_cc..cc].copy_from_slice(cell);
        let idx = self.cell_count();
        self.set_pointer(idx, new_cc);
        self.header.cell_count += 1;
        self.header.cell_content_offset = new_cc as u16;
        self.sync_header();
        Ok(())
    }

    /// Append every cell of `src` in order.
    pub fn absorb(&mut self, src: &NodeRef<'_>) -> Result<()> {
        for i in 0..src.cell_count() {
            self.append_raw(src.raw_cell(i)?)?;
        }
        Ok(())
    }

    /// Keep only the first `keep` cells, rewritten compactly so that the
    /// content region is contiguous and `fragmented_bytes` is zero.
    fn retain_prefix(&mut self, keep: usize) -> Result<()> {
        let mut tmp = PageBuf::new();
        {
            let mut t = match self.header.kind {
                NodeKind::Leaf => {
                    let mut t = NodeMut::init_leaf(&mut tmp, self.page);
                    t.set_next_leaf(self.view().next_leaf());
                    t
                }
                NodeKind::Interior => {
                    let mut t = NodeMut::init_interior(&mut tmp, self.page);
                    t.set_rightmost(self.view().rightmost_child());
                    t
                }
            };
            for i in 0..keep {
                t.append_raw(self.view().raw_cell(i)?)?;
            }
        }
        let base = self.base;
        self.data[base..].copy_from_slice(&tmp[base..]);
        self.header = NodeHeader::read(self.data, base, self.page)?;
        Ok(())
    }
}

/// Split a full leaf: move the last ⌈n/2⌉ cells into the empty `right`
/// page, splice the leaf chain, and rewrite `left` compacted. Returns the
/// separator (the max key remaining in `left`).
pub fn split_leaf(left: &mut NodeMut<'_>, right: &mut NodeMut<'_>) -> Result<i64> {
    let n = left.cell_count();
    if n < 2 {
        return Err(StorageError::invalid_header(
            left.page_id(),
            format!("cannot split a leaf holding {} cells", n),
        ));
    }
    let moved = (n + 1) / 2;
    let keep = n - moved;

    for i in keep..n {
        right.append_raw(left.view().raw_cell(i)?)?;
    }
    right.set_next_leaf(left.next_leaf());
    left.set_next_leaf(right.page_id());
    left.retain_prefix(keep)?;
    left.view().key_at(keep - 1)
}

/// Split a full interior node around its middle cell: the middle key is
/// promoted, its child becomes `left`'s rightmost, the cells above it
/// move to `right`, and the old rightmost becomes `right`'s rightmost.
pub fn split_interior(left: &mut NodeMut<'_>, right: &mut NodeMut<'_>) -> Result<i64> {
    let n = left.cell_count();
    debug_assert!(n >= 3, "splitting an interior node with {} cells", n);
    let mid = n / 2;
    let promoted = left.view().key_at(mid)?;
    let mid_child = left.view().child_at(mid)?;

    for i in mid + 1..n {
        right.append_raw(left.view().raw_cell(i)?)?;
    }
    right.set_rightmost(left.rightmost_child());
    left.set_rightmost(mid_child);
    left.retain_prefix(mid)?;
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_page() -> (PageBuf, PageId) {
        (PageBuf::new(), PageId::new(7))
    }

    fn insert_int(node: &mut NodeMut<'_>, rowid: i64) {
        node.insert_leaf_record(rowid, &[Value::Integer(rowid)], true)
            .unwrap();
    }

    #[test]
    fn test_init_and_read_back() {
        let (mut buf, page) = leaf_page();
        NodeMut::init_leaf(&mut buf, page);

        let node = NodeRef::read(&buf, page).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.cell_count(), 0);
        assert_eq!(node.cell_content_offset(), PAGE_SIZE);
        assert_eq!(node.next_leaf(), PageId::NONE);
    }

    #[test]
    fn test_unknown_page_type_rejected() {
        let (mut buf, page) = leaf_page();
        NodeMut::init_leaf(&mut buf, page);
        buf[0] = 0x42;
        assert!(matches!(
            NodeRef::read(&buf, page),
            Err(StorageError::InvalidPageHeader { .. })
        ));
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);

        for rowid in [50, 10, 30, 40, 20] {
            insert_int(&mut node, rowid);
        }

        let view = node.view();
        assert_eq!(view.cell_count(), 5);
        let keys: Vec<i64> = (0..5).map(|i| view.key_at(i).unwrap()).collect();
        assert_eq!(keys, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_duplicate_detection() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);

        insert_int(&mut node, 10);
        assert!(matches!(
            node.insert_leaf_record(10, &[Value::Integer(0)], true),
            Err(StorageError::DuplicateRowid(10))
        ));

        // With checking disabled both cells are stored.
        node.insert_leaf_record(10, &[Value::Integer(0)], false)
            .unwrap();
        assert_eq!(node.cell_count(), 2);
    }

    #[test]
    fn test_find_key_and_lower_bound() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        for rowid in [2, 4, 6, 8] {
            insert_int(&mut node, rowid);
        }

        let view = node.view();
        assert_eq!(view.find_key(4).unwrap(), Some(1));
        assert_eq!(view.find_key(5).unwrap(), None);
        assert_eq!(view.lower_bound(1).unwrap(), 0);
        assert_eq!(view.lower_bound(5).unwrap(), 2);
        assert_eq!(view.lower_bound(9).unwrap(), 4);
    }

    #[test]
    fn test_page_full() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);

        let blob = vec![0u8; 900];
        let mut rowid = 1;
        loop {
            match node.insert_leaf_record(rowid, &[Value::blob(&blob)], true) {
                Ok(()) => rowid += 1,
                Err(StorageError::PageFull { needed, available, .. }) => {
                    assert!(needed > available);
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // A 4KB page fits four ~900-byte records but not five.
        assert_eq!(node.cell_count(), 4);
    }

    #[test]
    fn test_delete_last_written_cell_retracts_content_offset() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        insert_int(&mut node, 1);
        insert_int(&mut node, 2);

        let before = node.view().cell_content_offset();
        // Rowid 2 was written last, at the lowest offset.
        node.delete_leaf_record(2).unwrap();
        assert!(node.view().cell_content_offset() > before);
        assert_eq!(node.view().fragmented_bytes(), 0);
    }

    #[test]
    fn test_delete_interior_cell_accumulates_fragmentation() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        insert_int(&mut node, 1);
        insert_int(&mut node, 2);
        insert_int(&mut node, 3);

        // Rowid 1 sits at the top of the content region; deleting it
        // leaves a hole.
        node.delete_leaf_record(1).unwrap();
        assert!(node.view().fragmented_bytes() > 0);
        assert_eq!(node.cell_count(), 2);
        assert_eq!(node.view().key_at(0).unwrap(), 2);
        assert_eq!(node.view().key_at(1).unwrap(), 3);
    }

    #[test]
    fn test_delete_missing_rowid() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        insert_int(&mut node, 1);
        assert!(matches!(
            node.delete_leaf_record(99),
            Err(StorageError::CellNotFound(99))
        ));
    }

    #[test]
    fn test_record_roundtrip_through_page() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        let values = vec![Value::Integer(100), Value::text("Row One")];
        node.insert_leaf_record(1, &values, true).unwrap();

        let view = node.view();
        let (rec, _) = view.record_at(0).unwrap();
        assert_eq!(rec.rowid, 1);
        assert_eq!(rec.values[0].as_integer(), Some(100));
        assert_eq!(rec.values[1].as_text(), Some("Row One"));
    }

    #[test]
    fn test_split_leaf() {
        let mut lbuf = PageBuf::new();
        let mut rbuf = PageBuf::new();
        let lpage = PageId::new(5);
        let rpage = PageId::new(9);

        let mut left = NodeMut::init_leaf(&mut lbuf, lpage);
        left.set_next_leaf(PageId::new(77));
        for rowid in 1..=10 {
            insert_int(&mut left, rowid);
        }

        let mut right = NodeMut::init_leaf(&mut rbuf, rpage);
        let sep = split_leaf(&mut left, &mut right).unwrap();

        assert_eq!(left.cell_count(), 5);
        assert_eq!(right.cell_count(), 5);
        assert_eq!(sep, 5);
        assert_eq!(left.view().fragmented_bytes(), 0);

        // Chain spliced: left -> right -> old successor.
        assert_eq!(left.next_leaf(), rpage);
        assert_eq!(right.next_leaf(), PageId::new(77));

        // All left keys ≤ separator < all right keys.
        for i in 0..left.cell_count() {
            assert!(left.view().key_at(i).unwrap() <= sep);
        }
        for i in 0..right.cell_count() {
            assert!(right.view().key_at(i).unwrap() > sep);
        }
    }

    #[test]
    fn test_split_interior() {
        let mut lbuf = PageBuf::new();
        let mut rbuf = PageBuf::new();
        let mut left = NodeMut::init_interior(&mut lbuf, PageId::new(4));
        left.set_rightmost(PageId::new(100));
        for (i, sep) in [10i64, 20, 30, 40, 50].iter().enumerate() {
            left.insert_interior_cell(PageId::new(i as u32 + 1), *sep)
                .unwrap();
        }

        let mut right = NodeMut::init_interior(&mut rbuf, PageId::new(8));
        let promoted = split_interior(&mut left, &mut right).unwrap();

        // Middle cell (child 3, sep 30) was promoted.
        assert_eq!(promoted, 30);
        assert_eq!(left.cell_count(), 2);
        assert_eq!(left.rightmost_child(), PageId::new(3));
        assert_eq!(right.cell_count(), 2);
        assert_eq!(right.rightmost_child(), PageId::new(100));
        assert_eq!(right.view().key_at(0).unwrap(), 40);
        assert_eq!(right.view().key_at(1).unwrap(), 50);
    }

    #[test]
    fn test_interior_find_child() {
        let mut buf = PageBuf::new();
        let mut node = NodeMut::init_interior(&mut buf, PageId::new(2));
        node.set_rightmost(PageId::new(30));
        node.insert_interior_cell(PageId::new(10), 100).unwrap();
        node.insert_interior_cell(PageId::new(20), 200).unwrap();

        let view = node.view();
        // Keys ≤ 100 descend into child 10.
        assert_eq!(
            view.find_child(50).unwrap(),
            (ChildSlot::Cell(0), PageId::new(10))
        );
        assert_eq!(
            view.find_child(100).unwrap(),
            (ChildSlot::Cell(0), PageId::new(10))
        );
        // Keys in (100, 200] descend into child 20.
        assert_eq!(
            view.find_child(101).unwrap(),
            (ChildSlot::Cell(1), PageId::new(20))
        );
        // Keys above the last separator descend into the rightmost child.
        assert_eq!(
            view.find_child(201).unwrap(),
            (ChildSlot::Rightmost, PageId::new(30))
        );
    }

    #[test]
    fn test_set_cell_child_in_place() {
        let mut buf = PageBuf::new();
        let mut node = NodeMut::init_interior(&mut buf, PageId::new(2));
        node.set_rightmost(PageId::new(9));
        node.insert_interior_cell(PageId::new(5), 42).unwrap();

        node.set_cell_child(0, PageId::new(6)).unwrap();
        assert_eq!(node.view().child_at(0).unwrap(), PageId::new(6));
        assert_eq!(node.view().key_at(0).unwrap(), 42);
    }

    #[test]
    fn test_page_one_header_offset() {
        let mut buf = PageBuf::new();
        let page = PageId::SCHEMA_ROOT;
        let mut node = NodeMut::init_leaf(&mut buf, page);
        insert_int(&mut node, 1);

        // The node header sits past the database header region.
        assert_eq!(buf[DB_HEADER_SIZE], LEAF_TYPE);
        let node = NodeRef::read(&buf, page).unwrap();
        assert_eq!(node.cell_count(), 1);
        assert_eq!(node.key_at(0).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_cell_pointer_rejected() {
        let (mut buf, page) = leaf_page();
        let mut node = NodeMut::init_leaf(&mut buf, page);
        insert_int(&mut node, 1);

        // Point the first cell below the content region.
        buf[NODE_HEADER_LEN..NODE_HEADER_LEN + 2].copy_from_slice(&100u16.to_le_bytes());
        let node = NodeRef::read(&buf, page).unwrap();
        assert!(matches!(
            node.key_at(0),
            Err(StorageError::InvalidCellPointer { .. })
        ));
    }
}
