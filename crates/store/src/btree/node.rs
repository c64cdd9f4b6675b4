//! Page-backed B+ tree nodes.
//!
//! Node page layout (all integers big-endian):
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----
//! 0       4      Cookie: "BPTI" (internal) or "BPTL" (leaf)
//! 4       4      Flags (bit 0: root)
//! 8       8      Last-modified timestamp (seconds since epoch)
//! 16      4      Key size
//! 20      4      Value size of the tree
//! 24      4      Entry count
//! 28      4      Checksum (XXH3-64 of bytes 32.., truncated to 32 bits)
//! 32      ...    Entries: key then value (leaf) or key then u64 child id (internal)
//! ```
//!
//! Nodes are immutable once built. Every change produces a new node that is
//! written to a new page; see the `rewrite` module.

use std::cmp::Ordering;

use crate::{
    config::ConfigError,
    error::{Error, PageId, Result},
    keys::{read_u32, read_u64},
    page::{COOKIE_BTREE_INTERNAL, COOKIE_BTREE_LEAF, COOKIE_LEN, Page, checksum},
};

/// Size of the node header in bytes.
pub const NODE_HEADER_SIZE: usize = 32;

/// Width of a child page id in an internal node entry.
pub const CHILD_ID_SIZE: usize = 8;

/// Smallest per-node capacity a tree accepts.
pub const MIN_NODE_CAPACITY: usize = 4;

/// Flag bit marking the root node of a tree.
pub const FLAG_ROOT: u32 = 1;

/// Page id carried by nodes that have not been written yet.
pub(crate) const UNWRITTEN: PageId = PageId::MAX;

/// Node variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Sorted (key, child page id) pairs.
    Internal,
    /// Sorted (key, value) pairs.
    Leaf,
}

impl NodeKind {
    fn cookie(self) -> [u8; COOKIE_LEN] {
        match self {
            NodeKind::Internal => COOKIE_BTREE_INTERNAL,
            NodeKind::Leaf => COOKIE_BTREE_LEAF,
        }
    }
}

/// Fixed sizes shared by every node of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Page size in bytes.
    pub page_size: usize,
    /// Key size in bytes.
    pub key_size: usize,
    /// Leaf value size in bytes.
    pub val_size: usize,
}

impl NodeLayout {
    /// Creates a layout, checking that nodes can hold enough entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero key size and
    /// [`Error::CapacityExceeded`] if either node type would hold fewer than
    /// [`MIN_NODE_CAPACITY`] entries.
    pub fn new(page_size: usize, key_size: usize, val_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(ConfigError::Validation { message: "key_size must be at least 1".into() }
                .into());
        }

        let layout = Self { page_size, key_size, val_size };
        if layout.max_leaf_keys() < MIN_NODE_CAPACITY
            || layout.max_internal_keys() < MIN_NODE_CAPACITY
        {
            let widest = key_size + val_size.max(CHILD_ID_SIZE);
            return Err(Error::CapacityExceeded {
                needed: NODE_HEADER_SIZE + MIN_NODE_CAPACITY * widest,
                available: page_size,
            });
        }
        Ok(layout)
    }

    fn body_size(&self) -> usize {
        self.page_size.saturating_sub(NODE_HEADER_SIZE)
    }

    /// Maximum number of entries in a leaf.
    pub fn max_leaf_keys(&self) -> usize {
        self.body_size() / (self.key_size + self.val_size).max(1)
    }

    /// Maximum number of entries in an internal node.
    pub fn max_internal_keys(&self) -> usize {
        self.body_size() / (self.key_size + CHILD_ID_SIZE)
    }

    /// Maximum number of entries for a node kind.
    pub fn max_keys(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Internal => self.max_internal_keys(),
            NodeKind::Leaf => self.max_leaf_keys(),
        }
    }

    /// Minimum number of entries a non-root node of `kind` keeps.
    pub fn min_keys(&self, kind: NodeKind) -> usize {
        self.max_keys(kind) / 2
    }

    /// Width of the non-key part of an entry.
    pub fn slot_size(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Internal => CHILD_ID_SIZE,
            NodeKind::Leaf => self.val_size,
        }
    }
}

/// A decoded B+ tree node.
#[derive(Clone, PartialEq, Eq)]
pub struct BTreeNode {
    pub(crate) page_id: PageId,
    pub(crate) kind: NodeKind,
    pub(crate) flags: u32,
    pub(crate) last_modified: u64,
    pub(crate) key_size: usize,
    pub(crate) val_size: usize,
    /// `len * key_size` bytes of sorted keys.
    pub(crate) keys: Vec<u8>,
    /// `len * slot_size` bytes of values or big-endian child ids.
    pub(crate) slots: Vec<u8>,
}

impl BTreeNode {
    /// Builds an unwritten node from flat key and slot buffers.
    pub(crate) fn build(
        kind: NodeKind,
        layout: &NodeLayout,
        keys: Vec<u8>,
        slots: Vec<u8>,
        root: bool,
        timestamp: u64,
    ) -> Self {
        debug_assert_eq!(keys.len() % layout.key_size, 0);
        Self {
            page_id: UNWRITTEN,
            kind,
            flags: if root { FLAG_ROOT } else { 0 },
            last_modified: timestamp,
            key_size: layout.key_size,
            val_size: layout.val_size,
            keys,
            slots,
        }
    }

    /// Decodes a node page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPage`] if the cookie is unknown, the header is
    /// inconsistent with the page size, the checksum does not match, keys are
    /// not strictly ascending, or a child id does not precede the node's page.
    pub fn decode(page: &Page) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptPage { page_id: page.id, reason };
        let buf = &page.data[..];

        if buf.len() < NODE_HEADER_SIZE {
            let len = buf.len();
            return Err(corrupt(format!("page of {len} bytes is shorter than a node header")));
        }
        let kind = match page.cookie() {
            Some(COOKIE_BTREE_INTERNAL) => NodeKind::Internal,
            Some(COOKIE_BTREE_LEAF) => NodeKind::Leaf,
            other => {
                return Err(corrupt(format!("unknown node cookie {other:?}")));
            },
        };

        let flags = read_u32(buf, 4);
        let last_modified = read_u64(buf, 8);
        let key_size = read_u32(buf, 16) as usize;
        let val_size = read_u32(buf, 20) as usize;
        let count = read_u32(buf, 24) as usize;
        let stored_checksum = read_u32(buf, 28);

        if key_size == 0 {
            return Err(corrupt("zero key size".into()));
        }
        let slot_size = match kind {
            NodeKind::Internal => CHILD_ID_SIZE,
            NodeKind::Leaf => val_size,
        };
        let entry_size = key_size
            .checked_add(slot_size)
            .ok_or_else(|| corrupt(format!("entry size overflow ({key_size} + {slot_size})")))?;
        let capacity = (buf.len() - NODE_HEADER_SIZE) / entry_size;
        if count > capacity {
            return Err(corrupt(format!("entry count {count} exceeds capacity {capacity}")));
        }

        let body = &buf[NODE_HEADER_SIZE..];
        let actual_checksum = checksum(body);
        if actual_checksum != stored_checksum {
            return Err(corrupt(format!(
                "checksum mismatch: stored {stored_checksum:#010x}, got {actual_checksum:#010x}"
            )));
        }

        let mut keys = Vec::with_capacity(count * key_size);
        let mut slots = Vec::with_capacity(count * slot_size);
        for entry in body.chunks_exact(entry_size).take(count) {
            keys.extend_from_slice(&entry[..key_size]);
            slots.extend_from_slice(&entry[key_size..]);
        }

        let node =
            Self { page_id: page.id, kind, flags, last_modified, key_size, val_size, keys, slots };

        if !node.keys_strictly_ascending() {
            return Err(corrupt("keys are not strictly ascending".into()));
        }
        if kind == NodeKind::Internal
            && let Some(child) = node.children().find(|&child| child >= page.id)
        {
            return Err(corrupt(format!("child page {child} does not precede its parent")));
        }
        Ok(node)
    }

    /// Encodes the node into a page-sized buffer.
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[0..4].copy_from_slice(&self.kind.cookie());
        buf[4..8].copy_from_slice(&self.flags.to_be_bytes());
        buf[8..16].copy_from_slice(&self.last_modified.to_be_bytes());
        buf[16..20].copy_from_slice(&(self.key_size as u32).to_be_bytes());
        buf[20..24].copy_from_slice(&(self.val_size as u32).to_be_bytes());
        buf[24..28].copy_from_slice(&(self.len() as u32).to_be_bytes());

        let slot_size = self.slot_size();
        let mut offset = NODE_HEADER_SIZE;
        for index in 0..self.len() {
            buf[offset..offset + self.key_size].copy_from_slice(self.key(index));
            offset += self.key_size;
            buf[offset..offset + slot_size].copy_from_slice(self.slot(index));
            offset += slot_size;
        }

        let sum = checksum(&buf[NODE_HEADER_SIZE..]);
        buf[28..32].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Returns the page this node was read from or written to.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the node variant.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Returns true if the node is flagged as the root of its tree.
    pub fn is_root(&self) -> bool {
        self.flags & FLAG_ROOT != 0
    }

    /// Seconds since the epoch when this node was written.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Value size of the tree in bytes.
    pub fn val_size(&self) -> usize {
        self.val_size
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len() / self.key_size
    }

    /// Returns true if the node has no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn slot_size(&self) -> usize {
        match self.kind {
            NodeKind::Internal => CHILD_ID_SIZE,
            NodeKind::Leaf => self.val_size,
        }
    }

    /// Returns the key at `index`.
    pub fn key(&self, index: usize) -> &[u8] {
        &self.keys[index * self.key_size..(index + 1) * self.key_size]
    }

    pub(crate) fn slot(&self, index: usize) -> &[u8] {
        let size = self.slot_size();
        &self.slots[index * size..(index + 1) * size]
    }

    /// Returns the value at `index` of a leaf, or `None` for internal nodes.
    pub fn value(&self, index: usize) -> Option<&[u8]> {
        (self.is_leaf() && index < self.len()).then(|| self.slot(index))
    }

    /// Returns the child id at `index` of an internal node, or `None` for leaves.
    pub fn child(&self, index: usize) -> Option<PageId> {
        (!self.is_leaf() && index < self.len()).then(|| read_u64(self.slot(index), 0))
    }

    /// Iterates keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.keys.chunks_exact(self.key_size)
    }

    /// Iterates child ids of an internal node (empty for leaves).
    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        let count = if self.is_leaf() { 0 } else { self.len() };
        (0..count).map(|i| read_u64(self.slot(i), 0))
    }

    /// All keys, copied.
    pub fn all_keys(&self) -> Vec<Vec<u8>> {
        self.keys().map(<[u8]>::to_vec).collect()
    }

    /// All (key, value) pairs of a leaf, copied. Empty for internal nodes.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        if !self.is_leaf() {
            return Vec::new();
        }
        (0..self.len()).map(|i| (self.key(i).to_vec(), self.slot(i).to_vec())).collect()
    }

    /// All child page ids of an internal node. Empty for leaves.
    pub fn children_page_ids(&self) -> Vec<PageId> {
        self.children().collect()
    }

    /// Smallest key in the node.
    pub fn min_key(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.key(0))
    }

    /// Largest key in the node.
    pub fn max_key(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.key(self.len() - 1))
    }

    /// Binary search for `key`: `Ok(index)` if present, `Err(insert_at)` otherwise.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key(mid).cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Index of the last entry whose key is `<= key`, or 0 if `key` is smaller
    /// than every key.
    pub fn floor_index(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(index) => index,
            Err(insert_at) => insert_at.saturating_sub(1),
        }
    }

    /// Number of leading entries whose keys satisfy `pred`, for a predicate
    /// that is true on a prefix of the keys.
    pub fn partition_point(&self, mut pred: impl FnMut(&[u8]) -> bool) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.key(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Child routed to for `key`: the greatest separator `<= key`, or the
    /// first child for keys below every separator. `None` for leaves.
    pub fn child_for_key(&self, key: &[u8]) -> Option<PageId> {
        if self.is_leaf() || self.is_empty() {
            return None;
        }
        self.child(self.floor_index(key))
    }

    /// Looks up `key` in a leaf.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        if !self.is_leaf() {
            return None;
        }
        self.search(key).ok().map(|index| self.slot(index))
    }

    pub(crate) fn keys_strictly_ascending(&self) -> bool {
        self.keys().zip(self.keys().skip(1)).all(|(a, b)| a < b)
    }
}

impl std::fmt::Debug for BTreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("BTreeNode");
        s.field("page_id", &self.page_id)
            .field("kind", &self.kind)
            .field("root", &self.is_root())
            .field("len", &self.len());
        if !self.is_leaf() {
            s.field("children", &self.children_page_ids());
        }
        s.finish()
    }
}
