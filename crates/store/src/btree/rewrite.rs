//! Copy-on-write node rewrites: splitting, merging, and redistribution.
//!
//! # Algorithm Overview
//!
//! Nothing here mutates a node. Every function returns freshly built,
//! unwritten nodes which the tree then writes to new pages, bottom-up.
//!
//! ## Splitting (insertion path)
//!
//! 1. **Leaf rewrite** (`rewrite_leaf_insert`): the entry is inserted in key
//!    order, or its value replaced. If the leaf then holds more than
//!    `max_leaf_keys` entries it is split at the midpoint; the right half's
//!    minimum key becomes its separator in the parent.
//!
//! 2. **Internal rewrite** (`rewrite_internal`): one child entry is replaced
//!    with the one or two entries produced below it. Separators are always the
//!    minimum key of their child, so they are copied up, never moved. An
//!    overfull internal node splits the same way a leaf does.
//!
//! A split of the root produces two non-root halves; the tree then allocates a
//! new internal root above them.
//!
//! ## Merging (deletion path)
//!
//! `rewrite_leaf_remove` drops a key. When a non-root node falls below
//! `max / 2` entries the tree pairs it with its fullest sibling and calls
//! `combine`: if both fit in one node they merge, otherwise the combined
//! entries are redistributed evenly across two nodes.

use std::ops::Range;

use super::node::{BTreeNode, NodeKind, NodeLayout};
use crate::error::PageId;

/// Outcome of rewriting one node.
#[derive(Debug)]
pub(crate) enum Rewrite {
    /// The rewritten node fits in one page.
    Single(BTreeNode),
    /// The node overflowed and was split. Neither half carries the root flag.
    Split {
        /// Lower half.
        left: BTreeNode,
        /// Upper half; its minimum key is the separator.
        right: BTreeNode,
    },
}

/// Outcome of adding an entry to a leaf.
#[derive(Debug)]
pub(crate) enum LeafInsert {
    /// The key already maps to the same value; nothing needs writing.
    Unchanged,
    /// The leaf was rewritten.
    Rewritten(Rewrite),
}

impl BTreeNode {
    /// Adds or replaces `(key, value)` in a leaf.
    pub(crate) fn rewrite_leaf_insert(
        &self,
        key: &[u8],
        value: &[u8],
        layout: &NodeLayout,
        timestamp: u64,
    ) -> LeafInsert {
        debug_assert!(self.is_leaf());
        let (keys, slots) = match self.search(key) {
            Ok(index) if self.slot(index) == value => return LeafInsert::Unchanged,
            Ok(index) => {
                let mut slots = self.slots.clone();
                let size = self.slot_size();
                slots[index * size..(index + 1) * size].copy_from_slice(value);
                (self.keys.clone(), slots)
            },
            Err(index) => (
                splice(&self.keys, self.key_size, index..index, &[key]),
                splice(&self.slots, self.slot_size(), index..index, &[value]),
            ),
        };
        LeafInsert::Rewritten(split_if_needed(
            NodeKind::Leaf,
            layout,
            keys,
            slots,
            self.is_root(),
            timestamp,
        ))
    }

    /// Removes `key` from a leaf. Returns `None` if the key is absent.
    ///
    /// The result may be underfull; rebalancing is the caller's job.
    pub(crate) fn rewrite_leaf_remove(
        &self,
        key: &[u8],
        layout: &NodeLayout,
        timestamp: u64,
    ) -> Option<BTreeNode> {
        debug_assert!(self.is_leaf());
        let index = self.search(key).ok()?;
        Some(BTreeNode::build(
            NodeKind::Leaf,
            layout,
            splice(&self.keys, self.key_size, index..index + 1, &[]),
            splice(&self.slots, self.slot_size(), index..index + 1, &[]),
            self.is_root(),
            timestamp,
        ))
    }

    /// Replaces the child entries at `range` of an internal node with
    /// `entries`, given as (minimum key, child id) pairs.
    pub(crate) fn rewrite_internal(
        &self,
        range: Range<usize>,
        entries: &[(Vec<u8>, PageId)],
        layout: &NodeLayout,
        timestamp: u64,
    ) -> Rewrite {
        debug_assert!(!self.is_leaf());
        let new_keys: Vec<&[u8]> = entries.iter().map(|(key, _)| key.as_slice()).collect();
        let ids: Vec<[u8; 8]> = entries.iter().map(|(_, id)| id.to_be_bytes()).collect();
        let new_slots: Vec<&[u8]> = ids.iter().map(|id| id.as_slice()).collect();

        split_if_needed(
            NodeKind::Internal,
            layout,
            splice(&self.keys, self.key_size, range.clone(), &new_keys),
            splice(&self.slots, self.slot_size(), range, &new_slots),
            self.is_root(),
            timestamp,
        )
    }

    /// Returns a copy of this node with the root flag set or cleared.
    pub(crate) fn with_root_flag(&self, root: bool, layout: &NodeLayout, timestamp: u64) -> Self {
        BTreeNode::build(self.kind, layout, self.keys.clone(), self.slots.clone(), root, timestamp)
    }
}

/// Merges two adjacent non-root siblings, or redistributes their entries
/// evenly if they do not fit in one node.
pub(crate) fn combine(
    left: &BTreeNode,
    right: &BTreeNode,
    layout: &NodeLayout,
    timestamp: u64,
) -> Rewrite {
    debug_assert_eq!(left.kind, right.kind);
    let mut keys = Vec::with_capacity(left.keys.len() + right.keys.len());
    keys.extend_from_slice(&left.keys);
    keys.extend_from_slice(&right.keys);
    let mut slots = Vec::with_capacity(left.slots.len() + right.slots.len());
    slots.extend_from_slice(&left.slots);
    slots.extend_from_slice(&right.slots);

    split_if_needed(left.kind, layout, keys, slots, false, timestamp)
}

/// Builds one node from the flat buffers, or two halves split at the
/// midpoint if the entries exceed the node capacity.
fn split_if_needed(
    kind: NodeKind,
    layout: &NodeLayout,
    keys: Vec<u8>,
    slots: Vec<u8>,
    root: bool,
    timestamp: u64,
) -> Rewrite {
    let count = keys.len() / layout.key_size;
    if count <= layout.max_keys(kind) {
        return Rewrite::Single(BTreeNode::build(kind, layout, keys, slots, root, timestamp));
    }

    let mid = count / 2;
    let mut left_keys = keys;
    let right_keys = left_keys.split_off(mid * layout.key_size);
    let mut left_slots = slots;
    let right_slots = left_slots.split_off(mid * layout.slot_size(kind));

    tracing::trace!(?kind, count, left = mid, right = count - mid, "Splitting node");

    Rewrite::Split {
        left: BTreeNode::build(kind, layout, left_keys, left_slots, false, timestamp),
        right: BTreeNode::build(kind, layout, right_keys, right_slots, false, timestamp),
    }
}

/// Copies `flat` with the fixed-width items at `range` replaced by `items`.
fn splice(flat: &[u8], width: usize, range: Range<usize>, items: &[&[u8]]) -> Vec<u8> {
    let (start, end) = (range.start * width, range.end * width);
    let mut out = Vec::with_capacity(flat.len() - (end - start) + items.len() * width);
    out.extend_from_slice(&flat[..start]);
    for item in items {
        debug_assert_eq!(item.len(), width);
        out.extend_from_slice(item);
    }
    out.extend_from_slice(&flat[end..]);
    out
}
