//! Copy-on-write B+ tree over fixed-size binary keys and values.
//!
//! A [`BTree`] is an immutable snapshot: a root node plus the key/value
//! sizes. `insert` and `remove` never touch existing pages. They rewrite the
//! nodes on the search path into new pages of an [`UpdateContext`] and return
//! a new tree, sharing every subtree off the path with the old one. Both
//! trees stay readable; a reader holding the old root keeps a consistent view.
//!
//! ## Structure
//!
//! - `node.rs`: node page format, decoding, and read operations
//! - `rewrite.rs`: split / merge / redistribute construction functions
//! - `iter.rs`: lazy ordered enumeration (all, prefix, range)
//!
//! ## Invariants
//!
//! - Keys in a node are distinct and strictly ascending.
//! - Internal key `i` is the minimum key of child `i`'s subtree.
//! - Every non-root node holds at least `max / 2` entries.
//! - All leaves are at the same depth.
//! - Exactly the root carries the root flag.

/// Lazy ordered enumeration of tree entries.
pub mod iter;
/// Page-backed B+ tree nodes.
pub mod node;
/// Copy-on-write node rewrites.
mod rewrite;

use std::{
    collections::BTreeSet,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

pub use iter::Entries;
pub use node::{BTreeNode, NodeKind, NodeLayout};
use rewrite::{LeafInsert, Rewrite, combine};

use crate::{
    backend::StorageBackend,
    context::UpdateContext,
    error::{Error, PageId, Result},
    keys::truncated_cmp,
    page::Page,
    store::{CachedObject, PageSource, load_object},
};

/// Loads the node stored at `page_id`, through the source's object cache.
pub(crate) fn load_node<S: PageSource + ?Sized>(
    source: &S,
    page_id: PageId,
) -> Result<Arc<BTreeNode>> {
    load_object(source, page_id, BTreeNode::decode)
}

/// Writes `node` to a new page of `ctx` and registers the decoded node.
fn write_node<B: StorageBackend>(
    mut node: BTreeNode,
    ctx: &mut UpdateContext<'_, B>,
) -> Result<Arc<BTreeNode>> {
    let page_id = ctx.create_page(node.encode(ctx.page_size()))?;
    node.page_id = page_id;
    let node = Arc::new(node);
    ctx.cache_object(page_id, Arc::clone(&node) as CachedObject);
    Ok(node)
}

/// Writes a non-root `node` and returns the (minimum key, page id) entry its
/// parent keeps for it.
fn write_child<B: StorageBackend>(
    node: BTreeNode,
    ctx: &mut UpdateContext<'_, B>,
) -> Result<(Vec<u8>, PageId)> {
    let node = write_node(node, ctx)?;
    let key = node.min_key().ok_or_else(|| Error::CorruptPage {
        page_id: node.page_id(),
        reason: "empty non-root node".into(),
    })?;
    Ok((key.to_vec(), node.page_id()))
}

/// Internal node on the descent path and the child index taken.
type PathStep = (Arc<BTreeNode>, usize);

/// An immutable B+ tree snapshot.
#[derive(Debug, Clone)]
pub struct BTree {
    root: Arc<BTreeNode>,
    layout: NodeLayout,
}

impl BTree {
    /// Creates an empty tree: a single empty root leaf written to `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if a page cannot hold at least four
    /// entries of either node kind, or [`Error::Config`] for a zero key size.
    pub fn init_empty<B: StorageBackend>(
        key_size: usize,
        val_size: usize,
        ctx: &mut UpdateContext<'_, B>,
    ) -> Result<Self> {
        let layout = NodeLayout::new(ctx.page_size(), key_size, val_size)?;
        let root = BTreeNode::build(
            NodeKind::Leaf,
            &layout,
            Vec::new(),
            Vec::new(),
            true,
            ctx.timestamp(),
        );
        let root = write_node(root, ctx)?;
        Ok(Self { root, layout })
    }

    /// Opens the tree whose root node is stored at `page_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] for an unknown page, and
    /// [`Error::CorruptPage`] if the page is not a root node.
    pub fn open<S: PageSource + ?Sized>(page_id: PageId, source: &S) -> Result<Self> {
        let root = load_node(source, page_id)?;
        Self::from_root(root, source.page_size())
    }

    /// Opens a tree from an already-read root page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPage`] if the page is not a root node.
    pub fn from_page<S: PageSource + ?Sized>(page: &Page, source: &S) -> Result<Self> {
        let root = Arc::new(BTreeNode::decode(page)?);
        source.cache_object(page.id, Arc::clone(&root) as CachedObject);
        Self::from_root(root, page.len())
    }

    fn from_root(root: Arc<BTreeNode>, page_size: usize) -> Result<Self> {
        if !root.is_root() {
            return Err(Error::CorruptPage {
                page_id: root.page_id(),
                reason: "page is not a tree root".into(),
            });
        }
        let layout = NodeLayout::new(page_size, root.key_size(), root.val_size())?;
        Ok(Self { root, layout })
    }

    /// Returns the root node.
    pub fn root(&self) -> &Arc<BTreeNode> {
        &self.root
    }

    /// Returns the page id of the root node.
    pub fn root_page_id(&self) -> PageId {
        self.root.page_id()
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        self.layout.key_size
    }

    /// Value size in bytes.
    pub fn val_size(&self) -> usize {
        self.layout.val_size
    }

    /// Returns the node layout of this tree.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Maximum entries per leaf.
    pub fn max_leaf_keys(&self) -> usize {
        self.layout.max_leaf_keys()
    }

    /// Maximum entries per internal node.
    pub fn max_internal_keys(&self) -> usize {
        self.layout.max_internal_keys()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.layout.key_size {
            return Err(Error::KeySizeMismatch { expected: self.layout.key_size, found: key.len() });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.layout.val_size {
            return Err(Error::ValueSizeMismatch {
                expected: self.layout.val_size,
                found: value.len(),
            });
        }
        Ok(())
    }

    fn check_prefix(&self, prefix: &[u8]) -> Result<()> {
        if prefix.len() > self.layout.key_size {
            return Err(Error::KeySizeMismatch {
                expected: self.layout.key_size,
                found: prefix.len(),
            });
        }
        Ok(())
    }

    /// Descends from the root to the leaf responsible for `key`.
    fn descend<S: PageSource + ?Sized>(
        &self,
        key: &[u8],
        source: &S,
    ) -> Result<(Vec<PathStep>, Arc<BTreeNode>)> {
        let mut path = Vec::new();
        let mut node = Arc::clone(&self.root);
        while !node.is_leaf() {
            let index = node.floor_index(key);
            let child = node.child(index).ok_or_else(|| Error::CorruptPage {
                page_id: node.page_id(),
                reason: "internal node without children".into(),
            })?;
            let next = load_node(source, child)?;
            path.push((node, index));
            node = next;
        }
        Ok((path, node))
    }

    /// Looks up the value stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeMismatch`] for a key of the wrong length, or a
    /// read error from the source.
    pub fn lookup<S: PageSource + ?Sized>(
        &self,
        key: &[u8],
        source: &S,
    ) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let (_, leaf) = self.descend(key, source)?;
        Ok(leaf.get(key).map(<[u8]>::to_vec))
    }

    /// Returns a tree that maps `key` to `value`.
    ///
    /// Writes the rewritten path into `ctx`. If `key` already maps to `value`
    /// nothing is written and a clone of this tree is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeMismatch`] / [`Error::ValueSizeMismatch`] for
    /// arguments of the wrong length, or a read error from the context.
    pub fn insert<B: StorageBackend>(
        &self,
        key: &[u8],
        value: &[u8],
        ctx: &mut UpdateContext<'_, B>,
    ) -> Result<Self> {
        self.check_key(key)?;
        self.check_value(value)?;

        let (mut path, leaf) = self.descend(key, &*ctx)?;
        let timestamp = ctx.timestamp();
        let mut rewrite = match leaf.rewrite_leaf_insert(key, value, &self.layout, timestamp) {
            LeafInsert::Unchanged => return Ok(self.clone()),
            LeafInsert::Rewritten(rewrite) => rewrite,
        };

        while let Some((parent, index)) = path.pop() {
            let entries = match rewrite {
                Rewrite::Single(node) => vec![write_child(node, ctx)?],
                Rewrite::Split { left, right } => {
                    vec![write_child(left, ctx)?, write_child(right, ctx)?]
                },
            };
            rewrite = parent.rewrite_internal(index..index + 1, &entries, &self.layout, timestamp);
        }

        let root = match rewrite {
            Rewrite::Single(root) => write_node(root, ctx)?,
            Rewrite::Split { left, right } => {
                let entries = [write_child(left, ctx)?, write_child(right, ctx)?];
                tracing::trace!(left = entries[0].1, right = entries[1].1, "Splitting root");
                write_node(self.new_internal_root(&entries, timestamp), ctx)?
            },
        };
        Ok(Self { root, layout: self.layout })
    }

    fn new_internal_root(&self, entries: &[(Vec<u8>, PageId)], timestamp: u64) -> BTreeNode {
        let mut keys = Vec::with_capacity(entries.len() * self.layout.key_size);
        let mut children = Vec::with_capacity(entries.len() * node::CHILD_ID_SIZE);
        for (key, child) in entries {
            keys.extend_from_slice(key);
            children.extend_from_slice(&child.to_be_bytes());
        }
        BTreeNode::build(NodeKind::Internal, &self.layout, keys, children, true, timestamp)
    }

    /// Returns a tree without `key`, or `None` if `key` is not present.
    ///
    /// Underfull nodes are merged with, or borrow from, their fullest sibling.
    /// An internal root left with a single child is replaced by that child.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeMismatch`] for a key of the wrong length, or a
    /// read error from the context.
    pub fn remove<B: StorageBackend>(
        &self,
        key: &[u8],
        ctx: &mut UpdateContext<'_, B>,
    ) -> Result<Option<Self>> {
        self.check_key(key)?;

        let (mut path, leaf) = self.descend(key, &*ctx)?;
        let timestamp = ctx.timestamp();
        let Some(mut current) = leaf.rewrite_leaf_remove(key, &self.layout, timestamp) else {
            return Ok(None);
        };

        while let Some((parent, index)) = path.pop() {
            current = self.rebalance_child(current, &parent, index, ctx)?;
        }

        let root = if !current.is_leaf() && current.len() == 1 {
            let only = current.child(0).ok_or_else(|| Error::CorruptPage {
                page_id: self.root.page_id(),
                reason: "internal root without children".into(),
            })?;
            tracing::trace!(child = only, "Collapsing root");
            let child = load_node(&*ctx, only)?;
            write_node(child.with_root_flag(true, &self.layout, timestamp), ctx)?
        } else {
            write_node(current, ctx)?
        };
        Ok(Some(Self { root, layout: self.layout }))
    }

    /// Writes the rewritten child at `index` of `parent`, first rebalancing it
    /// with a sibling if it is underfull. Returns the unwritten new parent.
    fn rebalance_child<B: StorageBackend>(
        &self,
        child: BTreeNode,
        parent: &BTreeNode,
        index: usize,
        ctx: &mut UpdateContext<'_, B>,
    ) -> Result<BTreeNode> {
        let timestamp = ctx.timestamp();
        let replace_single = |entry: (Vec<u8>, PageId), range| {
            parent.rewrite_internal(range, &[entry], &self.layout, timestamp)
        };

        let sibling = if child.len() >= self.layout.min_keys(child.kind()) {
            None
        } else {
            self.fullest_sibling(parent, index, &*ctx)?
        };

        let rewrite = match sibling {
            None => replace_single(write_child(child, ctx)?, index..index + 1),
            Some((sibling_index, sibling)) => {
                let (left, right, first) = if sibling_index < index {
                    (sibling.as_ref(), &child, sibling_index)
                } else {
                    (&child, sibling.as_ref(), index)
                };
                match combine(left, right, &self.layout, timestamp) {
                    Rewrite::Single(merged) => {
                        tracing::trace!(?first, "Merging siblings");
                        replace_single(write_child(merged, ctx)?, first..first + 2)
                    },
                    Rewrite::Split { left, right } => {
                        tracing::trace!(?first, "Redistributing siblings");
                        let entries = [write_child(left, ctx)?, write_child(right, ctx)?];
                        parent.rewrite_internal(first..first + 2, &entries, &self.layout, timestamp)
                    },
                }
            },
        };

        match rewrite {
            Rewrite::Single(node) => Ok(node),
            // Removal never grows a parent, so only a corrupt tree gets here.
            Rewrite::Split { .. } => Err(Error::CorruptPage {
                page_id: parent.page_id(),
                reason: "internal node overflowed during removal".into(),
            }),
        }
    }

    /// Returns the sibling of child `index` with the most entries.
    fn fullest_sibling<S: PageSource + ?Sized>(
        &self,
        parent: &BTreeNode,
        index: usize,
        source: &S,
    ) -> Result<Option<(usize, Arc<BTreeNode>)>> {
        let mut best: Option<(usize, Arc<BTreeNode>)> = None;
        let candidates = [index.checked_sub(1), Some(index + 1).filter(|&i| i < parent.len())];
        for sibling_index in candidates.into_iter().flatten() {
            let Some(page_id) = parent.child(sibling_index) else { continue };
            let sibling = load_node(source, page_id)?;
            if best.as_ref().is_none_or(|(_, b)| sibling.len() > b.len()) {
                best = Some((sibling_index, sibling));
            }
        }
        Ok(best)
    }

    /// Returns the shallowest node whose subtree contains every key starting
    /// with `prefix`.
    ///
    /// Descends while a single child covers the whole prefix range and stops
    /// at the first node where the range spans several children (or at a
    /// leaf).
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeMismatch`] if `prefix` is longer than a key, or
    /// a read error from the source.
    pub fn lca_node_for_prefix<S: PageSource + ?Sized>(
        &self,
        prefix: &[u8],
        source: &S,
    ) -> Result<Arc<BTreeNode>> {
        self.check_prefix(prefix)?;
        let n = prefix.len();
        let mut node = Arc::clone(&self.root);
        while !node.is_leaf() {
            // Children are ordered by their minimum key; the prefix range
            // starts in the child before the first separator >= prefix and
            // ends before the first separator > prefix.
            let first_ge = node.partition_point(|k| truncated_cmp(k, prefix, n).is_lt());
            let first_gt = node.partition_point(|k| truncated_cmp(k, prefix, n).is_le());
            if first_gt == 0 {
                break;
            }
            // A separator equal to the smallest possible key with the prefix
            // means nothing before its child can match.
            let starts_at_separator = first_ge < first_gt
                && node.key(first_ge)[n..].iter().all(|&b| b == 0);
            let first = if starts_at_separator { first_ge } else { first_ge.saturating_sub(1) };
            if first != first_gt - 1 {
                break;
            }
            let Some(child) = node.child(first_gt - 1) else { break };
            node = load_node(source, child)?;
        }
        Ok(node)
    }

    /// Iterates every entry in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns a read error if the first leaf cannot be loaded.
    pub fn iter<'s, S: PageSource + ?Sized>(&self, source: &'s S) -> Result<Entries<'s, S>> {
        Entries::new(source, Arc::clone(&self.root), Bound::Unbounded, iter::Stop::Never)
    }

    /// Iterates entries whose key starts with `prefix`, in ascending order.
    ///
    /// Enumeration starts at the prefix's LCA node and ends at the first key
    /// without the prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeMismatch`] if `prefix` is longer than a key, or
    /// a read error.
    pub fn prefix_iter<'s, S: PageSource + ?Sized>(
        &self,
        prefix: &[u8],
        source: &'s S,
    ) -> Result<Entries<'s, S>> {
        let start = self.lca_node_for_prefix(prefix, source)?;
        let mut seek = prefix.to_vec();
        seek.resize(self.layout.key_size, 0);
        Entries::new(source, start, Bound::Included(seek), iter::Stop::AfterPrefix(prefix.to_vec()))
    }

    /// Iterates entries whose key lies within `range`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a read error if the first leaf cannot be loaded.
    pub fn range<'s, S, R>(&self, range: R, source: &'s S) -> Result<Entries<'s, S>>
    where
        S: PageSource + ?Sized,
        R: RangeBounds<Vec<u8>>,
    {
        let stop = match range.end_bound() {
            Bound::Included(end) => iter::Stop::After(end.clone()),
            Bound::Excluded(end) => iter::Stop::AtOrAfter(end.clone()),
            Bound::Unbounded => iter::Stop::Never,
        };
        Entries::new(source, Arc::clone(&self.root), range.start_bound().cloned(), stop)
    }

    /// Number of levels from the root to the leaves (1 for a leaf root).
    ///
    /// # Errors
    ///
    /// Returns a read error from the source.
    pub fn depth<S: PageSource + ?Sized>(&self, source: &S) -> Result<usize> {
        let mut depth = 1;
        let mut node = Arc::clone(&self.root);
        while let Some(child) = node.child(0) {
            node = load_node(source, child)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Number of entries, by traversal.
    ///
    /// # Errors
    ///
    /// Returns a read error from the source.
    pub fn len<S: PageSource + ?Sized>(&self, source: &S) -> Result<usize> {
        let mut total = 0;
        self.walk(source, |node| {
            if node.is_leaf() {
                total += node.len();
            }
        })?;
        Ok(total)
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Every page reachable from the root, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a read error from the source.
    pub fn reachable_page_ids<S: PageSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<BTreeSet<PageId>> {
        let mut ids = BTreeSet::new();
        self.walk(source, |node| {
            ids.insert(node.page_id());
        })?;
        Ok(ids)
    }

    fn walk<S: PageSource + ?Sized>(
        &self,
        source: &S,
        mut visit: impl FnMut(&BTreeNode),
    ) -> Result<()> {
        let mut stack = vec![Arc::clone(&self.root)];
        while let Some(node) = stack.pop() {
            visit(&node);
            for child in node.children() {
                stack.push(load_node(source, child)?);
            }
        }
        Ok(())
    }

    /// Checks every structural invariant of the tree.
    ///
    /// Returns `Ok(false)` on the first violation. Violations are logged at
    /// debug level with the offending page.
    ///
    /// # Errors
    ///
    /// Returns a read or decode error from the source.
    pub fn verify<S: PageSource + ?Sized>(&self, source: &S) -> Result<bool> {
        let Some(summary) = self.verify_node(&self.root, None, None, true, source)? else {
            return Ok(false);
        };
        let mut iterated = 0;
        for entry in self.iter(source)? {
            entry?;
            iterated += 1;
        }
        if iterated != summary.entries {
            tracing::debug!(iterated, counted = summary.entries, "Entry count mismatch");
            return Ok(false);
        }
        Ok(true)
    }

    fn verify_node<S: PageSource + ?Sized>(
        &self,
        node: &BTreeNode,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        source: &S,
    ) -> Result<Option<Subtree>> {
        let page_id = node.page_id();
        let fail = |reason: &str| {
            tracing::debug!(page_id, reason, "B+ tree invariant violated");
            Ok(None)
        };

        if node.is_root() != is_root {
            return fail("root flag does not match position");
        }
        if node.key_size() != self.layout.key_size || node.val_size() != self.layout.val_size {
            return fail("key or value size differs from the tree");
        }
        let max = self.layout.max_keys(node.kind());
        if node.len() > max {
            return fail("node over capacity");
        }
        if !is_root && node.len() < self.layout.min_keys(node.kind()) {
            return fail("non-root node under minimum occupancy");
        }
        if is_root && !node.is_leaf() && node.len() < 2 {
            return fail("internal root with fewer than two children");
        }
        if !node.keys_strictly_ascending() {
            return fail("keys not strictly ascending");
        }
        if let (Some(lower), Some(min)) = (lower, node.min_key())
            && min < lower
        {
            return fail("key below the subtree's lower bound");
        }
        if let (Some(upper), Some(max_key)) = (upper, node.max_key())
            && max_key >= upper
        {
            return fail("key at or above the subtree's upper bound");
        }

        if node.is_leaf() {
            return Ok(Some(Subtree { entries: node.len(), leaf_depth: 1 }));
        }

        let mut entries = 0;
        let mut leaf_depth = None;
        for index in 0..node.len() {
            let Some(child_id) = node.child(index) else { return fail("missing child") };
            if child_id >= page_id {
                return fail("child does not precede its parent");
            }
            let child = load_node(source, child_id)?;
            if child.min_key() != Some(node.key(index)) {
                return fail("separator is not the child's minimum key");
            }
            let child_upper =
                if index + 1 < node.len() { Some(node.key(index + 1)) } else { upper };
            let Some(sub) =
                self.verify_node(&child, Some(node.key(index)), child_upper, false, source)?
            else {
                return Ok(None);
            };
            if leaf_depth.is_some_and(|depth| depth != sub.leaf_depth) {
                return fail("leaves at different depths");
            }
            leaf_depth = Some(sub.leaf_depth);
            entries += sub.entries;
        }
        Ok(Some(Subtree { entries, leaf_depth: leaf_depth.unwrap_or(0) + 1 }))
    }
}

/// Totals gathered while verifying a subtree.
struct Subtree {
    entries: usize,
    leaf_depth: usize,
}
