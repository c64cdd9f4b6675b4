//! Ordered, lazy enumeration of tree entries.
//!
//! An [`Entries`] iterator keeps the descent path as a stack of
//! `(node, next index)` frames. Leaves are read one at a time as the
//! iteration reaches them, so dropping the iterator early never loads the
//! rest of the tree.

use std::{iter::FusedIterator, ops::Bound, sync::Arc};

use super::{load_node, node::BTreeNode};
use crate::{
    error::{Error, Result},
    store::PageSource,
};

/// Where an enumeration ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Stop {
    /// Run to the end of the subtree.
    Never,
    /// Stop at the first key without this prefix.
    AfterPrefix(Vec<u8>),
    /// Stop at the first key greater than this one.
    After(Vec<u8>),
    /// Stop at the first key greater than or equal to this one.
    AtOrAfter(Vec<u8>),
}

impl Stop {
    fn reached(&self, key: &[u8]) -> bool {
        match self {
            Stop::Never => false,
            Stop::AfterPrefix(prefix) => !key.starts_with(prefix),
            Stop::After(end) => key > end.as_slice(),
            Stop::AtOrAfter(end) => key >= end.as_slice(),
        }
    }
}

/// Iterator over `(key, value)` pairs in ascending key order.
///
/// Yields `Err` at most once: after a read or decode failure the iterator is
/// exhausted.
pub struct Entries<'s, S: PageSource + ?Sized> {
    source: &'s S,
    stack: Vec<(Arc<BTreeNode>, usize)>,
    stop: Stop,
    done: bool,
}

enum Step {
    Yield(Vec<u8>, Vec<u8>),
    Descend(u64),
    Pop,
}

impl<'s, S: PageSource + ?Sized> Entries<'s, S> {
    /// Positions an iterator at the first entry of `start`'s subtree that
    /// satisfies `lower`.
    pub(crate) fn new(
        source: &'s S,
        start: Arc<BTreeNode>,
        lower: Bound<Vec<u8>>,
        stop: Stop,
    ) -> Result<Self> {
        let mut stack = Vec::new();
        let mut node = start;
        while !node.is_leaf() {
            let index = match &lower {
                Bound::Included(key) | Bound::Excluded(key) => node.floor_index(key),
                Bound::Unbounded => 0,
            };
            let child = node.child(index).ok_or_else(|| Error::CorruptPage {
                page_id: node.page_id(),
                reason: "internal node without children".into(),
            })?;
            let next = load_node(source, child)?;
            stack.push((node, index + 1));
            node = next;
        }

        let first = match &lower {
            Bound::Included(key) => node.partition_point(|k| k < key.as_slice()),
            Bound::Excluded(key) => node.partition_point(|k| k <= key.as_slice()),
            Bound::Unbounded => 0,
        };
        stack.push((node, first));

        Ok(Self { source, stack, stop, done: false })
    }

    fn step(&mut self) -> Option<Step> {
        let (node, index) = self.stack.last_mut()?;
        if *index >= node.len() {
            return Some(Step::Pop);
        }
        let at = *index;
        *index += 1;
        if node.is_leaf() {
            Some(Step::Yield(node.key(at).to_vec(), node.slot(at).to_vec()))
        } else {
            node.child(at).map(Step::Descend)
        }
    }
}

impl<S: PageSource + ?Sized> Iterator for Entries<'_, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.step() {
                Some(Step::Yield(key, value)) => {
                    if self.stop.reached(&key) {
                        break;
                    }
                    return Some(Ok((key, value)));
                },
                Some(Step::Descend(child)) => match load_node(self.source, child) {
                    Ok(node) => self.stack.push((node, 0)),
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    },
                },
                Some(Step::Pop) => {
                    self.stack.pop();
                },
                None => break,
            }
        }
        self.done = true;
        None
    }
}

impl<S: PageSource + ?Sized> FusedIterator for Entries<'_, S> {}

impl<S: PageSource + ?Sized> std::fmt::Debug for Entries<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entries")
            .field("depth", &self.stack.len())
            .field("stop", &self.stop)
            .field("done", &self.done)
            .finish()
    }
}
