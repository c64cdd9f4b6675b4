//! Publication of committed tree roots to readers.
//!
//! A writer commits an update, then publishes the new root here with one
//! atomic pointer swap. Readers load the current [`RootVersion`] without
//! locking and open the tree from it; a version they already hold stays
//! valid because committed pages are never rewritten.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::{
    btree::BTree,
    error::{Error, PageId, Result},
    store::PageSource,
};

/// A published tree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootVersion {
    /// Page id of the root node.
    pub root_page: PageId,
    /// Key size of the tree.
    pub key_size: usize,
    /// Value size of the tree.
    pub val_size: usize,
    /// Committed page count when the root was published.
    pub page_count: u64,
}

/// Lock-free cell holding the most recently published root.
#[derive(Debug, Default)]
pub struct PublishedRoot {
    current: ArcSwapOption<RootVersion>,
}

impl PublishedRoot {
    /// Creates a cell with nothing published.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `tree` as the current root.
    ///
    /// `page_count` is the store's committed page count after the update
    /// that produced `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if the root page is not below
    /// `page_count`, i.e. the tree has not been committed.
    pub fn publish(&self, tree: &BTree, page_count: u64) -> Result<Arc<RootVersion>> {
        let root_page = tree.root_page_id();
        if root_page >= page_count {
            return Err(Error::OutOfRange { page_id: root_page, page_count });
        }

        let version = Arc::new(RootVersion {
            root_page,
            key_size: tree.key_size(),
            val_size: tree.val_size(),
            page_count,
        });
        self.current.store(Some(Arc::clone(&version)));
        debug!(root_page, page_count, "Published tree root");
        Ok(version)
    }

    /// Returns the current version, if any root has been published.
    pub fn load(&self) -> Option<Arc<RootVersion>> {
        self.current.load_full()
    }

    /// Opens the currently published tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `source` has fewer pages than the
    /// version was published with, and [`Error::CorruptPage`] if the root
    /// page does not hold a root node of the published sizes.
    pub fn open_tree<S: PageSource + ?Sized>(&self, source: &S) -> Result<Option<BTree>> {
        let Some(version) = self.load() else {
            return Ok(None);
        };
        if version.page_count > source.page_count() {
            return Err(Error::OutOfRange {
                page_id: version.page_count - 1,
                page_count: source.page_count(),
            });
        }

        let tree = BTree::open(version.root_page, source)?;
        if tree.key_size() != version.key_size || tree.val_size() != version.val_size {
            return Err(Error::CorruptPage {
                page_id: version.root_page,
                reason: format!(
                    "published as {}/{} byte entries, found {}/{}",
                    version.key_size,
                    version.val_size,
                    tree.key_size(),
                    tree.val_size()
                ),
            });
        }
        Ok(Some(tree))
    }
}
