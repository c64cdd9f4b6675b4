//! aof-store: an append-only paged storage engine with a copy-on-write B+ tree.
//!
//! Pages are fixed-size and immutable once written. All mutation happens by
//! appending new pages, so any root page id ever committed keeps describing
//! the same tree forever:
//!
//! - **Append-only**: the page file only grows; committed pages never change
//! - **Single writer**: one update context at a time, any number of readers
//! - **Atomic commits**: an update's pages land in one backend append or not at all
//! - **Checksummed nodes**: XXH3-64 over each node body, verified on decode
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               B+ Tree Layer                 │
//! │  (lookup, insert, remove, iter, verify)     │
//! └────────────────┬────────────────────────────┘
//!                  │ PageSource
//! ┌────────────────▼────────────────────────────┐
//! │        PageStore / UpdateContext            │
//! │  (cached reads, buffered pages, commit)     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │               Page Layer                    │
//! │    (page + object clock caches, cookies)    │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Storage Backend                 │
//! │  (FileBackend / MmapBackend / InMemory)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use aof_store::{BTree, PageStore, PublishedRoot, StoreConfig, encode_u64_key};
//!
//! let store = PageStore::in_memory(StoreConfig::default())?;
//! let published = PublishedRoot::new();
//!
//! let mut tree = None;
//! store.update(|ctx| {
//!     let t = BTree::init_empty(8, 8, ctx)?;
//!     tree = Some(t.insert(&encode_u64_key(1), &encode_u64_key(100), ctx)?);
//!     Ok(true)
//! })?;
//!
//! if let Some(tree) = tree {
//!     published.publish(&tree, store.stats().page_count)?;
//!     let value = tree.lookup(&encode_u64_key(1), &store)?;
//!     assert_eq!(value, Some(encode_u64_key(100).to_vec()));
//! }
//! # Ok::<(), aof_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// B+ tree rewrites return nested tuples of paths and entries
#![allow(clippy::type_complexity)]

pub mod backend;
pub mod btree;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod page;
pub mod published;
pub mod store;

// Re-export commonly used types
pub use backend::{FileBackend, InMemoryBackend, MmapBackend, StorageBackend};
pub use btree::{BTree, BTreeNode, Entries, NodeKind, NodeLayout};
pub use config::{ConfigError, DEFAULT_PAGE_SIZE, StoreConfig};
pub use context::UpdateContext;
pub use error::{Error, PageId, Result};
pub use keys::{decode_u64_key, encode_u64_key, has_prefix, truncated_cmp};
pub use page::{CacheStats, Page};
pub use published::{PublishedRoot, RootVersion};
pub use store::{CachedObject, PageSource, PageStore, StoreStats};
