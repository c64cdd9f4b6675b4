//! Pages and page caching.
//!
//! A page is an immutable, fixed-size byte buffer identified by its position
//! in the append-only sequence. Structured pages start with a four-byte
//! cookie naming their format; the B+ tree owns `BPTI` and `BPTL`, the other
//! reserved cookies belong to layers built on top of the store.

mod cache;

use std::sync::Arc;

pub use cache::{CacheStats, ClockCache};

use crate::error::PageId;

/// Length of a page cookie in bytes.
pub const COOKIE_LEN: usize = 4;

/// Cookie of a B+ tree internal node page.
pub const COOKIE_BTREE_INTERNAL: [u8; COOKIE_LEN] = *b"BPTI";
/// Cookie of a B+ tree leaf node page.
pub const COOKIE_BTREE_LEAF: [u8; COOKIE_LEN] = *b"BPTL";
/// Cookie of a linked dictionary page.
pub const COOKIE_DICTIONARY: [u8; COOKIE_LEN] = *b"RDCT";
/// Cookie of a linked quad page.
pub const COOKIE_QUADS: [u8; COOKIE_LEN] = *b"RQDS";
/// Cookie of a linked value (blob) page.
pub const COOKIE_VALUES: [u8; COOKIE_LEN] = *b"RVAL";
/// Cookie of the quad-store head page.
pub const COOKIE_QUAD_STORE_HEAD: [u8; COOKIE_LEN] = *b"QDST";

/// A page of data.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    /// Page ID (position in the append-only sequence).
    pub id: PageId,
    /// Raw page bytes, exactly one page long.
    pub data: Arc<[u8]>,
    /// Whether the page is durable. Pages created inside an update context
    /// stay uncommitted until that context commits.
    pub committed: bool,
}

impl Page {
    /// Wraps bytes read back from storage.
    pub fn committed(id: PageId, data: Arc<[u8]>) -> Self {
        Self { id, data, committed: true }
    }

    /// Wraps bytes buffered by an in-flight transaction.
    pub fn pending(id: PageId, data: Arc<[u8]>) -> Self {
        Self { id, data, committed: false }
    }

    /// Returns the page cookie, if the page is long enough to carry one.
    pub fn cookie(&self) -> Option<[u8; COOKIE_LEN]> {
        self.data.get(..COOKIE_LEN)?.try_into().ok()
    }

    /// Returns the page size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length page.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("cookie", &self.cookie().map(|c| String::from_utf8_lossy(&c).into_owned()))
            .field("committed", &self.committed)
            .finish()
    }
}

/// Computes the checksum stored in structured page headers.
///
/// XXH3-64 truncated to its low 32 bits.
pub fn checksum(body: &[u8]) -> u32 {
    xxhash_rust::xxh3::xxh3_64(body) as u32
}
