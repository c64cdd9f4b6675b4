//! Storage backend abstraction for the page store.
//!
//! A backend is an append-only sequence of fixed-size pages. Page `i` always
//! holds the bytes written by the append that created it; nothing is ever
//! overwritten. The only mutation is [`StorageBackend::append_pages`], which
//! either makes every buffer of the batch visible or none of them.
//!
//! Three implementations ship with the store:
//! - [`FileBackend`]: positional I/O on a raw page file
//! - [`MmapBackend`]: same file layout, reads served from a memory map
//! - [`InMemoryBackend`]: a vector of pages, for tests and scratch stores
//!
//! # File layout
//!
//! Page files carry no header: page `i` lives at byte offset `i * page_size`
//! and the page count is `file_len / page_size`. A trailing partial page can
//! only come from an append that was interrupted, so on open it is ignored
//! and the next append overwrites it.

mod file;
mod memory;
mod mmap;

use std::sync::Arc;

pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use mmap::MmapBackend;

use crate::error::{Error, PageId, Result};

/// Storage backend trait for abstracting page I/O.
pub trait StorageBackend: Send + Sync {
    /// Returns the page size for this backend.
    fn page_size(&self) -> usize;

    /// Returns the number of committed pages.
    fn page_count(&self) -> u64;

    /// Reads a committed page by its ID.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfRange` if `page_id >= page_count()`.
    /// Returns `Error::Io` if the read fails.
    fn read_page(&self, page_id: PageId) -> Result<Arc<[u8]>>;

    /// Appends `pages` as consecutive new pages and returns the id of the first.
    ///
    /// `page_count()` advances only after every buffer has been written.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` if a buffer is not exactly one page.
    /// Returns `Error::Io` if the write fails; the page count is then unchanged.
    fn append_pages(&self, pages: &[Arc<[u8]>]) -> Result<PageId>;

    /// Flushes all appended pages to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Calculates the byte offset for a page ID.
    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id * self.page_size() as u64
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn page_count(&self) -> u64 {
        (**self).page_count()
    }

    fn read_page(&self, page_id: PageId) -> Result<Arc<[u8]>> {
        (**self).read_page(page_id)
    }

    fn append_pages(&self, pages: &[Arc<[u8]>]) -> Result<PageId> {
        (**self).append_pages(pages)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

/// Rejects any buffer in `pages` that is not exactly `page_size` bytes.
fn check_page_sizes(pages: &[Arc<[u8]>], page_size: usize) -> Result<()> {
    match pages.iter().find(|p| p.len() != page_size) {
        Some(bad) => Err(Error::CapacityExceeded { needed: bad.len(), available: page_size }),
        None => Ok(()),
    }
}

/// Returns `OutOfRange` unless `page_id < page_count`.
fn check_in_range(page_id: PageId, page_count: u64) -> Result<()> {
    if page_id >= page_count {
        return Err(Error::OutOfRange { page_id, page_count });
    }
    Ok(())
}
