//! In-memory storage backend for testing.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{StorageBackend, check_in_range, check_page_sizes};
use crate::error::{PageId, Result};

/// In-memory storage backend.
///
/// All data is stored in memory and lost when the backend is dropped.
/// Appends swap the whole batch in under one write lock, so readers never
/// observe half a batch.
pub struct InMemoryBackend {
    /// Committed pages indexed by page ID.
    pages: RwLock<Vec<Arc<[u8]>>>,
    /// Page size in bytes.
    page_size: usize,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend with the given page size.
    pub fn new(page_size: usize) -> Self {
        Self { pages: RwLock::new(Vec::new()), page_size }
    }
}

impl StorageBackend for InMemoryBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.read().len() as u64
    }

    fn read_page(&self, page_id: PageId) -> Result<Arc<[u8]>> {
        let pages = self.pages.read();
        check_in_range(page_id, pages.len() as u64)?;
        Ok(Arc::clone(&pages[page_id as usize]))
    }

    fn append_pages(&self, pages: &[Arc<[u8]>]) -> Result<PageId> {
        check_page_sizes(pages, self.page_size)?;
        let mut stored = self.pages.write();
        let first = stored.len() as PageId;
        stored.extend(pages.iter().cloned());
        Ok(first)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
