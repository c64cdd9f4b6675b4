//! Memory-mapped storage backend.
//!
//! Uses the same raw page-file layout as [`FileBackend`](super::FileBackend).
//! Reads copy out of a read-only mapping of the committed prefix of the file;
//! appends go through positional writes and then re-establish the mapping
//! before the new page count is published.

#![allow(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use memmap2::{Mmap, MmapOptions};
use parking_lot::{Mutex, RwLock};

use super::{
    StorageBackend, check_in_range, check_page_sizes,
    file::{committed_page_count, read_exact_at_offset, write_batch},
};
use crate::error::{PageId, Result};

/// Memory-mapped storage backend.
pub struct MmapBackend {
    file: File,
    /// Mapping of the first `page_count * page_size` bytes. `None` while empty.
    map: RwLock<Option<Mmap>>,
    /// Serializes appends and remaps.
    write_lock: Mutex<()>,
    page_count: AtomicU64,
    page_size: usize,
    path: PathBuf,
}

impl MmapBackend {
    /// Opens a page file for mapped reads, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        let page_count = committed_page_count(&file, page_size, &path)?;
        let map = map_prefix(&file, page_count * page_size as u64)?;

        tracing::debug!(path = %path.display(), page_size, page_count, "Mapped page file");

        Ok(Self {
            file,
            map: RwLock::new(map),
            write_lock: Mutex::new(()),
            page_count: AtomicU64::new(page_count),
            page_size,
            path,
        })
    }

    /// Creates a new, empty page file, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        file.sync_all()?;

        Ok(Self {
            file,
            map: RwLock::new(None),
            write_lock: Mutex::new(()),
            page_count: AtomicU64::new(0),
            page_size,
            path,
        })
    }
}

/// Maps the first `len` bytes of `file` read-only.
fn map_prefix(file: &File, len: u64) -> Result<Option<Mmap>> {
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: Mmap::map is unsafe because the mapped file could be modified
    // externally. This is sound because:
    // 1. The mapping only covers committed pages, which are never rewritten
    // 2. Appends write strictly past the mapped range
    // 3. Page files are not meant to be modified by external processes
    let map = unsafe { MmapOptions::new().len(len as usize).map(file)? };
    Ok(Some(map))
}

impl StorageBackend for MmapBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    fn read_page(&self, page_id: PageId) -> Result<Arc<[u8]>> {
        check_in_range(page_id, self.page_count())?;

        let start = self.page_offset(page_id) as usize;
        let end = start + self.page_size;
        if let Some(map) = self.map.read().as_ref()
            && end <= map.len()
        {
            return Ok(Arc::from(&map[start..end]));
        }

        // The mapping is replaced before the count is published, so this
        // only runs if a remap failed after a successful write.
        let mut buf = vec![0u8; self.page_size];
        read_exact_at_offset(&self.file, &mut buf, start as u64)?;
        Ok(buf.into())
    }

    fn append_pages(&self, pages: &[Arc<[u8]>]) -> Result<PageId> {
        check_page_sizes(pages, self.page_size)?;

        let _guard = self.write_lock.lock();
        let first = self.page_count.load(Ordering::Acquire);
        if pages.is_empty() {
            return Ok(first);
        }

        write_batch(&self.file, pages, self.page_offset(first), &self.path)?;
        let new_count = first + pages.len() as u64;
        match map_prefix(&self.file, new_count * self.page_size as u64) {
            Ok(map) => *self.map.write() = map,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Remap failed, falling back to pread"
                );
            },
        }
        self.page_count.store(new_count, Ordering::Release);
        Ok(first)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
