//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads are lock-free via [`std::os::unix::fs::FileExt`]:
//! `read_exact_at()` takes `&self` and never touches the file cursor.
//!
//! Appends are serialized via a [`parking_lot::Mutex`] guard (a unit `()`
//! sentinel, not wrapping the `File`). A batch is written with one positional
//! write and only then published by advancing the atomic page count.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use super::{StorageBackend, check_in_range, check_page_sizes};
use crate::error::{PageId, Result};

/// File-based storage backend.
///
/// Durability requires [`sync`](StorageBackend::sync) after an append; page
/// data is not guaranteed on disk until `fsync` completes.
pub struct FileBackend {
    /// The underlying file handle.
    file: File,
    /// Serializes appends.
    write_lock: Mutex<()>,
    /// Number of committed pages. Readers never look past it.
    page_count: AtomicU64,
    /// Page size in bytes.
    page_size: usize,
    /// Path for diagnostics.
    path: PathBuf,
}

impl FileBackend {
    /// Opens a page file, creating it if it does not exist.
    ///
    /// A trailing partial page is ignored and will be overwritten by the next
    /// append.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be opened or
    /// its metadata cannot be read.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let page_count = committed_page_count(&file, page_size, &path)?;

        tracing::debug!(path = %path.display(), page_size, page_count, "Opened page file");

        Ok(Self {
            file,
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
            write_lock: Mutex::new(()),
            page_count: AtomicU64::new(0),
            page_size,
            path,
        })
    }

    /// Returns the path of the page file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    fn read_page(&self, page_id: PageId) -> Result<Arc<[u8]>> {
        check_in_range(page_id, self.page_count())?;

        let mut buf = vec![0u8; self.page_size];
        read_exact_at_offset(&self.file, &mut buf, self.page_offset(page_id))?;
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
        self.page_count.store(first + pages.len() as u64, Ordering::Release);
        Ok(first)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Derives the committed page count from the file length.
pub(super) fn committed_page_count(file: &File, page_size: usize, path: &Path) -> Result<u64> {
    let file_len = file.metadata()?.len();
    let torn = file_len % page_size as u64;
    if torn != 0 {
        tracing::warn!(
            path = %path.display(),
            file_len,
            torn_bytes = torn,
            "Ignoring partial trailing page left by an interrupted append"
        );
    }
    Ok(file_len / page_size as u64)
}

/// Writes `pages` contiguously at `offset` with a single positional write.
///
/// On failure the file is truncated back to `offset` so a later open does not
/// count pages from the failed batch.
pub(super) fn write_batch(
    file: &File,
    pages: &[Arc<[u8]>],
    offset: u64,
    path: &Path,
) -> Result<()> {
    let batch: Vec<u8> = pages.iter().flat_map(|p| p.iter().copied()).collect();
    if let Err(err) = write_all_at_offset(file, &batch, offset) {
        if let Err(truncate_err) = file.set_len(offset) {
            tracing::warn!(
                path = %path.display(),
                offset,
                error = %truncate_err,
                "Failed to truncate page file after a failed append"
            );
        }
        return Err(err);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads exactly `buf.len()` bytes from `file` at the given byte `offset`.
///
/// On Unix, this uses `pread(2)` via [`FileExt::read_exact_at`]. On Windows,
/// this falls back to `seek_read()`, which updates the cursor.
#[cfg(unix)]
pub(super) fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(windows)]
pub(super) fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
pub(super) fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(windows)]
pub(super) fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}
