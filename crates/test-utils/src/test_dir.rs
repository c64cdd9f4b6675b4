//! Temporary directories holding page files for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] and adds the raw file helpers the
//! persistence tests need: checking a page file's length and appending stray
//! bytes to simulate an interrupted append.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// A temporary directory for page files, removed on drop.
///
/// # Example
///
/// ```
/// use aof_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let pages = dir.join("pages.aof");
/// std::fs::write(&pages, [0u8; 128]).unwrap();
///
/// // Half a page left behind by an interrupted append.
/// dir.append_bytes("pages.aof", &[0xEE; 64]);
/// assert_eq!(dir.file_len("pages.aof"), 192);
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Returns `path` resolved inside the directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Returns the length of a file in the directory, or 0 if it is missing.
    #[must_use]
    pub fn file_len<P: AsRef<Path>>(&self, path: P) -> u64 {
        std::fs::metadata(self.join(path)).map(|m| m.len()).unwrap_or(0)
    }

    /// Appends raw `bytes` to a file in the directory, creating it if needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be opened or written.
    pub fn append_bytes<P: AsRef<Path>>(&self, path: P, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.join(path))
            .expect("failed to open file for append");
        file.write_all(bytes).expect("failed to append bytes");
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
