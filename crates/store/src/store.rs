//! The page store: cached reads over a backend and the single-writer update
//! protocol.
//!
//! Reads go through a page cache and a decoded-object cache, both keyed by
//! page id. Writes happen only inside [`PageStore::update`]: the body gets a
//! fresh [`UpdateContext`], buffers new pages in it, and decides whether the
//! batch is committed (one backend append) or discarded.

use std::{
    any::Any,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    backend::{FileBackend, InMemoryBackend, MmapBackend, StorageBackend},
    config::{ConfigError, StoreConfig},
    context::UpdateContext,
    error::{Error, PageId, Result},
    page::{CacheStats, ClockCache, Page},
};

/// A decoded structure cached alongside its page.
pub type CachedObject = Arc<dyn Any + Send + Sync>;

/// Read access to pages, shared by committed stores and in-flight updates.
///
/// The B+ tree reads exclusively through this trait, so the same code serves
/// snapshot readers (a [`PageStore`]) and writers that must see their own
/// uncommitted pages (an [`UpdateContext`]).
pub trait PageSource {
    /// Returns the page size in bytes.
    fn page_size(&self) -> usize;

    /// Returns the number of pages visible through this source.
    fn page_count(&self) -> u64;

    /// Reads a page by ID.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfRange` if `page_id >= page_count()`.
    /// Returns `Error::Io` if the backend read fails.
    fn read_page(&self, page_id: PageId) -> Result<Page>;

    /// Returns the decoded object cached for a page, if any.
    fn cached_object(&self, page_id: PageId) -> Option<CachedObject>;

    /// Remembers the decoded object for a page.
    fn cache_object(&self, page_id: PageId, object: CachedObject);
}

/// Loads a decoded `T` for `page_id`, decoding and caching it on a miss.
pub(crate) fn load_object<S, T, F>(source: &S, page_id: PageId, decode: F) -> Result<Arc<T>>
where
    S: PageSource + ?Sized,
    T: Any + Send + Sync,
    F: FnOnce(&Page) -> Result<T>,
{
    if let Some(object) = source.cached_object(page_id)
        && let Ok(typed) = object.downcast::<T>()
    {
        return Ok(typed);
    }

    let page = source.read_page(page_id)?;
    let typed = Arc::new(decode(&page)?);
    source.cache_object(page_id, Arc::clone(&typed) as CachedObject);
    Ok(typed)
}

/// Store-level statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Page size in bytes.
    pub page_size: usize,
    /// Committed page count.
    pub page_count: u64,
    /// Raw page cache statistics.
    pub page_cache: CacheStats,
    /// Decoded object cache statistics.
    pub object_cache: CacheStats,
    /// Updates that committed (including empty ones).
    pub commits: u64,
    /// Updates that were aborted or failed.
    pub aborts: u64,
}

/// Append-only page store.
///
/// `PageStore` is `Send + Sync` when its backend is; share it with `Arc`.
/// Any number of threads may read while one thread runs an update.
pub struct PageStore<B: StorageBackend> {
    backend: B,
    config: StoreConfig,
    page_cache: ClockCache<Page>,
    object_cache: ClockCache<CachedObject>,
    /// Held for the whole lifetime of an update context.
    writer: Mutex<()>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl PageStore<InMemoryBackend> {
    /// Creates an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = InMemoryBackend::new(config.page_size);
        Self::with_backend(backend, config)
    }
}

impl PageStore<FileBackend> {
    /// Opens (or creates) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = FileBackend::open(path, config.page_size)?;
        Self::with_backend(backend, config)
    }

    /// Creates a new, empty file-backed store, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = FileBackend::create(path, config.page_size)?;
        Self::with_backend(backend, config)
    }
}

impl PageStore<MmapBackend> {
    /// Opens (or creates) a file-backed store that reads through a memory map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    /// Returns [`Error::Io`] if the file cannot be opened or mapped.
    pub fn open_mapped(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = MmapBackend::open(path, config.page_size)?;
        Self::with_backend(backend, config)
    }
}

impl<B: StorageBackend> PageStore<B> {
    /// Wraps an existing backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or its page
    /// size differs from the backend's.
    pub fn with_backend(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if backend.page_size() != config.page_size {
            return Err(ConfigError::Validation {
                message: format!(
                    "page_size {} does not match backend page size {}",
                    config.page_size,
                    backend.page_size()
                ),
            }
            .into());
        }

        Ok(Self {
            page_cache: ClockCache::new(config.page_cache_capacity),
            object_cache: ClockCache::new(config.object_cache_capacity),
            backend,
            config,
            writer: Mutex::new(()),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        })
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Runs one write transaction.
    ///
    /// `body` buffers pages in the context and returns `Ok(true)` to commit or
    /// `Ok(false)` to abort. An error from `body` also aborts and is returned.
    /// An aborted update appends nothing. Commits hold the writer lock, so
    /// concurrent calls run one after another.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or [`Error::Io`] if the append or sync fails.
    pub fn update<F>(&self, body: F) -> Result<bool>
    where
        F: FnOnce(&mut UpdateContext<'_, B>) -> Result<bool>,
    {
        let _writer = self.writer.lock();
        let mut ctx = UpdateContext::new(self);

        match body(&mut ctx) {
            Ok(true) => {
                self.commit(ctx).inspect_err(|_| {
                    self.aborts.fetch_add(1, Ordering::Relaxed);
                })?;
                Ok(true)
            },
            Ok(false) => {
                self.aborts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(discarded_pages = ctx.created_len(), "Update aborted");
                Ok(false)
            },
            Err(err) => {
                self.aborts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(discarded_pages = ctx.created_len(), error = %err, "Update failed");
                Err(err)
            },
        }
    }

    /// Appends the context's pages in creation order with one backend call.
    fn commit(&self, ctx: UpdateContext<'_, B>) -> Result<()> {
        let (base, pages, objects) = ctx.into_parts();
        if pages.is_empty() {
            self.commits.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let first = self.backend.append_pages(&pages)?;
        if first != base {
            return Err(Error::CorruptPage {
                page_id: first,
                reason: format!("append landed at page {first}, expected {base}"),
            });
        }
        if self.config.sync_on_commit {
            self.backend.sync()?;
        }

        for (page_id, object) in objects {
            self.object_cache.insert(page_id, object);
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(first_page = first, pages = pages.len(), "Committed update");
        Ok(())
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            page_size: self.backend.page_size(),
            page_count: self.backend.page_count(),
            page_cache: self.page_cache.stats(),
            object_cache: self.object_cache.stats(),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}

impl<B: StorageBackend> PageSource for PageStore<B> {
    fn page_size(&self) -> usize {
        self.backend.page_size()
    }

    fn page_count(&self) -> u64 {
        self.backend.page_count()
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        let page_count = self.backend.page_count();
        if page_id >= page_count {
            return Err(Error::OutOfRange { page_id, page_count });
        }
        if let Some(page) = self.page_cache.get(page_id) {
            return Ok(page);
        }

        let page = Page::committed(page_id, self.backend.read_page(page_id)?);
        self.page_cache.insert(page_id, page.clone());
        Ok(page)
    }

    fn cached_object(&self, page_id: PageId) -> Option<CachedObject> {
        self.object_cache.get(page_id)
    }

    fn cache_object(&self, page_id: PageId, object: CachedObject) {
        self.object_cache.insert(page_id, object);
    }
}
