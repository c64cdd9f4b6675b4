//! Write transactions over the page store.

use std::{
    cell::RefCell,
    collections::HashMap,
    ops::Range,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    backend::StorageBackend,
    error::{Error, PageId, Result},
    page::Page,
    store::{CachedObject, PageSource, PageStore},
};

/// One logical write transaction.
///
/// Pages created here get provisional ids `page_count + n` that are exactly
/// the ids the commit assigns, so structures built during the transaction can
/// reference each other before anything is durable. Reads of those ids are
/// served from the context's buffer; all other reads go to the store.
///
/// Contexts are only handed out by [`PageStore::update`], which holds the
/// writer lock for the context's entire lifetime.
pub struct UpdateContext<'a, B: StorageBackend> {
    store: &'a PageStore<B>,
    /// First id this context allocates.
    base: PageId,
    /// Buffered pages in creation order.
    created: Vec<Arc<[u8]>>,
    /// Decoded objects for buffered pages. Kept apart from the shared cache
    /// until commit.
    objects: RefCell<HashMap<PageId, CachedObject>>,
    /// Timestamp stamped into structured pages created by this context.
    timestamp: u64,
}

impl<'a, B: StorageBackend> UpdateContext<'a, B> {
    pub(crate) fn new(store: &'a PageStore<B>) -> Self {
        let timestamp =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        Self {
            base: store.page_count(),
            store,
            created: Vec::new(),
            objects: RefCell::new(HashMap::new()),
            timestamp,
        }
    }

    /// Returns read access to the committed state of the store.
    ///
    /// Only the read side is exposed: the context already holds the writer
    /// lock, so a nested [`PageStore::update`] would never acquire it.
    pub fn store(&self) -> &'a dyn PageSource {
        self.store
    }

    /// Returns the id the next [`create_page`](Self::create_page) call will return.
    pub fn next_page_id(&self) -> PageId {
        self.base + self.created.len() as PageId
    }

    /// Returns the ids created so far.
    pub fn created_page_ids(&self) -> Range<PageId> {
        self.base..self.next_page_id()
    }

    /// Returns the number of pages created so far.
    pub fn created_len(&self) -> usize {
        self.created.len()
    }

    /// Seconds since the Unix epoch when this context was opened.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Buffers a new page and returns its id.
    ///
    /// Buffers shorter than a page are zero-padded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if `data` is longer than a page.
    pub fn create_page(&mut self, data: impl Into<Vec<u8>>) -> Result<PageId> {
        let page_size = self.store.page_size();
        let mut data = data.into();
        if data.len() > page_size {
            return Err(Error::CapacityExceeded { needed: data.len(), available: page_size });
        }
        data.resize(page_size, 0);

        let page_id = self.next_page_id();
        self.created.push(data.into());
        Ok(page_id)
    }

    fn is_created(&self, page_id: PageId) -> bool {
        self.created_page_ids().contains(&page_id)
    }

    pub(crate) fn into_parts(self) -> (PageId, Vec<Arc<[u8]>>, HashMap<PageId, CachedObject>) {
        (self.base, self.created, self.objects.into_inner())
    }
}

impl<B: StorageBackend> PageSource for UpdateContext<'_, B> {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn page_count(&self) -> u64 {
        self.next_page_id()
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        if self.is_created(page_id) {
            let data = Arc::clone(&self.created[(page_id - self.base) as usize]);
            return Ok(Page::pending(page_id, data));
        }
        if page_id >= self.base {
            return Err(Error::OutOfRange { page_id, page_count: self.next_page_id() });
        }
        self.store.read_page(page_id)
    }

    fn cached_object(&self, page_id: PageId) -> Option<CachedObject> {
        if page_id >= self.base {
            return self.objects.borrow().get(&page_id).cloned();
        }
        self.store.cached_object(page_id)
    }

    fn cache_object(&self, page_id: PageId, object: CachedObject) {
        if self.is_created(page_id) {
            self.objects.borrow_mut().insert(page_id, object);
        } else if page_id < self.base {
            self.store.cache_object(page_id, object);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{backend::InMemoryBackend, config::StoreConfig};

    fn store() -> PageStore<InMemoryBackend> {
        PageStore::in_memory(StoreConfig::builder().page_size(64).build().unwrap()).unwrap()
    }

    #[test]
    fn test_provisional_ids_continue_from_page_count() {
        let store = store();
        store.update(|ctx| ctx.create_page(vec![1u8; 64]).map(|_| true)).unwrap();

        store
            .update(|ctx| {
                assert_eq!(ctx.next_page_id(), 1);
                assert_eq!(ctx.create_page(vec![2u8; 64])?, 1);
                assert_eq!(ctx.create_page(vec![3u8; 64])?, 2);
                assert_eq!(ctx.created_page_ids(), 1..3);
                assert_eq!(ctx.page_count(), 3);
                Ok(true)
            })
            .unwrap();

        assert_eq!(store.read_page(2).unwrap().data[0], 3);
    }

    #[test]
    fn test_reads_see_own_pages_and_committed_pages() {
        let store = store();
        store.update(|ctx| ctx.create_page(vec![7u8; 64]).map(|_| true)).unwrap();

        store
            .update(|ctx| {
                let id = ctx.create_page(vec![8u8; 64])?;
                let own = ctx.read_page(id)?;
                assert!(!own.committed);
                assert_eq!(own.data[0], 8);

                let old = ctx.read_page(0)?;
                assert!(old.committed);
                assert_eq!(old.data[0], 7);

                assert!(matches!(ctx.read_page(id + 1), Err(Error::OutOfRange { .. })));
                // Uncommitted pages are invisible to the store itself.
                assert!(matches!(ctx.store().read_page(id), Err(Error::OutOfRange { .. })));
                Ok(false)
            })
            .unwrap();
    }

    #[test]
    fn test_store_view_reports_committed_page_count() {
        let store = store();
        store.update(|ctx| ctx.create_page(vec![1u8; 64]).map(|_| true)).unwrap();

        store
            .update(|ctx| {
                ctx.create_page(vec![2u8; 64])?;
                ctx.create_page(vec![3u8; 64])?;
                assert_eq!(ctx.store().page_count(), 1);
                assert_eq!(ctx.store().page_size(), 64);
                assert_eq!(ctx.page_count(), 3);
                assert_eq!(ctx.store().read_page(0)?.data[0], 1);
                Ok(false)
            })
            .unwrap();
    }

    #[test]
    fn test_objects_stay_local_until_commit() {
        let store = store();

        store
            .update(|ctx| {
                let id = ctx.create_page(vec![0u8; 64])?;
                ctx.cache_object(id, Arc::new(42u32));
                assert!(ctx.cached_object(id).is_some());
                assert!(ctx.store().cached_object(id).is_none());
                Ok(false)
            })
            .unwrap();
        assert!(store.cached_object(0).is_none(), "aborted objects must not leak");

        store
            .update(|ctx| {
                let id = ctx.create_page(vec![0u8; 64])?;
                ctx.cache_object(id, Arc::new(43u32));
                Ok(true)
            })
            .unwrap();
        let object = store.cached_object(0).unwrap();
        assert_eq!(*object.downcast::<u32>().unwrap(), 43);
    }

    #[test]
    fn test_create_page_rejects_oversize() {
        let store = store();
        store
            .update(|ctx| {
                let err = ctx.create_page(vec![0u8; 100]).unwrap_err();
                assert!(matches!(err, Error::CapacityExceeded { needed: 100, available: 64 }));
                assert_eq!(ctx.created_len(), 0);
                Ok(true)
            })
            .unwrap();
        assert_eq!(store.page_count(), 0);
    }

    #[test]
    fn test_timestamp_is_set() {
        let store = store();
        store
            .update(|ctx| {
                assert!(ctx.timestamp() > 0);
                Ok(false)
            })
            .unwrap();
    }
}
