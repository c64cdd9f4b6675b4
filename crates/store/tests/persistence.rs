//! Durability tests for the file and memory-mapped backends.
//!
//! Each test commits through a `PageStore`, drops it, and reopens the page
//! file to check what survived:
//!
//! ```text
//! update → append_pages (one pwrite) → sync → page_count published
//!          ↑ BeforeAppend               ↑ BeforeSync
//! ```
//!
//! A failed append must leave the reopened store at its previous page count;
//! a torn trailing page is ignored on open.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use aof_store::{
    BTree, Error, FileBackend, MmapBackend, PageId, PageSource, PageStore, PublishedRoot,
    StorageBackend, StoreConfig, encode_u64_key,
};
use aof_test_utils::{CrashInjector, CrashPoint, TestDir};
use tracing_subscriber::layer::SubscriberExt;

const PAGE_SIZE: usize = 96;

fn config() -> StoreConfig {
    StoreConfig::builder().page_size(PAGE_SIZE).build().unwrap()
}

fn key(n: u64) -> Vec<u8> {
    encode_u64_key(n).to_vec()
}

/// Backend wrapper that fails appends or syncs on the injector's signal.
struct FaultyBackend<B> {
    inner: B,
    injector: Arc<CrashInjector>,
}

impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn page_count(&self) -> u64 {
        self.inner.page_count()
    }

    fn read_page(&self, page_id: PageId) -> aof_store::Result<Arc<[u8]>> {
        self.inner.read_page(page_id)
    }

    fn append_pages(&self, pages: &[Arc<[u8]>]) -> aof_store::Result<PageId> {
        if self.injector.on_append() {
            return Err(std::io::Error::other("injected append failure").into());
        }
        self.inner.append_pages(pages)
    }

    fn sync(&self) -> aof_store::Result<()> {
        if self.injector.on_sync() {
            return Err(std::io::Error::other("injected sync failure").into());
        }
        self.inner.sync()
    }
}

/// Test layer that counts `WARN` events.
struct WarnCounter {
    count: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn count_warnings<F, R>(f: F) -> (R, usize)
where
    F: FnOnce() -> R,
{
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter { count: count.clone() });
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, count.load(Ordering::SeqCst))
}

/// Writes keys `0..count` in updates of `batch` keys and returns the last root.
fn write_tree<B: StorageBackend>(store: &PageStore<B>, count: u64, batch: u64) -> PageId {
    let mut tree = None;
    store
        .update(|ctx| {
            tree = Some(BTree::init_empty(8, 8, ctx)?);
            Ok(true)
        })
        .unwrap();
    let mut tree = tree.unwrap();

    for start in (0..count).step_by(batch as usize) {
        store
            .update(|ctx| {
                for n in start..(start + batch).min(count) {
                    tree = tree.insert(&key(n), &key(n * 3), ctx)?;
                }
                Ok(true)
            })
            .unwrap();
    }
    tree.root_page_id()
}

fn check_tree<S: PageSource>(source: &S, root: PageId, count: u64) {
    let tree = BTree::open(root, source).unwrap();
    assert!(tree.verify(source).unwrap());
    assert_eq!(tree.len(source).unwrap(), count as usize);
    for n in (0..count).step_by(7) {
        assert_eq!(tree.lookup(&key(n), source).unwrap(), Some(key(n * 3)));
    }
}

fn raw_pages(path: &Path) -> Vec<Vec<u8>> {
    let bytes = std::fs::read(path).unwrap();
    bytes.chunks_exact(PAGE_SIZE).map(<[u8]>::to_vec).collect()
}

// =============================================================================
// Reopen
// =============================================================================

#[test]
fn test_file_store_reopens_with_identical_pages() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");

    let (root, page_count) = {
        let store = PageStore::create(&path, config()).unwrap();
        let root = write_tree(&store, 120, 10);
        (root, store.page_count())
    };
    assert_eq!(dir.file_len("pages.aof"), page_count * PAGE_SIZE as u64);

    let store = PageStore::open(&path, config()).unwrap();
    assert_eq!(store.page_count(), page_count);
    check_tree(&store, root, 120);

    for (id, raw) in raw_pages(&path).iter().enumerate() {
        assert_eq!(&store.read_page(id as PageId).unwrap().data[..], raw.as_slice());
    }
}

#[test]
fn test_mapped_store_reads_file_store_pages() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");

    let root = {
        let store = PageStore::create(&path, config()).unwrap();
        write_tree(&store, 80, 16)
    };

    let mapped = PageStore::open_mapped(&path, config()).unwrap();
    check_tree(&mapped, root, 80);

    // Appends through the map are visible after a plain reopen.
    let before = mapped.page_count();
    let root = {
        let mut tree = BTree::open(root, &mapped).unwrap();
        mapped
            .update(|ctx| {
                tree = tree.insert(&key(1000), &key(3000), ctx)?;
                Ok(true)
            })
            .unwrap();
        tree.root_page_id()
    };
    assert!(mapped.page_count() > before);
    drop(mapped);

    let store = PageStore::open(&path, config()).unwrap();
    let tree = BTree::open(root, &store).unwrap();
    assert_eq!(tree.lookup(&key(1000), &store).unwrap(), Some(key(3000)));
    assert_eq!(tree.len(&store).unwrap(), 81);
}

#[test]
fn test_open_rejects_mismatched_page_size() {
    let dir = TestDir::new();
    let backend = FileBackend::open(dir.join("pages.aof"), 128).unwrap();
    let err = PageStore::with_backend(backend, config()).err().unwrap();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn test_open_root_rejects_non_root_page() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");
    let root = {
        let store = PageStore::create(&path, config()).unwrap();
        write_tree(&store, 40, 40)
    };

    let store = PageStore::open(&path, config()).unwrap();
    let tree = BTree::open(root, &store).unwrap();
    let child = tree.root().child(0).unwrap();
    assert!(matches!(BTree::open(child, &store), Err(Error::CorruptPage { .. })));
    assert!(matches!(
        BTree::open(store.page_count(), &store),
        Err(Error::OutOfRange { .. })
    ));
}

// =============================================================================
// Torn and failed appends
// =============================================================================

#[test]
fn test_torn_trailing_page_is_ignored() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");
    let (root, page_count) = {
        let store = PageStore::create(&path, config()).unwrap();
        (write_tree(&store, 30, 30), store.page_count())
    };

    // Half a page from an interrupted append.
    dir.append_bytes("pages.aof", &[0xEE; PAGE_SIZE / 2]);

    let (store, warnings) = count_warnings(|| PageStore::open(&path, config()).unwrap());
    assert_eq!(warnings, 1, "a torn tail is reported once");
    assert_eq!(store.page_count(), page_count);
    check_tree(&store, root, 30);

    // The next append overwrites the torn bytes.
    store.update(|ctx| ctx.create_page(vec![7u8; PAGE_SIZE]).map(|_| true)).unwrap();
    assert_eq!(dir.file_len("pages.aof"), (page_count + 1) * PAGE_SIZE as u64);
    assert_eq!(store.read_page(page_count).unwrap().data[0], 7);
}

#[test]
fn test_torn_trailing_page_is_ignored_by_mmap() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");
    let (root, page_count) = {
        let store = PageStore::create(&path, config()).unwrap();
        (write_tree(&store, 30, 30), store.page_count())
    };

    dir.append_bytes("pages.aof", &[0xEE; 10]);

    let store = PageStore::<MmapBackend>::open_mapped(&path, config()).unwrap();
    assert_eq!(store.page_count(), page_count);
    check_tree(&store, root, 30);
}

#[test]
fn test_failed_append_leaves_page_count_unchanged() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");
    let injector = CrashInjector::new(CrashPoint::BeforeAppend);
    let backend = FaultyBackend {
        inner: FileBackend::create(&path, PAGE_SIZE).unwrap(),
        injector: Arc::clone(&injector),
    };
    let store = PageStore::with_backend(backend, config()).unwrap();
    let root = write_tree(&store, 20, 5);
    let before = store.page_count();

    injector.arm();
    let mut tree = BTree::open(root, &store).unwrap();
    let err = store
        .update(|ctx| {
            for n in 100..120 {
                tree = tree.insert(&key(n), &key(n), ctx)?;
            }
            Ok(true)
        })
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert!(injector.has_crashed());
    assert_eq!(store.page_count(), before);
    assert_eq!(store.stats().aborts, 1);

    // Pages built by the failed update were never published.
    assert!(matches!(store.read_page(before), Err(Error::OutOfRange { .. })));
    drop(store);

    let reopened = PageStore::open(&path, config()).unwrap();
    assert_eq!(reopened.page_count(), before);
    check_tree(&reopened, root, 20);
}

#[test]
fn test_failed_sync_reports_error_after_append() {
    let dir = TestDir::new();
    let path = dir.join("pages.aof");
    let injector = CrashInjector::new(CrashPoint::BeforeSync);
    let backend = FaultyBackend {
        inner: FileBackend::create(&path, PAGE_SIZE).unwrap(),
        injector: Arc::clone(&injector),
    };
    let store = PageStore::with_backend(backend, config()).unwrap();
    let before = store.page_count();

    injector.arm();
    let err = store
        .update(|ctx| ctx.create_page(vec![1u8; PAGE_SIZE]).map(|_| true))
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));

    // The append itself went through; only durability is unconfirmed.
    assert_eq!(store.page_count(), before + 1);
    store.update(|ctx| ctx.create_page(vec![2u8; PAGE_SIZE]).map(|_| true)).unwrap();
    assert_eq!(store.page_count(), before + 2);
}

// =============================================================================
// Readers during writes
// =============================================================================

#[test]
fn test_readers_follow_published_roots_on_file_store() {
    let dir = TestDir::new();
    let store = Arc::new(PageStore::create(dir.join("pages.aof"), config()).unwrap());
    let published = Arc::new(PublishedRoot::new());

    let mut tree = None;
    store
        .update(|ctx| {
            tree = Some(BTree::init_empty(8, 8, ctx)?);
            Ok(true)
        })
        .unwrap();
    let mut tree = tree.unwrap();
    published.publish(&tree, store.page_count()).unwrap();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let store = Arc::clone(&store);
            let published = Arc::clone(&published);
            std::thread::spawn(move || {
                let mut last_len = 0;
                for _ in 0..100 {
                    let tree = published.open_tree(&*store).unwrap().unwrap();
                    let len = tree.len(&*store).unwrap();
                    assert!(len >= last_len, "published trees only grow");
                    assert!(tree.verify(&*store).unwrap());
                    last_len = len;
                }
            })
        })
        .collect();

    for n in 0..60 {
        store
            .update(|ctx| {
                tree = tree.insert(&key(n), &key(n), ctx)?;
                Ok(true)
            })
            .unwrap();
        published.publish(&tree, store.page_count()).unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(published.open_tree(&*store).unwrap().unwrap().len(&*store).unwrap(), 60);
}
