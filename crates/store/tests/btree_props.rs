//! End-to-end B+ tree behavior through a `PageStore`.
//!
//! Covers the small-page split scenario, copy-on-write persistence of old
//! snapshots, transaction atomicity, and model-based property tests against
//! a `BTreeMap`.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::collections::BTreeMap;

use aof_store::{
    BTree, BTreeNode, InMemoryBackend, NodeKind, PageSource, PageStore, StoreConfig, encode_u64_key,
};
use aof_test_utils::{TreeOp, strategies};
use proptest::prelude::*;

fn small_store() -> PageStore<InMemoryBackend> {
    PageStore::in_memory(StoreConfig::builder().page_size(96).build().unwrap()).unwrap()
}

fn key(n: u64) -> Vec<u8> {
    encode_u64_key(n).to_vec()
}

fn keys_of<S: PageSource>(tree: &BTree, source: &S) -> Vec<Vec<u8>> {
    tree.iter(source).unwrap().map(|entry| entry.unwrap().0).collect()
}

/// Commits `body` and returns the tree it produced.
fn commit<F>(store: &PageStore<InMemoryBackend>, body: F) -> BTree
where
    F: FnOnce(&mut aof_store::UpdateContext<'_, InMemoryBackend>) -> aof_store::Result<BTree>,
{
    let mut out = None;
    store
        .update(|ctx| {
            out = Some(body(ctx)?);
            Ok(true)
        })
        .unwrap();
    out.unwrap()
}

// =============================================================================
// Scenario
// =============================================================================

#[test]
fn test_nine_keys_split_into_internal_root() {
    let store = small_store();
    let mut tree = commit(&store, |ctx| BTree::init_empty(8, 8, ctx));
    assert_eq!(tree.max_leaf_keys(), 4);
    assert_eq!(tree.max_internal_keys(), 4);

    for n in 1..=9u64 {
        tree = commit(&store, |ctx| tree.insert(&key(n), &key(n * 100), ctx));
        assert!(tree.verify(&store).unwrap(), "verify after inserting {n}");

        if n == 5 {
            let root = tree.root();
            assert_eq!(root.kind(), NodeKind::Internal);
            assert_eq!(root.len(), 2);
            for child in root.children() {
                let node = BTreeNode::decode(&store.read_page(child).unwrap()).unwrap();
                assert!(node.is_leaf());
                assert!(!node.is_root());
            }
            assert_eq!(tree.depth(&store).unwrap(), 2);
        }
    }

    assert_eq!(keys_of(&tree, &store), (1..=9).map(key).collect::<Vec<_>>());
    for n in 1..=9u64 {
        assert_eq!(tree.lookup(&key(n), &store).unwrap(), Some(key(n * 100)));
    }
}

#[test]
fn test_old_snapshot_unchanged_after_insert_and_remove() {
    let store = small_store();
    let t1 = commit(&store, |ctx| {
        let mut t = BTree::init_empty(8, 8, ctx)?;
        for n in 0..30 {
            t = t.insert(&key(n), &key(n), ctx)?;
        }
        Ok(t)
    });

    let t2 = commit(&store, |ctx| t1.insert(&key(100), &key(1), ctx));
    let t3 = commit(&store, |ctx| Ok(t2.remove(&key(5), ctx)?.unwrap()));

    assert_eq!(t1.lookup(&key(100), &store).unwrap(), None);
    assert_eq!(t1.lookup(&key(5), &store).unwrap(), Some(key(5)));
    assert_eq!(t2.lookup(&key(100), &store).unwrap(), Some(key(1)));
    assert_eq!(t3.lookup(&key(5), &store).unwrap(), None);
    assert_eq!(t1.len(&store).unwrap(), 30);
    assert_eq!(t3.len(&store).unwrap(), 30);
    for tree in [&t1, &t2, &t3] {
        assert!(tree.verify(&store).unwrap());
    }
}

#[test]
fn test_aborted_tree_update_leaves_store_unchanged() {
    let store = small_store();
    let tree = commit(&store, |ctx| BTree::init_empty(8, 8, ctx));
    let before = store.page_count();

    let committed = store
        .update(|ctx| {
            let mut t = tree.clone();
            for n in 0..20 {
                t = t.insert(&key(n), &key(n), ctx)?;
            }
            assert!(ctx.created_len() > 20);
            Ok(false)
        })
        .unwrap();

    assert!(!committed);
    assert_eq!(store.page_count(), before);
    assert!(tree.is_empty());
    assert_eq!(store.stats().aborts, 1);
}

#[test]
fn test_failed_body_propagates_error_and_appends_nothing() {
    let store = small_store();
    let before = store.page_count();

    let err = store
        .update(|ctx| {
            let t = BTree::init_empty(8, 8, ctx)?;
            t.insert(&[1, 2, 3], &key(0), ctx)?;
            Ok(true)
        })
        .unwrap_err();

    assert!(matches!(err, aof_store::Error::KeySizeMismatch { expected: 8, found: 3 }));
    assert_eq!(store.page_count(), before);
}

#[test]
fn test_default_page_size_tree_holds_many_keys_per_leaf() {
    let store = PageStore::in_memory(StoreConfig::default()).unwrap();
    let mut tree = None;
    store
        .update(|ctx| {
            let mut t = BTree::init_empty(8, 8, ctx)?;
            for n in 0..2_000 {
                t = t.insert(&key(n), &key(n), ctx)?;
            }
            tree = Some(t);
            Ok(true)
        })
        .unwrap();
    let tree = tree.unwrap();

    assert_eq!(tree.max_leaf_keys(), (8192 - 32) / 16);
    assert_eq!(tree.depth(&store).unwrap(), 2);
    assert_eq!(tree.len(&store).unwrap(), 2_000);
    assert!(tree.verify(&store).unwrap());
}

// =============================================================================
// Properties
// =============================================================================

/// Applies one script step to the tree and the model, both inside `ctx`.
fn apply(
    tree: BTree,
    model: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    op: &TreeOp,
    ctx: &mut aof_store::UpdateContext<'_, InMemoryBackend>,
) -> aof_store::Result<BTree> {
    match op {
        TreeOp::Insert { key, value } => {
            model.insert(key.clone(), value.clone());
            tree.insert(key, value, ctx)
        },
        TreeOp::Remove { key } => {
            let removed = tree.remove(key, ctx)?;
            assert_eq!(removed.is_some(), model.remove(key).is_some());
            Ok(removed.unwrap_or(tree))
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_tree_matches_model(ops in strategies::arb_op_script(200, 1..300)) {
        let store = small_store();
        let mut tree = commit(&store, |ctx| BTree::init_empty(8, 8, ctx));
        let mut model = BTreeMap::new();

        // A handful of ops per commit so later updates read committed pages.
        for chunk in ops.chunks(7) {
            tree = commit(&store, |ctx| {
                let mut t = tree.clone();
                for op in chunk {
                    t = apply(t, &mut model, op, ctx)?;
                }
                Ok(t)
            });
            prop_assert!(tree.verify(&store).unwrap());
        }

        let entries: Vec<_> = tree.iter(&store).unwrap().map(|e| e.unwrap()).collect();
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn prop_prefix_iter_is_filtered_iter(
        keys in proptest::collection::btree_set(strategies::arb_key(3), 0..150),
        prefix in strategies::arb_prefix(3),
    ) {
        let store = PageStore::in_memory(StoreConfig::builder().page_size(128).build().unwrap())
            .unwrap();
        let tree = commit(&store, |ctx| {
            let mut t = BTree::init_empty(3, 2, ctx)?;
            for k in &keys {
                t = t.insert(k, &k[..2], ctx)?;
            }
            Ok(t)
        });

        let expected: Vec<_> = keys.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();
        let found: Vec<_> = tree
            .prefix_iter(&prefix, &store)
            .unwrap()
            .map(|e| e.unwrap().0)
            .collect();
        prop_assert_eq!(found, expected);

        let lca = tree.lca_node_for_prefix(&prefix, &store).unwrap();
        for k in keys.iter().filter(|k| k.starts_with(&prefix)) {
            prop_assert!(lca.min_key().is_some_and(|min| min <= k.as_slice()));
        }
    }

    #[test]
    fn prop_aborted_batches_append_nothing(batches in strategies::arb_page_batches()) {
        let store = small_store();
        let mut expected = 0u64;

        for (pages, keep) in batches {
            let result = store.update(|ctx| {
                for i in 0..pages {
                    ctx.create_page(vec![i as u8; 96])?;
                }
                Ok(keep)
            });
            prop_assert_eq!(result.unwrap(), keep);
            if keep {
                expected += pages as u64;
            }
            prop_assert_eq!(store.page_count(), expected);
        }
    }
}
