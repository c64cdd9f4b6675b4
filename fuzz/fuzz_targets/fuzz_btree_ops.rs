//! Fuzz target for copy-on-write B+ tree operations.
//!
//! Interprets the input as a script of inserts and removes over a small key
//! space, applies it to a tree on 96-byte pages (four entries per node) and
//! to a `BTreeMap`, and checks that both agree and the tree verifies.

#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;

use aof_store::{BTree, PageStore, StoreConfig, encode_u64_key};

fuzz_target!(|data: &[u8]| {
    let config = StoreConfig::builder().page_size(96).build().expect("config");
    let store = PageStore::in_memory(config).expect("store");
    let mut model = BTreeMap::new();
    let mut tree = None;

    store
        .update(|ctx| {
            let mut t = BTree::init_empty(8, 8, ctx)?;
            // Two bytes per op: [kind | key, value].
            for op in data.chunks_exact(2) {
                let key = encode_u64_key(u64::from(op[0] & 0x7F));
                let value = encode_u64_key(u64::from(op[1]));
                if op[0] & 0x80 == 0 {
                    t = t.insert(&key, &value, ctx)?;
                    model.insert(key.to_vec(), value.to_vec());
                } else {
                    let removed = t.remove(&key, ctx)?;
                    assert_eq!(removed.is_some(), model.remove(key.as_slice()).is_some());
                    if let Some(next) = removed {
                        t = next;
                    }
                }
            }
            tree = Some(t);
            Ok(true)
        })
        .expect("update");

    let tree = tree.expect("tree");
    assert!(tree.verify(&store).expect("verify"), "tree invariants violated");
    let entries: Vec<_> = tree.iter(&store).expect("iter").map(|e| e.expect("entry")).collect();
    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(entries, expected);
});
