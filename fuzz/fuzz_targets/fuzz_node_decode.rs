//! Fuzz target for B+ tree node page decoding.
//!
//! `BTreeNode::decode` must reject arbitrary bytes with an error, never a
//! panic. Pages that do decode must re-encode to a page that decodes to the
//! same node.

#![no_main]

use libfuzzer_sys::fuzz_target;

use aof_store::{BTreeNode, Page};

/// Large enough that any child id in a fuzzed page can precede it.
const PAGE_ID: u64 = u64::MAX - 1;

fuzz_target!(|data: &[u8]| {
    let page = Page::committed(PAGE_ID, data.into());
    let Ok(node) = BTreeNode::decode(&page) else {
        return;
    };

    let encoded = node.encode(data.len());
    assert_eq!(encoded.len(), data.len(), "encoded node must fill the page");
    let again = BTreeNode::decode(&Page::committed(PAGE_ID, encoded.into()))
        .expect("re-encoded node must decode");
    assert_eq!(again, node, "node roundtrip mismatch");
});
