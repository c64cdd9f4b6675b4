//! Proptest strategies for fixed-size keys, values and tree operation scripts.
//!
//! Keys are big-endian integers drawn from a small key space so scripts hit
//! the same keys repeatedly and exercise overwrites and removals.
//!
//! # Usage
//!
//! ```no_run
//! use aof_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in strategies::arb_op_script(256, 1..200)) {
//!         // apply `ops` to a tree and to a model
//!     }
//! }
//! ```

use std::ops::Range;

use proptest::prelude::*;

/// One step of a tree operation script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOp {
    /// Insert or overwrite `key` with `value`.
    Insert {
        /// 8-byte big-endian key.
        key: Vec<u8>,
        /// 8-byte value.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Remove {
        /// 8-byte big-endian key.
        key: Vec<u8>,
    },
}

/// Generates an 8-byte big-endian key in `0..key_space`.
pub fn arb_u64_key(key_space: u64) -> impl Strategy<Value = Vec<u8>> {
    (0..key_space.max(1)).prop_map(|n| n.to_be_bytes().to_vec())
}

/// Generates a key of exactly `key_size` random bytes.
pub fn arb_key(key_size: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), key_size)
}

/// Generates a value of exactly `val_size` random bytes.
pub fn arb_value(val_size: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), val_size)
}

/// Generates a prefix of 0 to `key_size` bytes.
pub fn arb_prefix(key_size: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=key_size)
}

/// Generates one [`TreeOp`], inserts twice as likely as removes.
pub fn arb_tree_op(key_space: u64) -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        2 => (arb_u64_key(key_space), arb_value(8))
            .prop_map(|(key, value)| TreeOp::Insert { key, value }),
        1 => arb_u64_key(key_space).prop_map(|key| TreeOp::Remove { key }),
    ]
}

/// Generates a script of tree operations with a length in `len`.
pub fn arb_op_script(key_space: u64, len: Range<usize>) -> impl Strategy<Value = Vec<TreeOp>> {
    proptest::collection::vec(arb_tree_op(key_space), len)
}

/// Generates update batches as `(pages to create, commit?)` pairs.
pub fn arb_page_batches() -> impl Strategy<Value = Vec<(usize, bool)>> {
    proptest::collection::vec((0usize..8, any::<bool>()), 1..16)
}
