//! Fixed-length key helpers.
//!
//! Keys compare byte-lexicographically. Integers are encoded big-endian so
//! that byte order matches numeric order.

use std::cmp::Ordering;

/// Compares only the first `n` bytes of `a` and `b`.
///
/// Used for prefix matching: with `n = prefix.len()`, a key compares
/// `Equal` to the prefix exactly when it starts with it.
pub fn truncated_cmp(a: &[u8], b: &[u8], n: usize) -> Ordering {
    a[..n.min(a.len())].cmp(&b[..n.min(b.len())])
}

/// Returns true if `key` starts with `prefix`.
pub fn has_prefix(key: &[u8], prefix: &[u8]) -> bool {
    key.starts_with(prefix)
}

/// Encodes `value` as an 8-byte big-endian key.
pub fn encode_u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decodes the first 8 bytes of `key` as a big-endian integer.
pub fn decode_u64_key(key: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(key.get(..8)?.try_into().ok()?))
}

/// Reads a big-endian `u32` at `offset`. Callers guarantee the bounds.
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

/// Reads a big-endian `u64` at `offset`. Callers guarantee the bounds.
pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}
