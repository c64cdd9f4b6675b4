//! Error types for the append-only page store.

use std::io;

use snafu::Snafu;

use crate::config::ConfigError;

/// Page identifier type.
///
/// Ids are assigned sequentially by appends, starting at zero.
pub type PageId = u64;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A page id at or beyond the current page count was requested.
    #[snafu(display("Page {page_id} out of range (page count {page_count})"))]
    OutOfRange {
        /// The requested page.
        page_id: PageId,
        /// Page count at the time of the request.
        page_count: u64,
    },

    /// A page could not be decoded as the expected structure.
    #[snafu(display("Corrupt page {page_id}: {reason}"))]
    CorruptPage {
        /// The offending page.
        page_id: PageId,
        /// Description of what was wrong.
        reason: String,
    },

    /// Data does not fit into the page-size budget.
    #[snafu(display("Capacity exceeded: needed {needed} bytes, {available} available"))]
    CapacityExceeded {
        /// Bytes or entries required.
        needed: usize,
        /// Bytes or entries available.
        available: usize,
    },

    /// A key argument did not have the tree's fixed key size.
    #[snafu(display("Key size mismatch: expected {expected} bytes, found {found}"))]
    KeySizeMismatch {
        /// The tree's key size.
        expected: usize,
        /// Length of the supplied key.
        found: usize,
    },

    /// A value argument did not have the tree's fixed value size.
    #[snafu(display("Value size mismatch: expected {expected} bytes, found {found}"))]
    ValueSizeMismatch {
        /// The tree's value size.
        expected: usize,
        /// Length of the supplied value.
        found: usize,
    },

    /// Store configuration was rejected.
    #[snafu(display("Configuration error: {source}"))]
    Config {
        /// The validation failure.
        source: ConfigError,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}
