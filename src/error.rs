//! Error type shared by the fallible map operations.

use thiserror::Error;

/// Errors reported by [`LinkedHandleMap`](crate::LinkedHandleMap).
///
/// Lookups that can express absence with `Option` or a count never
/// produce an error; only the strict accessors and insertions do.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Strict lookup (`at`, `at_mut`) on a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// The key index could not grow. The failing insertion has already
    /// been rolled back; the map is unchanged.
    #[error("resource exhausted: key index could not reserve {additional} more slot(s)")]
    ResourceExhausted {
        /// Number of additional index slots that were requested
        additional: usize,
    },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
