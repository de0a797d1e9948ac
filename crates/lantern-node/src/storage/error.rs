//! Storage error type.

use thiserror::Error;

/// Errors from the persistence bridge.
///
/// Any of these is fatal for the envelope being written: the runtime stops
/// processing that envelope and surfaces the error to the originator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database or file I/O failed.
    #[error("storage io: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded.
    #[error("storage serialization: {0}")]
    Serialization(String),

    /// The store contains data this version cannot interpret.
    #[error("storage corrupt: {0}")]
    Corrupt(String),
}
