//! Crypto error types.

use thiserror::Error;

/// Errors from sealing, wrapping, and opening envelopes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("aead seal failed")]
    Seal,

    /// AEAD decryption failed (tag mismatch, wrong key, or corrupt data).
    #[error("aead open failed")]
    Open,

    /// Base64 decoding failed.
    #[error("base64 decode failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// A key or blob had the wrong length for its algorithm.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        got: usize,
    },

    /// A key was structurally invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
