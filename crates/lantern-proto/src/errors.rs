//! Protocol error taxonomy.
//!
//! One variant per rejection cause so callers can branch on what went wrong
//! without string matching.

use thiserror::Error;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while validating, encoding, or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An envelope violated a structural invariant.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Which invariant was violated.
        reason: String,
    },

    /// The hop budget is spent; the envelope cannot be forwarded again.
    #[error("ttl exhausted")]
    TtlExhausted,

    /// The envelope's type and destination disagree (broadcast must target
    /// "all", e2e must target "admin").
    #[error("envelope type {kind:?} cannot target {to:?}")]
    WrongTypeTarget {
        /// Declared message kind.
        kind: String,
        /// Declared destination.
        to: String,
    },

    /// A payload or wrapped key failed base64 or length validation.
    #[error("bad payload encoding: {0}")]
    BadPayloadEncoding(String),

    /// A frame exceeded the size cap.
    #[error("frame too large: {size} bytes exceeds cap of {max}")]
    FrameTooLarge {
        /// Observed frame size.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(String),

    /// An identifier was not 32 lower-case hex characters.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),
}

impl ProtocolError {
    /// Shorthand for a malformed-envelope rejection.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope { reason: reason.into() }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
