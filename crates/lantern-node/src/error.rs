//! Node runtime error type.

use lantern_core::RelayError;
use lantern_crypto::CryptoError;
use lantern_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StoreError;

/// Errors surfaced to callers of the node API.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The hub link is down. The envelope was persisted and delivered
    /// locally before this was raised; retry after the link recovers.
    #[error("not connected to hub")]
    NotConnected,

    /// Persistence failed. Fatal for the envelope in question: it was not
    /// delivered to observers and not forwarded.
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),

    /// Sealing or key handling failed.
    #[error("crypto failed: {0}")]
    Crypto(#[from] CryptoError),

    /// An envelope failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No admin public key available for an e2e send.
    #[error("no admin key known, cannot send e2e")]
    AdminKeyMissing,

    /// The node runtime has shut down.
    #[error("node is closed")]
    Closed,
}

impl From<RelayError> for NodeError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotConnected => Self::NotConnected,
            RelayError::Protocol(e) => Self::Protocol(e),
        }
    }
}
