//! Core error types.

use lantern_crypto::CryptoError;
use lantern_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the relay state machine.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The hub link is down; the write was not emitted. Local persistence
    /// and delivery have already happened by the time this is returned.
    #[error("not connected to hub")]
    NotConnected,

    /// An envelope failed validation or decoding.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced by the admin join.
#[derive(Debug, Error)]
pub enum JoinError {
    /// This node holds no admin secret; it cannot decrypt. The pending entry
    /// is kept so a later replay on an admin node can still join it.
    #[error("no admin key on this node")]
    NotAnAdmin,

    /// The wrapped key or payload was structurally unusable (bad base64,
    /// wrong lengths). Distinct from a tag mismatch, which stays pending.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
