//! Hub error types.

use thiserror::Error;

/// Errors that stop the hub or one of its startup steps.
///
/// Per-session failures never surface here: a misbehaving peer gets its
/// session closed and the hub keeps serving everyone else.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid configuration (unusable bind address, ...). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener or accept-loop failure.
    #[error("transport error: {0}")]
    Transport(String),
}
