//! Peer registry: the hub's only shared state.
//!
//! Maps each registered peer id to its session handle. Guarded by a plain
//! mutex with short critical sections — insert, remove, snapshot, and the
//! non-blocking send pass of a fan-out. Everything slow (socket writes)
//! happens in the per-session writer tasks behind bounded queues.

use std::collections::HashMap;
use std::sync::Mutex;

use lantern_proto::HubFrame;
use tokio::sync::mpsc;

/// Why the hub is closing a session. Carried to the peer as a WebSocket
/// close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClose {
    /// A newer session registered the same peer id (last-write-wins).
    Replaced,
    /// The session violated the frame protocol (double register, ...).
    Protocol,
    /// The session's outbound queue was full at fan-out time.
    SlowConsumer,
    /// A frame exceeded the size cap.
    FrameTooLarge,
}

impl SessionClose {
    /// WebSocket close code for this reason.
    pub fn code(self) -> u16 {
        match self {
            Self::Replaced => 4001,
            Self::Protocol => 4002,
            Self::SlowConsumer => 4008,
            Self::FrameTooLarge => 4009,
        }
    }

    /// Human-readable close reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Replaced => "session replaced",
            Self::Protocol => "protocol violation",
            Self::SlowConsumer => "slow consumer",
            Self::FrameTooLarge => "frame too large",
        }
    }
}

/// Handle to one registered session's writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    frames: mpsc::Sender<HubFrame>,
    control: mpsc::Sender<SessionClose>,
    conn_id: u64,
}

impl SessionHandle {
    /// Build a handle from a session's channels.
    pub fn new(
        frames: mpsc::Sender<HubFrame>,
        control: mpsc::Sender<SessionClose>,
        conn_id: u64,
    ) -> Self {
        Self { frames, control, conn_id }
    }

    /// Queue a frame without blocking. Errors mean the queue is full or the
    /// writer is gone.
    pub fn try_send(&self, frame: HubFrame) -> Result<(), mpsc::error::TrySendError<HubFrame>> {
        self.frames.try_send(frame)
    }

    /// Ask the writer task to close the socket with the given reason.
    pub fn close(&self, reason: SessionClose) {
        let _ = self.control.try_send(reason);
    }
}

/// Registry of `peer id → session`.
#[derive(Default)]
pub struct PeerRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a peer id to a session. Returns the previous session when the id
    /// was already registered — the caller closes it (last-write-wins).
    pub fn register(&self, peer_id: &str, session: SessionHandle) -> Option<SessionHandle> {
        self.lock().insert(peer_id.to_string(), session)
    }

    /// Remove a binding, but only if it still belongs to `conn_id`. Guards a
    /// replaced session's cleanup against removing its successor.
    pub fn unregister(&self, peer_id: &str, conn_id: u64) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        if sessions.get(peer_id).is_some_and(|s| s.conn_id == conn_id) {
            sessions.remove(peer_id)
        } else {
            None
        }
    }

    /// Registered peer ids, excluding one.
    pub fn peers_excluding(&self, exclude: &str) -> Vec<String> {
        self.lock().keys().filter(|id| id.as_str() != exclude).cloned().collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue `frame` for every session except `exclude`. Sessions that
    /// cannot accept it (queue full or writer gone) are removed and
    /// returned for the caller to close and announce.
    pub fn try_send_all(
        &self,
        exclude: &str,
        frame: &HubFrame,
    ) -> Vec<(String, SessionHandle)> {
        let mut sessions = self.lock();
        let stuck: Vec<String> = sessions
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .filter(|(_, session)| session.try_send(frame.clone()).is_err())
            .map(|(id, _)| id.clone())
            .collect();

        stuck
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|session| (id, session)))
            .collect()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().expect("registry mutex poisoned")
    }
}
