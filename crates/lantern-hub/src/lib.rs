//! Lantern hub: the relay process that bridges a local mesh.
//!
//! A hub holds one WebSocket session per registered peer and fans every
//! `mesh_message` frame out to all other sessions. It keeps no long-term
//! state and never parses envelope contents — it is a transparent pipe, so
//! nodes can evolve the envelope schema without hub upgrades. The same
//! listener also serves the HTTP gateway for clients without a mesh relay.
//!
//! # Back-pressure
//!
//! Each session drains a bounded outbound queue into its socket. When a
//! session's queue is full at fan-out time, that session is evicted (closed
//! with a specific code) rather than stalling everyone else. The peer is
//! expected to reconnect.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod gateway;
mod registry;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
    Router,
};
pub use error::HubError;
use lantern_proto::{HubFrame, GATEWAY_SUBMIT_PATH, MAX_FRAME_SIZE, MESH_PATH};
pub use registry::{PeerRegistry, SessionClose, SessionHandle};
use tokio::net::TcpListener;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind, e.g. `0.0.0.0:3000`.
    pub bind_addr: String,
    /// Per-frame size cap in bytes.
    pub max_frame_bytes: usize,
    /// Outbound queue depth per session before eviction kicks in.
    pub session_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            max_frame_bytes: MAX_FRAME_SIZE,
            session_queue: 64,
        }
    }
}

/// Shared hub state: the peer registry plus configuration.
pub struct HubState {
    pub(crate) registry: PeerRegistry,
    pub(crate) config: HubConfig,
}

impl HubState {
    /// Fan a frame out to every registered session except `from`.
    ///
    /// Sessions whose queues are full (or already gone) are evicted, and a
    /// `peer_disconnected` is broadcast for each — which can evict further
    /// stragglers, hence the worklist.
    pub(crate) fn fan_out_from(&self, from: &str, frame: &HubFrame) {
        let mut evicted = self.registry.try_send_all(from, frame);

        while let Some((peer_id, session)) = evicted.pop() {
            tracing::warn!(peer_id = %peer_id, "evicting slow session");
            session.close(SessionClose::SlowConsumer);

            let gone = HubFrame::PeerDisconnected { peer_id: peer_id.clone() };
            evicted.extend(self.registry.try_send_all(&peer_id, &gone));
        }
    }
}

/// A bound hub, ready to run.
pub struct Hub {
    listener: TcpListener,
    state: Arc<HubState>,
}

impl Hub {
    /// Bind the listener and set up shared state.
    pub async fn bind(config: HubConfig) -> Result<Self, HubError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| HubError::Config(format!("bind {}: {e}", config.bind_addr)))?;

        let state = Arc::new(HubState { registry: PeerRegistry::new(), config });

        Ok(Self { listener, state })
    }

    /// Address the hub is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        self.listener.local_addr().map_err(|e| HubError::Transport(e.to_string()))
    }

    /// Serve peer sessions and the gateway until shutdown.
    pub async fn run(self) -> Result<(), HubError> {
        tracing::info!(addr = %self.local_addr()?, "hub listening");

        let router = Router::new()
            .route(MESH_PATH, get(mesh_handler))
            .route("/gateway", get(gateway::page))
            .route(GATEWAY_SUBMIT_PATH, post(gateway::submit))
            .with_state(self.state);

        axum::serve(self.listener, router)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

/// Upgrade a peer connection and hand it to the session loop.
async fn mesh_handler(ws: WebSocketUpgrade, State(state): State<Arc<HubState>>) -> Response {
    ws.on_upgrade(move |socket| session::run(socket, state))
}
