//! Per-peer WebSocket session.
//!
//! Each connection runs one reader loop (this module's `run`) plus one
//! writer task draining the session's bounded outbound queue. The reader
//! enforces the frame size cap and the register-once rule; everything else
//! is transparent fan-out. The hub never parses the `envelope` field.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use lantern_proto::{decode_frame, encode_frame, HubFrame, PeerFrame};
use tokio::sync::mpsc;

use crate::{
    registry::{SessionClose, SessionHandle},
    HubState,
};

/// Monotonic connection counter; disambiguates sessions that reuse a peer id.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Serve one peer connection until it closes or is evicted.
pub(crate) async fn run(socket: WebSocket, state: Arc<HubState>) {
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (sink, stream) = socket.split();

    let (frames_tx, frames_rx) = mpsc::channel::<HubFrame>(state.config.session_queue);
    let (control_tx, control_rx) = mpsc::channel::<SessionClose>(1);

    let mut writer = tokio::spawn(write_loop(sink, frames_rx, control_rx));

    let registered = read_loop(
        stream,
        &state,
        SessionHandle::new(frames_tx, control_tx.clone(), conn_id),
        conn_id,
    )
    .await;

    // Tear down: unbind (unless a newer session already took the id over)
    // and tell the survivors.
    if let Some(peer_id) = registered {
        if state.registry.unregister(&peer_id, conn_id).is_some() {
            tracing::debug!(peer_id = %peer_id, conn_id, "session closed");
            let gone = HubFrame::PeerDisconnected { peer_id: peer_id.clone() };
            state.fan_out_from(&peer_id, &gone);
        }
    }

    // Let the writer flush any pending close frame; a wedged socket gets cut
    // off instead of leaking the task.
    drop(control_tx);
    if tokio::time::timeout(std::time::Duration::from_secs(1), &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Read frames until the socket dies. Returns the peer id if the session
/// ever registered.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &Arc<HubState>,
    handle: SessionHandle,
    conn_id: u64,
) -> Option<String> {
    let mut peer_id: Option<String> = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // ping/pong/binary
        };

        if text.len() > state.config.max_frame_bytes {
            tracing::warn!(
                conn_id,
                size = text.len(),
                cap = state.config.max_frame_bytes,
                "oversized frame, closing session"
            );
            handle.close(SessionClose::FrameTooLarge);
            break;
        }

        let frame = match decode_frame::<PeerFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed frame: drop it, keep the session.
                tracing::warn!(conn_id, error = %e, "dropping malformed frame");
                continue;
            },
        };

        match frame {
            PeerFrame::Register { peer_id: id } => {
                if peer_id.is_some() {
                    tracing::warn!(conn_id, "double register, closing session");
                    handle.close(SessionClose::Protocol);
                    break;
                }

                register(state, &id, handle.clone());
                peer_id = Some(id);
            },

            PeerFrame::MeshMessage { envelope, envelope_type } => {
                let Some(from_peer) = &peer_id else {
                    tracing::warn!(conn_id, "mesh_message before register, dropping");
                    continue;
                };

                let fan = HubFrame::MeshMessage {
                    envelope,
                    from_peer: from_peer.clone(),
                    envelope_type,
                };
                state.fan_out_from(from_peer, &fan);
            },
        }
    }

    peer_id
}

/// Bind the peer id, close any session it replaces, send the peer list back,
/// and announce the arrival.
fn register(state: &Arc<HubState>, peer_id: &str, handle: SessionHandle) {
    if let Some(replaced) = state.registry.register(peer_id, handle.clone()) {
        tracing::info!(peer_id = %peer_id, "replacing existing session");
        replaced.close(SessionClose::Replaced);
    }

    let others = state.registry.peers_excluding(peer_id);
    tracing::info!(peer_id = %peer_id, peers = others.len(), "peer registered");

    // Snapshot to the newcomer; arrival to everyone else. The peer list goes
    // through the session queue like any other frame, so ordering with later
    // fan-out is preserved.
    let _ = handle.try_send(HubFrame::PeerList { peers: others });
    state.fan_out_from(peer_id, &HubFrame::PeerConnected { peer_id: peer_id.to_string() });
}

/// Drain the outbound queue into the socket; a control message closes with
/// its specific code.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<HubFrame>,
    mut control: mpsc::Receiver<SessionClose>,
) {
    loop {
        tokio::select! {
            // Close requests win over queued frames.
            biased;

            close = control.recv() => {
                let Some(reason) = close else { break };
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: reason.code(),
                        reason: reason.reason().into(),
                    })))
                    .await;
                break;
            },

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let text = match encode_frame(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "outbound frame encode failed");
                        continue;
                    },
                };

                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            },
        }
    }
}
