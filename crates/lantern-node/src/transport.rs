//! WebSocket transport to the hub.
//!
//! A thin layer that bridges the socket to frame channels; protocol logic
//! stays in the sans-IO relay. Frames travel as JSON text messages. The
//! receive channel closing is the runtime's signal that the link dropped.

use futures_util::{SinkExt, StreamExt};
use lantern_proto::{decode_frame, encode_frame, HubFrame, PeerFrame};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dial or handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The established socket failed mid-stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Handle to a connected hub session.
///
/// Frames are sent and received via the channels; background tasks own the
/// socket. When the hub closes the link, `from_hub` yields `None`.
pub struct ConnectedHub {
    /// Send frames to the hub.
    pub to_hub: mpsc::Sender<PeerFrame>,
    /// Receive frames from the hub.
    pub from_hub: mpsc::Receiver<HubFrame>,
    /// Transport failures. Receiving one means the link is dead.
    pub errors: mpsc::Receiver<TransportError>,
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedHub {
    /// Abort the socket task immediately. Dropping the handle instead lets
    /// the task flush a clean close frame and exit on its own.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Dial the hub's mesh endpoint, e.g. `ws://127.0.0.1:3000/mesh`.
pub async fn connect(url: &str) -> Result<ConnectedHub, TransportError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let (to_hub_tx, to_hub_rx) = mpsc::channel::<PeerFrame>(32);
    let (from_hub_tx, from_hub_rx) = mpsc::channel::<HubFrame>(32);
    let (error_tx, error_rx) = mpsc::channel::<TransportError>(1);

    let handle = tokio::spawn(run_connection(socket, to_hub_rx, from_hub_tx, error_tx));

    Ok(ConnectedHub {
        to_hub: to_hub_tx,
        from_hub: from_hub_rx,
        errors: error_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Bridge between the channels and the socket until either side closes.
async fn run_connection(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut to_hub: mpsc::Receiver<PeerFrame>,
    from_hub: mpsc::Sender<HubFrame>,
    errors: mpsc::Sender<TransportError>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = to_hub.recv() => {
                let Some(frame) = outbound else {
                    // Runtime dropped its sender: clean shutdown.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let text = match encode_frame(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        let _ = errors.send(TransportError::Protocol(e.to_string())).await;
                        continue;
                    },
                };

                if let Err(e) = sink.send(Message::Text(text)).await {
                    let _ = errors.send(TransportError::Stream(e.to_string())).await;
                    break;
                }
            },

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match decode_frame::<HubFrame>(&text) {
                            Ok(frame) => {
                                if from_hub.send(frame).await.is_err() {
                                    break;
                                }
                            },
                            Err(e) => {
                                // Drop the frame, keep the link.
                                tracing::warn!(error = %e, "undecodable hub frame dropped");
                            },
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}, // ping/pong/binary: ignored
                    Some(Err(e)) => {
                        let _ = errors.send(TransportError::Stream(e.to_string())).await;
                        break;
                    },
                }
            },
        }
    }
}
