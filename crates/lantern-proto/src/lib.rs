//! Wire protocol for the lantern mesh.
//!
//! Two layers live here:
//!
//! - The **envelope model**: [`MessageEnvelope`] (broadcast plaintext or
//!   end-to-end ciphertext) and [`KeyEnvelope`] (a session key wrapped to the
//!   administrator), plus validation of every structural invariant.
//! - The **frame layer**: the JSON objects exchanged between a peer and its
//!   hub ([`PeerFrame`], [`HubFrame`]). Frames carry envelopes as opaque JSON
//!   values so the hub can fan them out without understanding them — a newer
//!   node can extend the envelope without upgrading the hub.
//!
//! Frames travel as WebSocket text messages, one JSON object per message,
//! capped at [`MAX_FRAME_SIZE`] bytes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod errors;
mod frame;
mod id;

pub use envelope::{
    DecryptedMessage, Destination, HopRecord, KeyEnvelope, MessageEnvelope, MessageKind, Meta,
};
pub use errors::{ProtocolError, Result};
pub use frame::{decode_frame, encode_frame, EnvelopeKind, HubFrame, MeshPayload, PeerFrame};
pub use id::{pseudo_of, MsgId, NodeId};

/// Default hop budget for newly originated envelopes.
pub const DEFAULT_TTL: u8 = 8;

/// Maximum size of a single frame on the hub channel (10 MiB).
///
/// The hub closes peer sessions that exceed this and rejects oversized
/// gateway submissions.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum length of a single metadata value, in bytes.
pub const META_VALUE_MAX: usize = 256;

/// WebSocket path peers connect to on the hub.
pub const MESH_PATH: &str = "/mesh";

/// HTTP path for gateway submissions.
pub const GATEWAY_SUBMIT_PATH: &str = "/gateway/submit";
