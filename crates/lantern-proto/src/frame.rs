//! Hub channel frames.
//!
//! Every frame is one JSON object with a `type` tag, carried as a WebSocket
//! text message. The `envelope` field is an opaque [`serde_json::Value`] at
//! this layer: the hub fans frames out without parsing envelope contents, so
//! envelope schema changes never require a hub upgrade. Nodes convert the
//! value to a typed [`MeshPayload`] on receipt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    envelope::{KeyEnvelope, MessageEnvelope},
    errors::{ProtocolError, Result},
    MAX_FRAME_SIZE,
};

/// Discriminates key envelopes from message envelopes on the wire.
///
/// A key envelope has no `type` field of its own, so frames carry an
/// `envelopeType` marker instead. Absence means message; the marker is
/// omitted for messages when serializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// A [`MessageEnvelope`] (the default when `envelopeType` is absent).
    #[default]
    Message,
    /// A [`KeyEnvelope`].
    Key,
}

impl EnvelopeKind {
    /// True for the default message kind; used to omit the wire marker.
    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message)
    }
}

/// Frames a peer sends to its hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PeerFrame {
    /// Bind this session to a peer id. First frame on every session.
    Register {
        /// The peer's node id in hex.
        peer_id: String,
    },
    /// Publish an envelope for fan-out to every other peer.
    MeshMessage {
        /// Opaque envelope JSON.
        envelope: Value,
        /// Set to `key` for key envelopes; omitted for messages.
        #[serde(default, skip_serializing_if = "EnvelopeKind::is_message")]
        envelope_type: EnvelopeKind,
    },
}

/// Frames a hub sends to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HubFrame {
    /// Snapshot of the other registered peers, sent right after `register`.
    PeerList {
        /// Peer ids, excluding the recipient.
        peers: Vec<String>,
    },
    /// Another peer registered.
    PeerConnected {
        /// The new peer's id.
        peer_id: String,
    },
    /// A peer's session closed.
    PeerDisconnected {
        /// The departed peer's id.
        peer_id: String,
    },
    /// An envelope fanned out from another peer.
    MeshMessage {
        /// Opaque envelope JSON.
        envelope: Value,
        /// Which peer's session the frame arrived on.
        from_peer: String,
        /// Set to `key` for key envelopes; omitted for messages.
        #[serde(default, skip_serializing_if = "EnvelopeKind::is_message")]
        envelope_type: EnvelopeKind,
    },
}

/// A typed envelope recovered from a frame's opaque `envelope` value.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshPayload {
    /// Broadcast or e2e message envelope.
    Message(MessageEnvelope),
    /// Wrapped session key envelope.
    Key(KeyEnvelope),
}

impl MeshPayload {
    /// Parse an opaque envelope value according to its wire marker.
    pub fn from_value(envelope: Value, kind: EnvelopeKind) -> Result<Self> {
        match kind {
            EnvelopeKind::Message => Ok(Self::Message(serde_json::from_value(envelope)?)),
            EnvelopeKind::Key => Ok(Self::Key(serde_json::from_value(envelope)?)),
        }
    }

    /// The marker this payload carries on the wire.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Message(_) => EnvelopeKind::Message,
            Self::Key(_) => EnvelopeKind::Key,
        }
    }

    /// Convert into the opaque value + marker pair used in frames.
    pub fn into_parts(self) -> Result<(Value, EnvelopeKind)> {
        let kind = self.kind();
        let value = match self {
            Self::Message(env) => serde_json::to_value(env)?,
            Self::Key(key) => serde_json::to_value(key)?,
        };
        Ok((value, kind))
    }

    /// Wrap this payload in a peer → hub frame.
    pub fn into_peer_frame(self) -> Result<PeerFrame> {
        let (envelope, envelope_type) = self.into_parts()?;
        Ok(PeerFrame::MeshMessage { envelope, envelope_type })
    }
}

/// Encode a frame for the wire, enforcing the size cap.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
    }
    Ok(text)
}

/// Decode a frame from the wire, enforcing the size cap before parsing.
pub fn decode_frame<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Meta, MsgId};
    use chrono::Utc;

    fn sample_message() -> MessageEnvelope {
        MessageEnvelope::broadcast(
            MsgId::from_bits(9),
            "0123456789abcdef0123456789abcdef",
            "user_01234567",
            "hello mesh",
            Meta::default(),
            Utc::now(),
        )
    }

    #[test]
    fn register_frame_wire_shape() {
        let frame = PeerFrame::Register { peer_id: "00ab".into() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["peerId"], "00ab");
    }

    #[test]
    fn message_frame_omits_envelope_type() {
        let payload = MeshPayload::Message(sample_message());
        let frame = payload.into_peer_frame().unwrap();
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "mesh_message");
        assert!(json.get("envelopeType").is_none());
        assert_eq!(json["envelope"]["payload"], "hello mesh");
    }

    #[test]
    fn key_frame_carries_envelope_type() {
        let key = KeyEnvelope::new(MsgId::from_bits(9), "user_01234567", "AAAA");
        let frame = MeshPayload::Key(key).into_peer_frame().unwrap();
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["envelopeType"], "key");
        assert_eq!(json["envelope"]["wrappedKey"], "AAAA");
    }

    #[test]
    fn missing_envelope_type_means_message() {
        let text = format!(
            r#"{{"type":"mesh_message","envelope":{},"fromPeer":"abcd"}}"#,
            serde_json::to_string(&sample_message()).unwrap()
        );
        let frame: HubFrame = decode_frame(&text).unwrap();

        match frame {
            HubFrame::MeshMessage { envelope, from_peer, envelope_type } => {
                assert_eq!(envelope_type, EnvelopeKind::Message);
                assert_eq!(from_peer, "abcd");
                let payload = MeshPayload::from_value(envelope, envelope_type).unwrap();
                assert!(matches!(payload, MeshPayload::Message(_)));
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn hub_frame_round_trip() {
        let payload = MeshPayload::Message(sample_message());
        let (envelope, envelope_type) = payload.clone().into_parts().unwrap();
        let frame = HubFrame::MeshMessage { envelope, from_peer: "feed".into(), envelope_type };

        let text = encode_frame(&frame).unwrap();
        let back: HubFrame = decode_frame(&text).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn peer_events_round_trip() {
        for frame in [
            HubFrame::PeerList { peers: vec!["a".into(), "b".into()] },
            HubFrame::PeerConnected { peer_id: "a".into() },
            HubFrame::PeerDisconnected { peer_id: "a".into() },
        ] {
            let text = encode_frame(&frame).unwrap();
            let back: HubFrame = decode_frame(&text).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn oversized_frame_rejected_on_decode() {
        let text = format!(
            r#"{{"type":"mesh_message","envelope":{{"pad":"{}"}}}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(
            decode_frame::<PeerFrame>(&text),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode_frame::<PeerFrame>("not json").is_err());
        assert!(decode_frame::<PeerFrame>(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn unknown_envelope_fields_survive_transit() {
        // A hub running older code must pass unknown envelope fields through;
        // the opaque Value representation guarantees it.
        let text = r#"{"type":"mesh_message","envelope":{"futureField":42},"fromPeer":"x"}"#;
        let frame: HubFrame = decode_frame(text).unwrap();
        let HubFrame::MeshMessage { envelope, .. } = &frame else {
            panic!("expected mesh_message");
        };
        assert_eq!(envelope["futureField"], 42);
        assert!(encode_frame(&frame).unwrap().contains("futureField"));
    }
}
