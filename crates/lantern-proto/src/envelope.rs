//! Envelope model: the units that travel through the mesh.
//!
//! A [`MessageEnvelope`] carries either broadcast plaintext or end-to-end
//! ciphertext and is relayed hop by hop under a TTL budget. A [`KeyEnvelope`]
//! carries the wrapped session key for an e2e message; it is published once
//! and never relayed. A [`DecryptedMessage`] exists only on admin nodes,
//! where the two paths are joined.
//!
//! Structural invariants:
//!
//! - `broadcast` envelopes target `all` and carry plaintext; `e2e` envelopes
//!   target `admin` and carry base64(nonce | ciphertext).
//! - `hops` is never empty; the head is the origin.
//! - `ttl` only decreases, and only via [`MessageEnvelope::with_hop`].

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    id::MsgId,
    DEFAULT_TTL, META_VALUE_MAX,
};

/// Message class: readable by everyone, or by the administrator only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Public plaintext for all reachable nodes.
    Broadcast,
    /// Ciphertext addressed to the administrator.
    E2e,
}

/// Envelope destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Every reachable node.
    All,
    /// The administrator only.
    Admin,
}

/// Witness of one forwarder in an envelope's path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopRecord {
    /// Forwarder's node id in hex, or a reserved id like `"gateway"`.
    pub node_id: String,
    /// When the forwarder handled the envelope.
    pub timestamp: DateTime<Utc>,
}

impl HopRecord {
    /// Build a hop record for `node_id` at `now`.
    pub fn new(node_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { node_id: node_id.into(), timestamp: now }
    }
}

/// Operator-facing metadata. Never secret, never authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meta {
    /// Free-form sender name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form location hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Contact detail (phone, callsign, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Reference to an externally stored image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl Meta {
    /// True when no field is set; empty metadata is omitted from the wire.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.contact.is_none()
            && self.image_ref.is_none()
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("location", &self.location),
            ("contact", &self.contact),
            ("imageRef", &self.image_ref),
        ] {
            if let Some(value) = value {
                if value.len() > META_VALUE_MAX {
                    return Err(ProtocolError::malformed(format!(
                        "meta field {field} exceeds {META_VALUE_MAX} bytes"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The unit that travels on the message path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Globally unique message identifier.
    pub msg_id: MsgId,
    /// Broadcast or e2e.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Originator's pseudo id.
    pub from: String,
    /// `all` for broadcasts, `admin` for e2e.
    pub to: Destination,
    /// Origination time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Remaining hop budget. Strictly decreases along forwarding.
    pub ttl: u8,
    /// Forwarding path; the head is the origin.
    pub hops: Vec<HopRecord>,
    /// Plaintext (broadcast) or base64(nonce | ciphertext) (e2e).
    pub payload: String,
    /// Optional operator metadata.
    #[serde(skip_serializing_if = "Meta::is_empty", default)]
    pub meta: Meta,
}

impl MessageEnvelope {
    /// Build a broadcast envelope with the default TTL and a single origin
    /// hop. `origin_id` is the originating node's hex id, `from` its pseudo
    /// id.
    pub fn broadcast(
        msg_id: MsgId,
        origin_id: impl Into<String>,
        from: impl Into<String>,
        content: impl Into<String>,
        meta: Meta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            msg_id,
            kind: MessageKind::Broadcast,
            from: from.into(),
            to: Destination::All,
            timestamp: now,
            ttl: DEFAULT_TTL,
            hops: vec![HopRecord::new(origin_id, now)],
            payload: content.into(),
            meta,
        }
    }

    /// Build an e2e envelope around an already sealed payload.
    pub fn e2e(
        msg_id: MsgId,
        origin_id: impl Into<String>,
        from: impl Into<String>,
        sealed_payload: impl Into<String>,
        meta: Meta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            msg_id,
            kind: MessageKind::E2e,
            from: from.into(),
            to: Destination::Admin,
            timestamp: now,
            ttl: DEFAULT_TTL,
            hops: vec![HopRecord::new(origin_id, now)],
            payload: sealed_payload.into(),
            meta,
        }
    }

    /// Override the hop budget at origin. Clamped to [`DEFAULT_TTL`].
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl.min(DEFAULT_TTL);
        self
    }

    /// Copy of this envelope with one more hop appended and the TTL
    /// decremented.
    ///
    /// # Errors
    ///
    /// `ProtocolError::TtlExhausted` when the budget is already spent.
    pub fn with_hop(&self, node_id: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        let Some(ttl) = self.ttl.checked_sub(1) else {
            return Err(ProtocolError::TtlExhausted);
        };

        let mut next = self.clone();
        next.ttl = ttl;
        next.hops.push(HopRecord::new(node_id, now));
        Ok(next)
    }

    /// Check every structural invariant, returning the specific violation.
    pub fn validate(&self) -> Result<()> {
        if self.hops.is_empty() {
            return Err(ProtocolError::malformed("hops must contain the origin"));
        }
        if self.from.is_empty() {
            return Err(ProtocolError::malformed("from must not be empty"));
        }
        if self.ttl > DEFAULT_TTL {
            return Err(ProtocolError::malformed(format!(
                "ttl {} exceeds origin maximum {DEFAULT_TTL}",
                self.ttl
            )));
        }
        self.meta.validate()?;

        match (self.kind, self.to) {
            (MessageKind::Broadcast, Destination::All) => Ok(()),
            (MessageKind::E2e, Destination::Admin) => self.validate_sealed_payload(),
            (kind, to) => Err(ProtocolError::WrongTypeTarget {
                kind: format!("{kind:?}").to_lowercase(),
                to: format!("{to:?}").to_lowercase(),
            }),
        }
    }

    fn validate_sealed_payload(&self) -> Result<()> {
        let blob = STANDARD
            .decode(&self.payload)
            .map_err(|e| ProtocolError::BadPayloadEncoding(e.to_string()))?;

        if blob.len() < lantern_crypto::MIN_PAYLOAD_LEN {
            return Err(ProtocolError::BadPayloadEncoding(format!(
                "sealed payload is {} bytes, below the {}-byte minimum",
                blob.len(),
                lantern_crypto::MIN_PAYLOAD_LEN
            )));
        }
        Ok(())
    }

    /// Origin hop, the first entry in the path.
    pub fn origin(&self) -> &HopRecord {
        // Constructors always seed one hop; validate() rejects empty paths.
        &self.hops[0]
    }
}

/// The unit that travels on the key path.
///
/// No TTL and no hop list: a key envelope is published once by its origin and
/// fanned out once per connected peer, never relayed onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEnvelope {
    /// Matches the `msg_id` of the paired [`MessageEnvelope`].
    pub msg_id: MsgId,
    /// Originator's pseudo id.
    pub from: String,
    /// Always the administrator.
    pub to: Destination,
    /// base64(ephemeral pub | nonce | box(session key)).
    pub wrapped_key: String,
    /// KEM + AEAD tag, e.g. [`lantern_crypto::ALGORITHM`].
    pub algorithm: String,
}

impl KeyEnvelope {
    /// Build a key envelope for the message `msg_id`.
    pub fn new(msg_id: MsgId, from: impl Into<String>, wrapped_key: impl Into<String>) -> Self {
        Self {
            msg_id,
            from: from.into(),
            to: Destination::Admin,
            wrapped_key: wrapped_key.into(),
            algorithm: lantern_crypto::ALGORITHM.to_string(),
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.to != Destination::Admin {
            return Err(ProtocolError::WrongTypeTarget {
                kind: "key".to_string(),
                to: format!("{:?}", self.to).to_lowercase(),
            });
        }
        if self.from.is_empty() {
            return Err(ProtocolError::malformed("from must not be empty"));
        }

        let blob = STANDARD
            .decode(&self.wrapped_key)
            .map_err(|e| ProtocolError::BadPayloadEncoding(e.to_string()))?;

        if blob.len() != lantern_crypto::WRAPPED_KEY_LEN {
            return Err(ProtocolError::BadPayloadEncoding(format!(
                "wrapped key is {} bytes, expected {}",
                blob.len(),
                lantern_crypto::WRAPPED_KEY_LEN
            )));
        }
        Ok(())
    }
}

/// Produced at an admin node when both paths for a message have arrived and
/// decryption succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    /// Identifier shared by both source envelopes.
    pub msg_id: MsgId,
    /// Recovered plaintext.
    pub content: String,
    /// Origination time from the message envelope.
    pub timestamp: DateTime<Utc>,
    /// Originator's pseudo id.
    pub from: String,
    /// Metadata from the message envelope.
    #[serde(skip_serializing_if = "Meta::is_empty", default)]
    pub meta: Meta,
    /// Path the ciphertext took.
    pub message_path: Vec<HopRecord>,
    /// Path the key took (a single publication hop).
    pub key_path: Vec<HopRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample_broadcast() -> MessageEnvelope {
        MessageEnvelope::broadcast(
            MsgId::from_bits(1),
            "0123456789abcdef0123456789abcdef",
            "user_01234567",
            "hi",
            Meta::default(),
            t0(),
        )
    }

    #[test]
    fn broadcast_constructor_seeds_origin_hop() {
        let env = sample_broadcast();
        assert_eq!(env.ttl, DEFAULT_TTL);
        assert_eq!(env.hops.len(), 1);
        assert_eq!(env.origin().node_id, "0123456789abcdef0123456789abcdef");
        assert!(env.validate().is_ok());
    }

    #[test]
    fn with_hop_appends_and_decrements() {
        let env = sample_broadcast();
        let next = env.with_hop("ffffffffffffffffffffffffffffffff", t0()).unwrap();

        assert_eq!(next.ttl, env.ttl - 1);
        assert_eq!(next.hops.len(), 2);
        assert_eq!(next.hops[1].node_id, "ffffffffffffffffffffffffffffffff");
        // Original untouched.
        assert_eq!(env.hops.len(), 1);
    }

    #[test]
    fn with_hop_at_zero_ttl_fails() {
        let env = sample_broadcast().with_ttl(0);
        assert!(matches!(
            env.with_hop("ffffffffffffffffffffffffffffffff", t0()),
            Err(ProtocolError::TtlExhausted)
        ));
    }

    #[test]
    fn validate_rejects_empty_hops() {
        let mut env = sample_broadcast();
        env.hops.clear();
        assert!(matches!(env.validate(), Err(ProtocolError::MalformedEnvelope { .. })));
    }

    #[test]
    fn validate_rejects_ttl_above_origin_max() {
        let mut env = sample_broadcast();
        env.ttl = DEFAULT_TTL + 1;
        assert!(matches!(env.validate(), Err(ProtocolError::MalformedEnvelope { .. })));
    }

    #[test]
    fn validate_rejects_broadcast_to_admin() {
        let mut env = sample_broadcast();
        env.to = Destination::Admin;
        assert!(matches!(env.validate(), Err(ProtocolError::WrongTypeTarget { .. })));
    }

    #[test]
    fn validate_rejects_e2e_with_plaintext_payload() {
        let mut env = sample_broadcast();
        env.kind = MessageKind::E2e;
        env.to = Destination::Admin;
        env.payload = "not base64!!".to_string();
        assert!(matches!(env.validate(), Err(ProtocolError::BadPayloadEncoding(_))));
    }

    #[test]
    fn validate_rejects_short_sealed_payload() {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let mut env = sample_broadcast();
        env.kind = MessageKind::E2e;
        env.to = Destination::Admin;
        env.payload = STANDARD.encode([0u8; 8]);
        assert!(matches!(env.validate(), Err(ProtocolError::BadPayloadEncoding(_))));
    }

    #[test]
    fn validate_rejects_oversized_meta() {
        let mut env = sample_broadcast();
        env.meta.location = Some("x".repeat(META_VALUE_MAX + 1));
        assert!(matches!(env.validate(), Err(ProtocolError::MalformedEnvelope { .. })));
    }

    #[test]
    fn e2e_with_real_sealed_payload_validates() {
        let admin = lantern_crypto::AdminKeyPair::generate();
        let sealed = lantern_crypto::seal(b"evacuate", &admin.public).unwrap();

        let env = MessageEnvelope::e2e(
            MsgId::from_bits(2),
            "0123456789abcdef0123456789abcdef",
            "user_01234567",
            sealed.payload,
            Meta::default(),
            t0(),
        );
        assert!(env.validate().is_ok());

        let key = KeyEnvelope::new(MsgId::from_bits(2), "user_01234567", sealed.wrapped_key);
        assert!(key.validate().is_ok());
        assert_eq!(key.algorithm, lantern_crypto::ALGORITHM);
    }

    #[test]
    fn key_envelope_rejects_truncated_wrap() {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let key = KeyEnvelope::new(
            MsgId::from_bits(3),
            "user_01234567",
            STANDARD.encode([0u8; 50]),
        );
        assert!(matches!(key.validate(), Err(ProtocolError::BadPayloadEncoding(_))));
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let env = sample_broadcast();
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["msgId"], "00000000000000000000000000000001");
        assert_eq!(json["type"], "broadcast");
        assert_eq!(json["to"], "all");
        assert_eq!(json["ttl"], 8);
        assert_eq!(json["hops"][0]["nodeId"], "0123456789abcdef0123456789abcdef");
        // Empty meta is omitted entirely.
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn meta_image_ref_wire_name() {
        let meta = Meta { image_ref: Some("img-1".into()), ..Meta::default() };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["imageRef"], "img-1");
    }

    #[test]
    fn envelope_json_round_trip() {
        let mut env = sample_broadcast();
        env.meta.name = Some("ada".into());

        let json = serde_json::to_string(&env).unwrap();
        let back: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
