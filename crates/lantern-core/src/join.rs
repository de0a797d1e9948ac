//! Admin-side join of the message and key paths.
//!
//! An e2e message arrives as two halves with the same identifier: the
//! ciphertext envelope on the message path and the wrapped session key on
//! the key path, in either order. The join parks whichever half arrives
//! first and decrypts when the pair completes.
//!
//! A failed decrypt (tag mismatch, key wrapped to someone else) keeps the
//! entry pending: a later key envelope or a log replay may still complete
//! it. The failure is logged for operators and never surfaced to users.
//! Emission is idempotent per message id — replaying a log into a fresh
//! join yields the same decrypted set, and an already-joined id is never
//! emitted twice.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use lantern_proto::{
    DecryptedMessage, HopRecord, KeyEnvelope, MessageEnvelope, MessageKind, MsgId,
};
use lantern_crypto::{open_payload, unwrap_session_key, AdminSecretKey, CryptoError};

use crate::error::JoinError;

/// One half-joined message.
#[derive(Debug, Default, Clone)]
struct Pending {
    message: Option<MessageEnvelope>,
    key: Option<KeyEnvelope>,
}

/// Correlates message and key envelopes and decrypts completed pairs.
pub struct AdminJoin {
    secret: Option<AdminSecretKey>,
    pending: HashMap<MsgId, Pending>,
    emitted: HashSet<MsgId>,
}

impl AdminJoin {
    /// Create a join. Non-admin nodes pass `None` and will never decrypt.
    pub fn new(secret: Option<AdminSecretKey>) -> Self {
        Self { secret, pending: HashMap::new(), emitted: HashSet::new() }
    }

    /// True when this node holds the admin secret.
    pub fn is_admin(&self) -> bool {
        self.secret.is_some()
    }

    /// Number of half-joined entries currently parked.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offer a message envelope. Broadcast envelopes are ignored.
    ///
    /// Returns the decrypted message when this offer completes a pair.
    pub fn offer_message(
        &mut self,
        env: &MessageEnvelope,
        now: DateTime<Utc>,
    ) -> Result<Option<DecryptedMessage>, JoinError> {
        if env.kind != MessageKind::E2e || self.emitted.contains(&env.msg_id) {
            return Ok(None);
        }

        self.pending.entry(env.msg_id).or_default().message = Some(env.clone());
        self.try_join(env.msg_id, now)
    }

    /// Offer a key envelope.
    pub fn offer_key(
        &mut self,
        key: &KeyEnvelope,
        now: DateTime<Utc>,
    ) -> Result<Option<DecryptedMessage>, JoinError> {
        if self.emitted.contains(&key.msg_id) {
            return Ok(None);
        }

        self.pending.entry(key.msg_id).or_default().key = Some(key.clone());
        self.try_join(key.msg_id, now)
    }

    fn try_join(
        &mut self,
        msg_id: MsgId,
        now: DateTime<Utc>,
    ) -> Result<Option<DecryptedMessage>, JoinError> {
        let Some(entry) = self.pending.get(&msg_id) else {
            return Ok(None);
        };
        let (Some(env), Some(key)) = (&entry.message, &entry.key) else {
            return Ok(None);
        };

        let Some(secret) = &self.secret else {
            return Err(JoinError::NotAnAdmin);
        };

        let decrypted = match decrypt_pair(env, key, secret) {
            Ok(content) => content,
            Err(CryptoError::Open) => {
                // Wrong key or corrupt ciphertext: park it. A later
                // KeyEnvelope or a replay may still complete the pair.
                tracing::warn!(msg_id = %msg_id, "decrypt failed, keeping entry pending");
                return Ok(None);
            },
            Err(err) => return Err(err.into()),
        };

        let message = DecryptedMessage {
            msg_id,
            content: decrypted,
            timestamp: env.timestamp,
            from: env.from.clone(),
            meta: env.meta.clone(),
            message_path: env.hops.clone(),
            key_path: vec![HopRecord::new(key.from.clone(), now)],
        };

        self.emitted.insert(msg_id);
        self.pending.remove(&msg_id);
        Ok(Some(message))
    }
}

fn decrypt_pair(
    env: &MessageEnvelope,
    key: &KeyEnvelope,
    secret: &AdminSecretKey,
) -> Result<String, CryptoError> {
    let session_key = unwrap_session_key(&key.wrapped_key, secret)?;
    let plaintext = open_payload(&env.payload, &session_key)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_proto::Meta;
    use lantern_crypto::{seal, AdminKeyPair};

    fn e2e_pair(admin: &AdminKeyPair, msg: u128, plaintext: &[u8]) -> (MessageEnvelope, KeyEnvelope) {
        let sealed = seal(plaintext, &admin.public).unwrap();
        let msg_id = MsgId::from_bits(msg);

        let env = MessageEnvelope::e2e(
            msg_id,
            "000000000000000000000000000000ff",
            "user_00000000",
            sealed.payload,
            Meta::default(),
            Utc::now(),
        );
        let key = KeyEnvelope::new(msg_id, "user_00000000", sealed.wrapped_key);
        (env, key)
    }

    #[test]
    fn message_then_key_joins() {
        let admin = AdminKeyPair::generate();
        let mut join = AdminJoin::new(Some(admin.secret.clone()));
        let (env, key) = e2e_pair(&admin, 1, b"evacuate");

        assert!(join.offer_message(&env, Utc::now()).unwrap().is_none());
        let joined = join.offer_key(&key, Utc::now()).unwrap().expect("pair complete");

        assert_eq!(joined.content, "evacuate");
        assert_eq!(joined.message_path, env.hops);
        assert_eq!(joined.key_path.len(), 1);
        assert_eq!(joined.key_path[0].node_id, "user_00000000");
        assert_eq!(join.pending_len(), 0);
    }

    #[test]
    fn key_then_message_joins() {
        let admin = AdminKeyPair::generate();
        let mut join = AdminJoin::new(Some(admin.secret.clone()));
        let (env, key) = e2e_pair(&admin, 2, b"out of order");

        assert!(join.offer_key(&key, Utc::now()).unwrap().is_none());
        let joined = join.offer_message(&env, Utc::now()).unwrap().expect("pair complete");
        assert_eq!(joined.content, "out of order");
    }

    #[test]
    fn emission_is_idempotent() {
        let admin = AdminKeyPair::generate();
        let mut join = AdminJoin::new(Some(admin.secret.clone()));
        let (env, key) = e2e_pair(&admin, 3, b"once");

        join.offer_message(&env, Utc::now()).unwrap();
        assert!(join.offer_key(&key, Utc::now()).unwrap().is_some());

        // Replays of either half emit nothing.
        assert!(join.offer_message(&env, Utc::now()).unwrap().is_none());
        assert!(join.offer_key(&key, Utc::now()).unwrap().is_none());
        assert_eq!(join.pending_len(), 0);
    }

    #[test]
    fn non_admin_cannot_join() {
        let admin = AdminKeyPair::generate();
        let mut join = AdminJoin::new(None);
        let (env, key) = e2e_pair(&admin, 4, b"secret");

        assert!(join.offer_message(&env, Utc::now()).unwrap().is_none());
        assert!(matches!(join.offer_key(&key, Utc::now()), Err(JoinError::NotAnAdmin)));

        // The entry stays parked for a potential later replay elsewhere.
        assert_eq!(join.pending_len(), 1);
    }

    #[test]
    fn wrong_admin_keeps_entry_pending() {
        let admin = AdminKeyPair::generate();
        let impostor = AdminKeyPair::generate();

        let mut join = AdminJoin::new(Some(impostor.secret.clone()));
        let (env, key) = e2e_pair(&admin, 5, b"not yours");

        join.offer_message(&env, Utc::now()).unwrap();
        assert!(join.offer_key(&key, Utc::now()).unwrap().is_none());
        assert_eq!(join.pending_len(), 1);

        // A key the impostor can actually open completes the pair later.
        let sealed = seal(b"not yours", &impostor.public).unwrap();
        let fixed_key = KeyEnvelope::new(MsgId::from_bits(5), "user_00000000", sealed.wrapped_key);
        let joined = join.offer_key(&fixed_key, Utc::now()).unwrap();
        // The payload was sealed under a different session key, so even the
        // fixed key cannot open the original ciphertext.
        assert!(joined.is_none());
    }

    #[test]
    fn broadcast_envelopes_are_ignored() {
        let admin = AdminKeyPair::generate();
        let mut join = AdminJoin::new(Some(admin.secret.clone()));

        let env = MessageEnvelope::broadcast(
            MsgId::from_bits(6),
            "000000000000000000000000000000ff",
            "user_00000000",
            "public",
            Meta::default(),
            Utc::now(),
        );
        assert!(join.offer_message(&env, Utc::now()).unwrap().is_none());
        assert_eq!(join.pending_len(), 0);
    }

    #[test]
    fn replay_into_fresh_join_is_deterministic() {
        let admin = AdminKeyPair::generate();
        let (env_a, key_a) = e2e_pair(&admin, 7, b"alpha");
        let (env_b, key_b) = e2e_pair(&admin, 8, b"beta");

        let run = |order: &[u8]| {
            let mut join = AdminJoin::new(Some(admin.secret.clone()));
            let mut out = Vec::new();
            for step in order {
                let joined = match step {
                    0 => join.offer_message(&env_a, Utc::now()).unwrap(),
                    1 => join.offer_key(&key_a, Utc::now()).unwrap(),
                    2 => join.offer_message(&env_b, Utc::now()).unwrap(),
                    _ => join.offer_key(&key_b, Utc::now()).unwrap(),
                };
                if let Some(d) = joined {
                    out.push((d.msg_id, d.content));
                }
            }
            out.sort();
            out
        };

        let forward = run(&[0, 1, 2, 3]);
        let shuffled = run(&[3, 0, 2, 1]);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.len(), 2);
    }
}
