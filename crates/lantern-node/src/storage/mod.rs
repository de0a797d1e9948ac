//! Persistence bridge: the append-only envelope log and its indices.
//!
//! The store owns every envelope and decrypted message by value; everything
//! else in the node holds read-only views. Writes are last-writer-wins by
//! message id but preserve first-arrival order, so replay and export see the
//! log in the order the node did. The trait is synchronous — backends are
//! either in-memory or a local redb file, and the runtime serialises writes
//! by construction (one owner task).

mod error;
mod memory;
mod redb;

pub use error::StoreError;
use lantern_proto::{DecryptedMessage, EnvelopeKind, KeyEnvelope, MessageEnvelope, MsgId};
pub use memory::MemoryStore;
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStore;
use crate::identity::NodeIdentity;

/// Persistent log with derived collections.
///
/// Must be `Clone` (handles share one underlying store), `Send + Sync`, and
/// synchronous. A failed write is fatal for the envelope in question: the
/// caller must not deliver or forward it.
pub trait MeshStore: Clone + Send + Sync + 'static {
    /// Append or overwrite a message envelope (last-writer-wins by id).
    fn save_message(&self, env: &MessageEnvelope) -> Result<(), StoreError>;

    /// Append or overwrite a key envelope.
    fn save_key(&self, key: &KeyEnvelope) -> Result<(), StoreError>;

    /// Append or overwrite a decrypted message (admin nodes only).
    fn save_decrypted(&self, msg: &DecryptedMessage) -> Result<(), StoreError>;

    /// Every stored message envelope, in first-arrival order.
    fn messages(&self) -> Result<Vec<MessageEnvelope>, StoreError>;

    /// Every stored key envelope, in first-arrival order.
    fn keys(&self) -> Result<Vec<KeyEnvelope>, StoreError>;

    /// Every stored decrypted message, in first-arrival order.
    fn decrypted(&self) -> Result<Vec<DecryptedMessage>, StoreError>;

    /// The most recent `limit` envelope sightings, oldest first. Used to
    /// rebuild the dedupe store on startup.
    fn recent_sightings(&self, limit: usize)
    -> Result<Vec<(MsgId, EnvelopeKind)>, StoreError>;

    /// The persisted node identity, if any.
    fn load_identity(&self) -> Result<Option<NodeIdentity>, StoreError>;

    /// Persist the node identity.
    fn save_identity(&self, identity: &NodeIdentity) -> Result<(), StoreError>;

    /// Derived view: message envelopes of type broadcast only.
    fn broadcasts(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        Ok(self
            .messages()?
            .into_iter()
            .filter(|env| env.kind == lantern_proto::MessageKind::Broadcast)
            .collect())
    }

    /// Serialise the four collections into one document for operator audit.
    fn export(&self) -> Result<MeshExport, StoreError> {
        Ok(MeshExport {
            broadcasts: self.broadcasts()?,
            message_mesh: self.messages()?,
            key_mesh: self.keys()?,
            decrypted: self.decrypted()?,
        })
    }
}

/// Operator audit export: the four persisted collections in one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshExport {
    /// Broadcast envelopes.
    pub broadcasts: Vec<MessageEnvelope>,
    /// Every message envelope (broadcast and e2e).
    pub message_mesh: Vec<MessageEnvelope>,
    /// Every key envelope.
    pub key_mesh: Vec<KeyEnvelope>,
    /// Decrypted messages (admin nodes only).
    pub decrypted: Vec<DecryptedMessage>,
}

impl MeshExport {
    /// Pretty JSON for operators.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod contract_tests {
    //! Behavioural tests run against both backends.

    use chrono::Utc;
    use lantern_proto::{Meta, NodeId};
    use tempfile::tempdir;

    use super::*;
    use crate::SystemEnv;

    fn broadcast(msg: u128, payload: &str) -> MessageEnvelope {
        let origin = NodeId::from_bits(0xEE);
        MessageEnvelope::broadcast(
            MsgId::from_bits(msg),
            origin.to_string(),
            origin.pseudo_id(),
            payload,
            Meta::default(),
            Utc::now(),
        )
    }

    fn key_env(msg: u128) -> KeyEnvelope {
        let admin = lantern_crypto::AdminKeyPair::generate();
        let sealed = lantern_crypto::seal(b"x", &admin.public).unwrap();
        KeyEnvelope::new(MsgId::from_bits(msg), "user_000000ee", sealed.wrapped_key)
    }

    fn exercise_store<S: MeshStore>(store: S) {
        // Order preserved, LWW by id.
        store.save_message(&broadcast(1, "first")).unwrap();
        store.save_message(&broadcast(2, "second")).unwrap();
        store.save_message(&broadcast(1, "first-rewritten")).unwrap();

        let messages = store.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, "first-rewritten");
        assert_eq!(messages[1].payload, "second");

        // Keys are a separate collection sharing the id space.
        store.save_key(&key_env(1)).unwrap();
        assert_eq!(store.keys().unwrap().len(), 1);

        // Sightings record both kinds, oldest first, once per id+kind.
        let sightings = store.recent_sightings(10).unwrap();
        assert_eq!(sightings, vec![
            (MsgId::from_bits(1), EnvelopeKind::Message),
            (MsgId::from_bits(2), EnvelopeKind::Message),
            (MsgId::from_bits(1), EnvelopeKind::Key),
        ]);

        // The limit keeps only the most recent entries.
        let recent = store.recent_sightings(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1], (MsgId::from_bits(1), EnvelopeKind::Key));

        // Broadcast view filters e2e.
        assert_eq!(store.broadcasts().unwrap().len(), 2);

        // Identity round trip.
        assert!(store.load_identity().unwrap().is_none());
        let mut identity = NodeIdentity::generate(&SystemEnv::new());
        identity.ensure_admin_keys();
        store.save_identity(&identity).unwrap();
        assert_eq!(store.load_identity().unwrap(), Some(identity.clone()));

        // Export carries all four collections.
        let export = store.export().unwrap();
        assert_eq!(export.message_mesh.len(), 2);
        assert_eq!(export.key_mesh.len(), 1);
        assert!(export.decrypted.is_empty());
        assert!(export.to_json().unwrap().contains("first-rewritten"));
    }

    #[test]
    fn memory_store_contract() {
        exercise_store(MemoryStore::new());
    }

    #[test]
    fn redb_store_contract() {
        let dir = tempdir().unwrap();
        exercise_store(RedbStore::open(dir.path().join("mesh.redb")).unwrap());
    }

    #[test]
    fn redb_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mesh.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.save_message(&broadcast(7, "durable")).unwrap();
            let identity = NodeIdentity::generate(&SystemEnv::new());
            store.save_identity(&identity).unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.messages().unwrap()[0].payload, "durable");
        assert!(store.load_identity().unwrap().is_some());
        assert_eq!(store.recent_sightings(10).unwrap().len(), 1);
    }

    #[test]
    fn decrypted_collection_round_trip() {
        let store = MemoryStore::new();
        let env = broadcast(9, "x");

        let msg = DecryptedMessage {
            msg_id: MsgId::from_bits(9),
            content: "plain".into(),
            timestamp: env.timestamp,
            from: env.from.clone(),
            meta: Meta::default(),
            message_path: env.hops.clone(),
            key_path: env.hops,
        };
        store.save_decrypted(&msg).unwrap();
        store.save_decrypted(&msg).unwrap(); // LWW, not duplicated

        assert_eq!(store.decrypted().unwrap(), vec![msg]);
    }

    #[test]
    fn sightings_window_is_bounded() {
        let store = MemoryStore::new();
        for n in 0..50u128 {
            store.save_message(&broadcast(n, "x")).unwrap();
        }
        let recent = store.recent_sightings(10).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].0, MsgId::from_bits(40));
        assert_eq!(recent[9].0, MsgId::from_bits(49));
    }
}
