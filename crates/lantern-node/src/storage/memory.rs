//! In-memory store for tests and simulation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use lantern_core::DEDUPE_CAPACITY;
use lantern_proto::{DecryptedMessage, EnvelopeKind, KeyEnvelope, MessageEnvelope, MsgId};

use super::{MeshStore, StoreError};
use crate::identity::NodeIdentity;

/// In-memory [`MeshStore`].
///
/// Vectors keep first-arrival order; index maps give last-writer-wins
/// overwrite in place. Clones share the same state via `Arc<Mutex<_>>`.
/// Lock poisoning panics, which is acceptable for test and simulation code.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<MessageEnvelope>,
    message_index: HashMap<MsgId, usize>,
    keys: Vec<KeyEnvelope>,
    key_index: HashMap<MsgId, usize>,
    decrypted: Vec<DecryptedMessage>,
    decrypted_index: HashMap<MsgId, usize>,
    sightings: Vec<(MsgId, EnvelopeKind)>,
    identity: Option<NodeIdentity>,
}

impl Inner {
    /// The persisted sighting window mirrors the dedupe cap: FIFO, bounded.
    fn record_sighting(&mut self, msg_id: MsgId, kind: EnvelopeKind) {
        self.sightings.push((msg_id, kind));
        if self.sightings.len() > DEDUPE_CAPACITY {
            let excess = self.sightings.len() - DEDUPE_CAPACITY;
            self.sightings.drain(..excess);
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mutex poisoned")
    }
}

impl MeshStore for MemoryStore {
    fn save_message(&self, env: &MessageEnvelope) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.message_index.get(&env.msg_id).copied() {
            Some(at) => inner.messages[at] = env.clone(),
            None => {
                let at = inner.messages.len();
                inner.messages.push(env.clone());
                inner.message_index.insert(env.msg_id, at);
                inner.record_sighting(env.msg_id, EnvelopeKind::Message);
            },
        }
        Ok(())
    }

    fn save_key(&self, key: &KeyEnvelope) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.key_index.get(&key.msg_id).copied() {
            Some(at) => inner.keys[at] = key.clone(),
            None => {
                let at = inner.keys.len();
                inner.keys.push(key.clone());
                inner.key_index.insert(key.msg_id, at);
                inner.record_sighting(key.msg_id, EnvelopeKind::Key);
            },
        }
        Ok(())
    }

    fn save_decrypted(&self, msg: &DecryptedMessage) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.decrypted_index.get(&msg.msg_id).copied() {
            Some(at) => inner.decrypted[at] = msg.clone(),
            None => {
                let at = inner.decrypted.len();
                inner.decrypted.push(msg.clone());
                inner.decrypted_index.insert(msg.msg_id, at);
            },
        }
        Ok(())
    }

    fn messages(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        Ok(self.lock().messages.clone())
    }

    fn keys(&self) -> Result<Vec<KeyEnvelope>, StoreError> {
        Ok(self.lock().keys.clone())
    }

    fn decrypted(&self) -> Result<Vec<DecryptedMessage>, StoreError> {
        Ok(self.lock().decrypted.clone())
    }

    fn recent_sightings(
        &self,
        limit: usize,
    ) -> Result<Vec<(MsgId, EnvelopeKind)>, StoreError> {
        let inner = self.lock();
        let skip = inner.sightings.len().saturating_sub(limit);
        Ok(inner.sightings[skip..].to_vec())
    }

    fn load_identity(&self) -> Result<Option<NodeIdentity>, StoreError> {
        Ok(self.lock().identity.clone())
    }

    fn save_identity(&self, identity: &NodeIdentity) -> Result<(), StoreError> {
        self.lock().identity = Some(identity.clone());
        Ok(())
    }
}
