//! Observer registry.
//!
//! Handlers run on the node's runtime task, strictly after the log write for
//! the envelope they observe. They must not block: do the work or hand it to
//! a channel, then return.

use std::sync::Mutex;

use lantern_proto::{DecryptedMessage, KeyEnvelope, MessageEnvelope};

type MessageHandler = Box<dyn Fn(&MessageEnvelope) + Send + Sync>;
type KeyHandler = Box<dyn Fn(&KeyEnvelope) + Send + Sync>;
type PeerHandler = Box<dyn Fn(&PeerEvent) + Send + Sync>;
type DecryptedHandler = Box<dyn Fn(&DecryptedMessage) + Send + Sync>;

/// Peer membership change, with the peer's pseudo id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer appeared in the mesh.
    Discovered(String),
    /// A peer left, or the hub link dropped.
    Lost(String),
}

/// Registered observer callbacks.
///
/// Registration is allowed at any time from any task; dispatch happens only
/// on the runtime task. Lock poisoning panics — a handler that panicked has
/// already taken the runtime task down with it.
#[derive(Default)]
pub struct Handlers {
    messages: Mutex<Vec<MessageHandler>>,
    keys: Mutex<Vec<KeyHandler>>,
    peers: Mutex<Vec<PeerHandler>>,
    decrypted: Mutex<Vec<DecryptedHandler>>,
}

impl Handlers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message observer.
    pub fn on_message(&self, handler: impl Fn(&MessageEnvelope) + Send + Sync + 'static) {
        self.lock(&self.messages).push(Box::new(handler));
    }

    /// Register a key observer.
    pub fn on_key(&self, handler: impl Fn(&KeyEnvelope) + Send + Sync + 'static) {
        self.lock(&self.keys).push(Box::new(handler));
    }

    /// Register a peer membership observer.
    pub fn on_peer(&self, handler: impl Fn(&PeerEvent) + Send + Sync + 'static) {
        self.lock(&self.peers).push(Box::new(handler));
    }

    /// Register a decrypted-message observer (fires on admin nodes only).
    pub fn on_decrypted(&self, handler: impl Fn(&DecryptedMessage) + Send + Sync + 'static) {
        self.lock(&self.decrypted).push(Box::new(handler));
    }

    pub(crate) fn fire_message(&self, env: &MessageEnvelope) {
        for handler in self.lock(&self.messages).iter() {
            handler(env);
        }
    }

    pub(crate) fn fire_key(&self, key: &KeyEnvelope) {
        for handler in self.lock(&self.keys).iter() {
            handler(key);
        }
    }

    pub(crate) fn fire_peer(&self, event: &PeerEvent) {
        for handler in self.lock(&self.peers).iter() {
            handler(event);
        }
    }

    pub(crate) fn fire_decrypted(&self, msg: &DecryptedMessage) {
        for handler in self.lock(&self.decrypted).iter() {
            handler(msg);
        }
    }

    #[allow(clippy::expect_used)]
    fn lock<'a, T>(&self, slot: &'a Mutex<Vec<T>>) -> std::sync::MutexGuard<'a, Vec<T>> {
        slot.lock().expect("handler mutex poisoned")
    }
}
