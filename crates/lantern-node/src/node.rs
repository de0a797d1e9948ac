//! Node runtime: the single owner task around the relay state machine.
//!
//! The runtime executes relay actions in order and stops an envelope's
//! action list at the first persistence failure, which is what makes the
//! relay's ordering guarantees (persist before deliver before forward) hold
//! in production. It also owns the reconnect loop: fixed delay, bounded
//! attempts, commands still served while offline so locally-originated
//! envelopes keep landing in the log.

use std::collections::BTreeSet;
use std::sync::Arc;

use lantern_core::{
    AdminJoin, Environment, Relay, RelayAction, RelayConfig, DEDUPE_CAPACITY,
};
use lantern_crypto::{seal, AdminPublicKey};
use lantern_proto::{
    pseudo_of, DecryptedMessage, KeyEnvelope, MessageEnvelope, Meta, MsgId, NodeId, PeerFrame,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::NodeError,
    handlers::{Handlers, PeerEvent},
    identity::NodeIdentity,
    storage::MeshStore,
    transport::{self, ConnectedHub},
};

/// Node runtime configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hub mesh endpoint, e.g. `ws://127.0.0.1:3000/mesh`.
    pub hub_url: String,
    /// Relay tuning (reconnect delay and attempt budget).
    pub relay: RelayConfig,
    /// Generate and persist an admin key pair for this node if it has none.
    pub admin: bool,
    /// The deployment's admin public key (base64), for e2e sends from
    /// non-admin nodes. Admin nodes fall back to their own key.
    pub admin_public_key: Option<String>,
}

impl NodeConfig {
    /// Config with defaults for the given hub URL.
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            relay: RelayConfig::default(),
            admin: false,
            admin_public_key: None,
        }
    }
}

enum Command {
    Broadcast {
        content: String,
        meta: Meta,
        reply: oneshot::Sender<Result<MessageEnvelope, NodeError>>,
    },
    SendE2e {
        plaintext: String,
        meta: Meta,
        reply: oneshot::Sender<Result<MsgId, NodeError>>,
    },
    PublishMessage {
        env: MessageEnvelope,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    PublishKey {
        key: KeyEnvelope,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    Peers {
        reply: oneshot::Sender<BTreeSet<String>>,
    },
    Export {
        reply: oneshot::Sender<Result<String, NodeError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Entry point for starting a node.
pub struct Node;

impl Node {
    /// Bootstrap identity, rebuild dedupe from the log, and spawn the
    /// runtime task. Must be called within a tokio runtime.
    pub fn start<E: Environment, S: MeshStore>(
        env: E,
        store: S,
        config: NodeConfig,
    ) -> Result<NodeHandle, NodeError> {
        let identity = load_or_create_identity(&env, &store, config.admin)?;

        let sender_admin_key = match &config.admin_public_key {
            Some(encoded) => Some(AdminPublicKey::from_base64(encoded)?),
            None => identity.admin_public()?,
        };

        let mut relay = Relay::new(identity.node_id, config.relay.clone());
        relay.preload_dedupe(store.recent_sightings(DEDUPE_CAPACITY)?);

        let join = AdminJoin::new(identity.admin_secret()?);
        let handlers = Arc::new(Handlers::new());
        let (commands_tx, commands_rx) = mpsc::channel(64);

        let handle = NodeHandle {
            node_id: identity.node_id,
            pseudo_id: identity.node_id.pseudo_id(),
            admin_public_key: identity.admin_public_key.clone(),
            commands: commands_tx,
            handlers: Arc::clone(&handlers),
        };

        let runtime = Runtime {
            env,
            store,
            relay,
            join,
            handlers,
            commands: commands_rx,
            hub_url: config.hub_url,
            sender_admin_key,
            link: None,
        };
        tokio::spawn(runtime.run());

        Ok(handle)
    }
}

/// Cloneable handle to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    node_id: NodeId,
    pseudo_id: String,
    admin_public_key: Option<String>,
    commands: mpsc::Sender<Command>,
    handlers: Arc<Handlers>,
}

impl NodeHandle {
    /// This node's identifier.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// This node's display handle.
    pub fn pseudo_id(&self) -> &str {
        &self.pseudo_id
    }

    /// This node's admin public key (base64), if it is an admin.
    pub fn admin_public_key(&self) -> Option<&str> {
        self.admin_public_key.as_deref()
    }

    /// Originate a broadcast. Returns the envelope after it was persisted,
    /// delivered locally, and accepted by the hub channel.
    ///
    /// # Errors
    ///
    /// [`NodeError::NotConnected`] when the hub link is down — persistence
    /// and local delivery have already succeeded in that case.
    pub async fn broadcast(
        &self,
        content: impl Into<String>,
        meta: Meta,
    ) -> Result<MessageEnvelope, NodeError> {
        self.request(|reply| Command::Broadcast { content: content.into(), meta, reply })
            .await?
    }

    /// Seal a plaintext to the deployment's administrator and originate both
    /// the message and key envelopes (message first).
    pub async fn send_e2e(
        &self,
        plaintext: impl Into<String>,
        meta: Meta,
    ) -> Result<MsgId, NodeError> {
        self.request(|reply| Command::SendE2e { plaintext: plaintext.into(), meta, reply })
            .await?
    }

    /// Originate an already-built message envelope.
    pub async fn publish_message(&self, env: MessageEnvelope) -> Result<(), NodeError> {
        self.request(|reply| Command::PublishMessage { env, reply }).await?
    }

    /// Originate an already-built key envelope.
    pub async fn publish_key(&self, key: KeyEnvelope) -> Result<(), NodeError> {
        self.request(|reply| Command::PublishKey { key, reply }).await?
    }

    /// Pseudo ids of the peers in the last hub snapshot.
    pub async fn peers(&self) -> Result<BTreeSet<String>, NodeError> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Operator audit export of the persisted collections, as JSON.
    pub async fn export(&self) -> Result<String, NodeError> {
        self.request(|reply| Command::Export { reply }).await?
    }

    /// Shut the node down: close the hub link cleanly and stop the runtime.
    /// Already-logged envelopes are retained.
    pub async fn close(&self) -> Result<(), NodeError> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Register a message observer. Runs on the runtime task; must not block.
    pub fn on_message(&self, handler: impl Fn(&MessageEnvelope) + Send + Sync + 'static) {
        self.handlers.on_message(handler);
    }

    /// Register a key observer.
    pub fn on_key(&self, handler: impl Fn(&KeyEnvelope) + Send + Sync + 'static) {
        self.handlers.on_key(handler);
    }

    /// Register a peer membership observer.
    pub fn on_peer(&self, handler: impl Fn(&PeerEvent) + Send + Sync + 'static) {
        self.handlers.on_peer(handler);
    }

    /// Register a decrypted-message observer (admin nodes only).
    pub fn on_decrypted(&self, handler: impl Fn(&DecryptedMessage) + Send + Sync + 'static) {
        self.handlers.on_decrypted(handler);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(build(reply_tx)).await.map_err(|_| NodeError::Closed)?;
        reply_rx.await.map_err(|_| NodeError::Closed)
    }
}

fn load_or_create_identity<E: Environment, S: MeshStore>(
    env: &E,
    store: &S,
    admin: bool,
) -> Result<NodeIdentity, NodeError> {
    let (mut identity, mut dirty) = match store.load_identity()? {
        Some(identity) => (identity, false),
        None => (NodeIdentity::generate(env), true),
    };

    if admin && !identity.is_admin() {
        identity.ensure_admin_keys();
        dirty = true;
    }
    if dirty {
        store.save_identity(&identity)?;
    }
    Ok(identity)
}

struct Runtime<E: Environment, S: MeshStore> {
    env: E,
    store: S,
    relay: Relay,
    join: AdminJoin,
    handlers: Arc<Handlers>,
    commands: mpsc::Receiver<Command>,
    hub_url: String,
    sender_admin_key: Option<AdminPublicKey>,
    link: Option<mpsc::Sender<PeerFrame>>,
}

impl<E: Environment, S: MeshStore> Runtime<E, S> {
    async fn run(mut self) {
        loop {
            self.relay.begin_connect();

            match transport::connect(&self.hub_url).await {
                Ok(mut hub) => {
                    tracing::info!(url = %self.hub_url, "hub link up");
                    self.link = Some(hub.to_hub.clone());

                    let register = self.relay.transport_connected();
                    if let Err(e) = self.execute(register).await {
                        tracing::warn!(error = %e, "register write failed");
                    }

                    let closed = self.serve_link(&mut hub).await;
                    self.link = None;
                    if closed {
                        return;
                    }

                    let (actions, reconnect) = self.relay.transport_closed();
                    if let Err(e) = self.execute(actions).await {
                        tracing::warn!(error = %e, "peer-lost dispatch failed");
                    }
                    if self.offline(reconnect).await {
                        return;
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, url = %self.hub_url, "hub dial failed");
                    let reconnect = self.relay.connect_failed();
                    if self.offline(reconnect).await {
                        return;
                    }
                },
            }
        }
    }

    /// Serve frames and commands while the link is up. Returns true when the
    /// runtime should stop.
    async fn serve_link(&mut self, hub: &mut ConnectedHub) -> bool {
        loop {
            tokio::select! {
                frame = hub.from_hub.recv() => {
                    let Some(frame) = frame else { return false };
                    let now = self.env.now();

                    match self.relay.handle_frame(frame, now) {
                        Ok(actions) => {
                            if let Err(e) = self.execute(actions).await {
                                // Persistence failed: the envelope was neither
                                // delivered nor forwarded.
                                tracing::error!(error = %e, "dropping envelope");
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed frame");
                        },
                    }
                },

                err = hub.errors.recv() => {
                    if let Some(e) = err {
                        tracing::warn!(error = %e, "hub link error");
                    }
                    return false;
                },

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Close { reply }) => {
                            let _ = reply.send(());
                            return true;
                        },
                        Some(cmd) => self.handle_command(cmd).await,
                        None => return true,
                    }
                },
            }
        }
    }

    /// Wait out a reconnect delay (or stay offline for good when the budget
    /// is spent), still serving commands. Returns true on shutdown.
    async fn offline(&mut self, reconnect: Option<lantern_core::Reconnect>) -> bool {
        match reconnect {
            Some(directive) => {
                tracing::info!(
                    attempt = directive.attempt,
                    delay_ms = directive.delay.as_millis() as u64,
                    "reconnecting to hub"
                );

                let env = self.env.clone();
                let sleep = env.sleep(directive.delay);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        () = &mut sleep => return false,
                        cmd = self.commands.recv() => {
                            match cmd {
                                Some(Command::Close { reply }) => {
                                    let _ = reply.send(());
                                    return true;
                                },
                                Some(cmd) => self.handle_command(cmd).await,
                                None => return true,
                            }
                        },
                    }
                }
            },
            None => {
                tracing::warn!("reconnect budget exhausted, node stays offline");
                loop {
                    match self.commands.recv().await {
                        Some(Command::Close { reply }) => {
                            let _ = reply.send(());
                            return true;
                        },
                        Some(cmd) => self.handle_command(cmd).await,
                        None => return true,
                    }
                }
            },
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Broadcast { content, meta, reply } => {
                let env = MessageEnvelope::broadcast(
                    MsgId::from_bits(self.env.random_u128()),
                    self.relay.node_id().to_string(),
                    self.relay.pseudo_id().to_string(),
                    content,
                    meta,
                    self.env.now(),
                );
                let result = self.originate_message(env.clone()).await.map(|()| env);
                let _ = reply.send(result);
            },

            Command::SendE2e { plaintext, meta, reply } => {
                let _ = reply.send(self.send_e2e(plaintext, meta).await);
            },

            Command::PublishMessage { env, reply } => {
                let _ = reply.send(self.originate_message(env).await);
            },

            Command::PublishKey { key, reply } => {
                let _ = reply.send(self.originate_key(key).await);
            },

            Command::Peers { reply } => {
                let _ = reply.send(self.relay.peers());
            },

            Command::Export { reply } => {
                let result = self
                    .store
                    .export()
                    .and_then(|export| export.to_json())
                    .map_err(NodeError::from);
                let _ = reply.send(result);
            },

            // Close is intercepted by the loops that own shutdown.
            Command::Close { reply } => {
                let _ = reply.send(());
            },
        }
    }

    async fn originate_message(&mut self, env: MessageEnvelope) -> Result<(), NodeError> {
        let outcome = self.relay.originate_message(env)?;
        self.execute(outcome.actions).await?;

        if outcome.emitted { Ok(()) } else { Err(NodeError::NotConnected) }
    }

    async fn originate_key(&mut self, key: KeyEnvelope) -> Result<(), NodeError> {
        let outcome = self.relay.originate_key(key)?;
        self.execute(outcome.actions).await?;

        if outcome.emitted { Ok(()) } else { Err(NodeError::NotConnected) }
    }

    async fn send_e2e(&mut self, plaintext: String, meta: Meta) -> Result<MsgId, NodeError> {
        let Some(admin) = self.sender_admin_key.clone() else {
            return Err(NodeError::AdminKeyMissing);
        };

        let sealed = seal(plaintext.as_bytes(), &admin)?;
        let msg_id = MsgId::from_bits(self.env.random_u128());
        let pseudo = self.relay.pseudo_id().to_string();

        let env = MessageEnvelope::e2e(
            msg_id,
            self.relay.node_id().to_string(),
            pseudo.clone(),
            sealed.payload,
            meta,
            self.env.now(),
        );
        let key = KeyEnvelope::new(msg_id, pseudo, sealed.wrapped_key);

        // Message path first, key path second: an admin that sees the key
        // first just parks it, so this only improves join latency. When the
        // link is down both halves still land in the local log before the
        // NotConnected surfaces.
        let message_result = self.originate_message(env).await;
        let key_result = self.originate_key(key).await;

        match (message_result, key_result) {
            (Ok(()), Ok(())) => Ok(msg_id),
            (Err(e @ NodeError::NotConnected), _) | (Ok(()), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Execute relay actions in order, stopping at the first failure.
    async fn execute(&mut self, actions: Vec<RelayAction>) -> Result<(), NodeError> {
        for action in actions {
            match action {
                RelayAction::SendFrame(frame) => {
                    let Some(link) = &self.link else {
                        return Err(NodeError::NotConnected);
                    };
                    link.send(frame).await.map_err(|_| NodeError::NotConnected)?;
                },

                RelayAction::PersistMessage(env) => self.store.save_message(&env)?,
                RelayAction::PersistKey(key) => self.store.save_key(&key)?,

                RelayAction::DeliverMessage(env) => {
                    self.handlers.fire_message(&env);
                    if self.join.is_admin() {
                        let now = self.env.now();
                        match self.join.offer_message(&env, now) {
                            Ok(Some(decrypted)) => self.emit_decrypted(decrypted)?,
                            Ok(None) => {},
                            Err(e) => tracing::warn!(error = %e, "admin join failed"),
                        }
                    }
                },

                RelayAction::DeliverKey(key) => {
                    self.handlers.fire_key(&key);
                    if self.join.is_admin() {
                        let now = self.env.now();
                        match self.join.offer_key(&key, now) {
                            Ok(Some(decrypted)) => self.emit_decrypted(decrypted)?,
                            Ok(None) => {},
                            Err(e) => tracing::warn!(error = %e, "admin join failed"),
                        }
                    }
                },

                RelayAction::PeerDiscovered(peer_id) => {
                    self.handlers.fire_peer(&PeerEvent::Discovered(pseudo_of(&peer_id)));
                },

                RelayAction::PeerLost(peer_id) => {
                    self.handlers.fire_peer(&PeerEvent::Lost(pseudo_of(&peer_id)));
                },
            }
        }
        Ok(())
    }

    fn emit_decrypted(&self, decrypted: DecryptedMessage) -> Result<(), NodeError> {
        self.store.save_decrypted(&decrypted)?;
        self.handlers.fire_decrypted(&decrypted);
        Ok(())
    }
}
