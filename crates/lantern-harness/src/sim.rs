//! In-process mesh simulation.
//!
//! Nodes hold the real [`Relay`] and [`AdminJoin`] state machines plus a
//! real [`MemoryStore`]; hubs are membership sets. Frames queue up and
//! deliver one at a time, the virtual clock ticking per delivery, so runs
//! are deterministic and loops terminate only through TTL and dedupe — the
//! same forces that bound the real mesh.

use std::collections::VecDeque;
use std::time::Duration;

use lantern_core::{AdminJoin, Environment, Relay, RelayAction, RelayConfig};
use lantern_crypto::{seal, AdminKeyPair};
use lantern_node::{MemoryStore, MeshStore};
use lantern_proto::{
    DecryptedMessage, HubFrame, KeyEnvelope, MeshPayload, MessageEnvelope, Meta, MsgId, NodeId,
    PeerFrame,
};

use crate::env::SimEnv;

/// Index of a hub within the mesh.
pub type HubId = usize;

/// Index of a node within the mesh.
pub type NodeIndex = usize;

/// Observable state of one simulated node.
pub struct SimNodeState {
    /// The real relay state machine.
    pub relay: Relay,
    /// The node's log.
    pub store: MemoryStore,
    /// Admin join (present with a secret on admin nodes).
    pub join: AdminJoin,
    /// Message-handler invocations, in order.
    pub delivered: Vec<MessageEnvelope>,
    /// Key-handler invocations, in order.
    pub delivered_keys: Vec<KeyEnvelope>,
    /// Decrypted messages emitted (admin nodes only).
    pub decrypted: Vec<DecryptedMessage>,
    /// Admin key pair, kept so tests can seal to this node.
    pub admin_keys: Option<AdminKeyPair>,
}

impl SimNodeState {
    /// How many times the message handler fired for `msg_id`.
    pub fn delivery_count(&self, msg_id: MsgId) -> usize {
        self.delivered.iter().filter(|env| env.msg_id == msg_id).count()
    }
}

struct Delivery {
    to: NodeIndex,
    frame: HubFrame,
}

/// A set of hubs and nodes wired through an in-process queue.
pub struct SimMesh {
    env: SimEnv,
    nodes: Vec<SimNodeState>,
    hubs: Vec<Vec<NodeIndex>>,
    memberships: Vec<Vec<HubId>>,
    queue: VecDeque<Delivery>,
    delivered_frames: usize,
}

impl SimMesh {
    /// Create a mesh with a deterministic environment.
    pub fn new(seed: u64) -> Self {
        Self {
            env: SimEnv::seeded(seed),
            nodes: Vec::new(),
            hubs: Vec::new(),
            memberships: Vec::new(),
            queue: VecDeque::new(),
            delivered_frames: 0,
        }
    }

    /// The simulation environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Add a hub with no members.
    pub fn add_hub(&mut self) -> HubId {
        self.hubs.push(Vec::new());
        self.hubs.len() - 1
    }

    /// Add a node; admin nodes get a key pair and an armed join.
    pub fn add_node(&mut self, admin: bool) -> NodeIndex {
        let node_id = NodeId::from_bits(self.env.random_u128());
        let mut relay = Relay::new(node_id, RelayConfig::default());
        relay.begin_connect();
        // The register frame goes to the hub on attach; the sim tracks
        // membership explicitly, so the frame itself is dropped.
        let _ = relay.transport_connected();

        let admin_keys = admin.then(AdminKeyPair::generate);
        let join = AdminJoin::new(admin_keys.as_ref().map(|pair| pair.secret.clone()));

        self.nodes.push(SimNodeState {
            relay,
            store: MemoryStore::new(),
            join,
            delivered: Vec::new(),
            delivered_keys: Vec::new(),
            decrypted: Vec::new(),
            admin_keys,
        });
        self.memberships.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Join a node to a hub. A node on several hubs bridges them.
    pub fn attach(&mut self, node: NodeIndex, hub: HubId) {
        self.hubs[hub].push(node);
        self.memberships[node].push(hub);
    }

    /// Observable state of a node.
    pub fn node(&self, index: NodeIndex) -> &SimNodeState {
        &self.nodes[index]
    }

    /// Total frames delivered so far (loop detector for tests).
    pub fn delivered_frames(&self) -> usize {
        self.delivered_frames
    }

    /// Originate a broadcast at `node` and run the mesh to quiescence.
    pub fn broadcast(&mut self, node: NodeIndex, content: &str, ttl: u8) -> MsgId {
        let origin = self.nodes[node].relay.node_id();
        let env = MessageEnvelope::broadcast(
            MsgId::from_bits(self.env.random_u128()),
            origin.to_string(),
            origin.pseudo_id(),
            content,
            Meta::default(),
            self.env.now(),
        )
        .with_ttl(ttl);

        let msg_id = env.msg_id;
        self.originate(node, MeshPayload::Message(env));
        self.run_to_quiescence();
        msg_id
    }

    /// Seal `plaintext` to `admin_of` and originate both halves at `sender`.
    pub fn send_e2e(&mut self, sender: NodeIndex, admin_of: NodeIndex, plaintext: &str) -> MsgId {
        let pair = self.nodes[admin_of]
            .admin_keys
            .as_ref()
            .expect("target node is not an admin")
            .clone();
        self.send_e2e_with_key(sender, &pair, plaintext)
    }

    /// Seal to an explicit key pair (for wrong-key scenarios).
    pub fn send_e2e_with_key(
        &mut self,
        sender: NodeIndex,
        pair: &AdminKeyPair,
        plaintext: &str,
    ) -> MsgId {
        let sealed = seal(plaintext.as_bytes(), &pair.public).expect("seal");
        let origin = self.nodes[sender].relay.node_id();
        let msg_id = MsgId::from_bits(self.env.random_u128());

        let env = MessageEnvelope::e2e(
            msg_id,
            origin.to_string(),
            origin.pseudo_id(),
            sealed.payload,
            Meta::default(),
            self.env.now(),
        );
        let key = KeyEnvelope::new(msg_id, origin.pseudo_id(), sealed.wrapped_key);

        self.originate(sender, MeshPayload::Message(env));
        self.originate(sender, MeshPayload::Key(key));
        self.run_to_quiescence();
        msg_id
    }

    fn originate(&mut self, node: NodeIndex, payload: MeshPayload) {
        let outcome = match payload {
            MeshPayload::Message(env) => {
                self.nodes[node].relay.originate_message(env).expect("valid origination")
            },
            MeshPayload::Key(key) => {
                self.nodes[node].relay.originate_key(key).expect("valid origination")
            },
        };
        self.execute(node, outcome.actions);
    }

    /// Drain the queue, delivering one frame per virtual second.
    pub fn run_to_quiescence(&mut self) {
        while let Some(delivery) = self.queue.pop_front() {
            self.env.tick(Duration::from_secs(1));
            self.delivered_frames += 1;

            let now = self.env.now();
            let actions = match self.nodes[delivery.to].relay.handle_frame(delivery.frame, now) {
                Ok(actions) => actions,
                Err(_) => continue, // malformed frame: dropped, mesh keeps going
            };
            self.execute(delivery.to, actions);
        }
    }

    fn execute(&mut self, node: NodeIndex, actions: Vec<RelayAction>) {
        for action in actions {
            match action {
                RelayAction::SendFrame(PeerFrame::MeshMessage { envelope, envelope_type }) => {
                    self.fan_out(node, envelope, envelope_type);
                },
                RelayAction::SendFrame(PeerFrame::Register { .. }) => {},

                RelayAction::PersistMessage(env) => {
                    self.nodes[node].store.save_message(&env).expect("memory store write");
                },
                RelayAction::PersistKey(key) => {
                    self.nodes[node].store.save_key(&key).expect("memory store write");
                },

                RelayAction::DeliverMessage(env) => {
                    self.nodes[node].delivered.push(env.clone());
                    if self.nodes[node].join.is_admin() {
                        let now = self.env.now();
                        let state = &mut self.nodes[node];
                        if let Ok(Some(decrypted)) = state.join.offer_message(&env, now) {
                            state.store.save_decrypted(&decrypted).expect("store write");
                            state.decrypted.push(decrypted);
                        }
                    }
                },

                RelayAction::DeliverKey(key) => {
                    self.nodes[node].delivered_keys.push(key.clone());
                    if self.nodes[node].join.is_admin() {
                        let now = self.env.now();
                        let state = &mut self.nodes[node];
                        if let Ok(Some(decrypted)) = state.join.offer_key(&key, now) {
                            state.store.save_decrypted(&decrypted).expect("store write");
                            state.decrypted.push(decrypted);
                        }
                    }
                },

                RelayAction::PeerDiscovered(_) | RelayAction::PeerLost(_) => {},
            }
        }
    }

    /// Queue a frame for every co-member of the sender's hubs, never echoing
    /// back to the sender.
    fn fan_out(
        &mut self,
        from: NodeIndex,
        envelope: serde_json::Value,
        envelope_type: lantern_proto::EnvelopeKind,
    ) {
        let from_peer = self.nodes[from].relay.node_id().to_string();

        for &hub in &self.memberships[from] {
            for &member in &self.hubs[hub] {
                if member == from {
                    continue;
                }
                self.queue.push_back(Delivery {
                    to: member,
                    frame: HubFrame::MeshMessage {
                        envelope: envelope.clone(),
                        from_peer: from_peer.clone(),
                        envelope_type,
                    },
                });
            }
        }
    }
}
