//! Per-node relay state machine.
//!
//! The relay is the centre of a mesh node: it deduplicates inbound
//! envelopes, orders persistence before delivery, appends its own hop before
//! re-emitting, and tracks the hub link plus the peer set. It performs no
//! I/O itself — every effect is returned as a [`RelayAction`] for the
//! runtime to execute, in order. A runtime that fails an action must not
//! execute the ones after it; this is what makes "persist before deliver"
//! and "deliver before forward" real guarantees rather than conventions.
//!
//! # Link state machine
//!
//! ```text
//! ┌──────────────┐  begin_connect   ┌────────────┐  transport_connected  ┌────────────┐
//! │ Disconnected │─────────────────>│ Connecting │──────────────────────>│ Registered │
//! └──────────────┘                  └────────────┘                       └────────────┘
//!                                         │ connect_failed                     │ transport_closed
//!                                         ▼                                    ▼
//!                                    ┌────────────┐<───────────────────────────┘
//!                                    │    Lost    │  reconnect after delay, or
//!                                    └────────────┘  stay Lost once the attempt
//!                                                    budget is spent
//! ```
//!
//! Origination decisions: the origin marks its own message seen at send time
//! and never appends a second self-hop — the hub does not echo to the
//! sender, and any copy that loops back through another peer is dropped by
//! dedupe. Key envelopes are published once and never relayed onward.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lantern_proto::{
    pseudo_of, EnvelopeKind, HubFrame, KeyEnvelope, MeshPayload, MessageEnvelope, NodeId,
    PeerFrame,
};

use crate::{
    dedupe::DedupeStore,
    error::RelayError,
};

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Hub link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport, no reconnect pending.
    Disconnected,
    /// Transport dial in progress.
    Connecting,
    /// Registered with the hub; frames flow.
    Registered,
    /// Transport dropped; a reconnect may be pending.
    Lost,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up permanently.
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Effects for the runtime to execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Write a frame to the hub channel.
    SendFrame(PeerFrame),
    /// Append a message envelope to the log. A failure here is fatal for the
    /// envelope: skip every remaining action for it.
    PersistMessage(MessageEnvelope),
    /// Append a key envelope to the log. Same failure rule.
    PersistKey(KeyEnvelope),
    /// Invoke message observers.
    DeliverMessage(MessageEnvelope),
    /// Invoke key observers.
    DeliverKey(KeyEnvelope),
    /// A peer appeared in the mesh.
    PeerDiscovered(String),
    /// A peer left the mesh (or the link dropped).
    PeerLost(String),
}

/// Result of originating an envelope locally.
#[derive(Debug)]
pub struct OriginateOutcome {
    /// Persist + deliver (always present) and the hub write when connected.
    pub actions: Vec<RelayAction>,
    /// False when the hub write was skipped because the link is down. The
    /// caller surfaces this as [`RelayError::NotConnected`] after executing
    /// the local actions.
    pub emitted: bool,
}

/// Directive to retry the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    /// How long to wait before dialing.
    pub delay: Duration,
    /// 1-based attempt counter.
    pub attempt: u32,
}

/// The per-node relay state machine.
#[derive(Debug)]
pub struct Relay {
    node_id: NodeId,
    pseudo_id: String,
    state: LinkState,
    peers: BTreeSet<String>,
    dedupe: DedupeStore,
    reconnect_attempts: u32,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay for `node_id` in the [`LinkState::Disconnected`] state.
    pub fn new(node_id: NodeId, config: RelayConfig) -> Self {
        Self {
            pseudo_id: node_id.pseudo_id(),
            node_id,
            state: LinkState::Disconnected,
            peers: BTreeSet::new(),
            dedupe: DedupeStore::new(),
            reconnect_attempts: 0,
            config,
        }
    }

    /// This node's identifier.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// This node's display handle.
    pub fn pseudo_id(&self) -> &str {
        &self.pseudo_id
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Pseudo ids of the currently known peers.
    pub fn peers(&self) -> BTreeSet<String> {
        self.peers.iter().map(|id| pseudo_of(id)).collect()
    }

    /// Raw wire ids of the currently known peers.
    pub fn peer_ids(&self) -> &BTreeSet<String> {
        &self.peers
    }

    /// Number of sightings currently held by the dedupe store.
    pub fn dedupe_len(&self) -> usize {
        self.dedupe.len()
    }

    /// Seed the dedupe store from the log, oldest sighting first.
    pub fn preload_dedupe(
        &mut self,
        sightings: impl IntoIterator<Item = (lantern_proto::MsgId, EnvelopeKind)>,
    ) {
        self.dedupe.preload(sightings);
    }

    /// Note that the runtime started dialing the hub.
    pub fn begin_connect(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// The transport is up: register with the hub.
    pub fn transport_connected(&mut self) -> Vec<RelayAction> {
        self.state = LinkState::Registered;
        self.reconnect_attempts = 0;

        vec![RelayAction::SendFrame(PeerFrame::Register {
            peer_id: self.node_id.to_string(),
        })]
    }

    /// The transport dropped (error or clean close from the hub side).
    ///
    /// Clears the peer set, emitting a [`RelayAction::PeerLost`] per known
    /// peer, and says whether to retry. `None` means give up: the attempt
    /// budget is spent and the relay stays [`LinkState::Lost`].
    pub fn transport_closed(&mut self) -> (Vec<RelayAction>, Option<Reconnect>) {
        self.state = LinkState::Lost;

        let actions = std::mem::take(&mut self.peers)
            .into_iter()
            .map(RelayAction::PeerLost)
            .collect();

        (actions, self.next_reconnect())
    }

    /// A dial attempt failed before the transport came up.
    pub fn connect_failed(&mut self) -> Option<Reconnect> {
        self.state = LinkState::Lost;
        self.next_reconnect()
    }

    fn next_reconnect(&mut self) -> Option<Reconnect> {
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            return None;
        }
        self.reconnect_attempts += 1;
        Some(Reconnect { delay: self.config.reconnect_delay, attempt: self.reconnect_attempts })
    }

    /// Originate a message envelope from this node.
    ///
    /// The envelope must already carry its origin hop. Persistence and local
    /// delivery actions are always produced; the hub write is produced only
    /// while registered (`emitted` reports which happened).
    pub fn originate_message(
        &mut self,
        env: MessageEnvelope,
    ) -> Result<OriginateOutcome, RelayError> {
        env.validate()?;
        self.dedupe.mark(env.msg_id, EnvelopeKind::Message);

        let mut actions = vec![
            RelayAction::PersistMessage(env.clone()),
            RelayAction::DeliverMessage(env.clone()),
        ];

        let emitted = self.state == LinkState::Registered;
        if emitted {
            actions.push(RelayAction::SendFrame(
                MeshPayload::Message(env).into_peer_frame()?,
            ));
        }

        Ok(OriginateOutcome { actions, emitted })
    }

    /// Originate a key envelope from this node.
    pub fn originate_key(&mut self, key: KeyEnvelope) -> Result<OriginateOutcome, RelayError> {
        key.validate()?;
        self.dedupe.mark(key.msg_id, EnvelopeKind::Key);

        let mut actions =
            vec![RelayAction::PersistKey(key.clone()), RelayAction::DeliverKey(key.clone())];

        let emitted = self.state == LinkState::Registered;
        if emitted {
            actions.push(RelayAction::SendFrame(MeshPayload::Key(key).into_peer_frame()?));
        }

        Ok(OriginateOutcome { actions, emitted })
    }

    /// Process one inbound hub frame.
    ///
    /// Duplicate envelopes yield an empty action list (silent drop).
    /// Malformed envelopes return the protocol error; the runtime logs and
    /// drops the frame, the link stays up.
    pub fn handle_frame(
        &mut self,
        frame: HubFrame,
        now: DateTime<Utc>,
    ) -> Result<Vec<RelayAction>, RelayError> {
        match frame {
            HubFrame::PeerList { peers } => Ok(self.replace_peers(peers)),

            HubFrame::PeerConnected { peer_id } => {
                if self.peers.insert(peer_id.clone()) {
                    Ok(vec![RelayAction::PeerDiscovered(peer_id)])
                } else {
                    Ok(vec![])
                }
            },

            HubFrame::PeerDisconnected { peer_id } => {
                if self.peers.remove(&peer_id) {
                    Ok(vec![RelayAction::PeerLost(peer_id)])
                } else {
                    Ok(vec![])
                }
            },

            HubFrame::MeshMessage { envelope, envelope_type, .. } => {
                match MeshPayload::from_value(envelope, envelope_type)? {
                    MeshPayload::Message(env) => self.handle_message(env, now),
                    MeshPayload::Key(key) => self.handle_key(key),
                }
            },
        }
    }

    fn replace_peers(&mut self, peers: Vec<String>) -> Vec<RelayAction> {
        let next: BTreeSet<String> = peers.into_iter().collect();
        let mut actions = Vec::new();

        for gone in self.peers.difference(&next) {
            actions.push(RelayAction::PeerLost(gone.clone()));
        }
        for found in next.difference(&self.peers) {
            actions.push(RelayAction::PeerDiscovered(found.clone()));
        }

        self.peers = next;
        actions
    }

    fn handle_message(
        &mut self,
        env: MessageEnvelope,
        now: DateTime<Utc>,
    ) -> Result<Vec<RelayAction>, RelayError> {
        env.validate()?;

        if self.dedupe.seen(env.msg_id, EnvelopeKind::Message) {
            return Ok(vec![]);
        }
        self.dedupe.mark(env.msg_id, EnvelopeKind::Message);

        let mut actions = vec![
            RelayAction::PersistMessage(env.clone()),
            RelayAction::DeliverMessage(env.clone()),
        ];

        // Forward only while the decremented budget is still positive: a copy
        // that would arrive with ttl 0 is dead on arrival everywhere.
        if env.ttl > 1 && self.state == LinkState::Registered {
            let forwarded = env.with_hop(self.node_id.to_string(), now)?;
            actions.push(RelayAction::SendFrame(
                MeshPayload::Message(forwarded).into_peer_frame()?,
            ));
        }

        Ok(actions)
    }

    fn handle_key(&mut self, key: KeyEnvelope) -> Result<Vec<RelayAction>, RelayError> {
        key.validate()?;

        if self.dedupe.seen(key.msg_id, EnvelopeKind::Key) {
            return Ok(vec![]);
        }
        self.dedupe.mark(key.msg_id, EnvelopeKind::Key);

        // Key envelopes are fanned out once by the origin's hub and never
        // relayed onward.
        Ok(vec![RelayAction::PersistKey(key.clone()), RelayAction::DeliverKey(key)])
    }
}
