//! Bounded memory of recently seen envelope identifiers.
//!
//! Keyed on `(MsgId, EnvelopeKind)` rather than the bare id: an e2e message
//! and its companion key envelope share one `msgId`, and an admin that
//! receives the key first must not drop the message that follows. FIFO
//! eviction keeps the store at a fixed cap.

use std::collections::{HashSet, VecDeque};

use lantern_proto::{EnvelopeKind, MsgId};

/// Maximum number of sightings remembered before eviction.
pub const DEDUPE_CAPACITY: usize = 1_000;

/// FIFO-bounded set of envelope sightings.
#[derive(Debug, Clone)]
pub struct DedupeStore {
    seen: HashSet<(MsgId, EnvelopeKind)>,
    order: VecDeque<(MsgId, EnvelopeKind)>,
    capacity: usize,
}

impl Default for DedupeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupeStore {
    /// Create an empty store with the standard capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEDUPE_CAPACITY)
    }

    /// Create an empty store with a custom capacity (tests).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// True iff this sighting is already recorded.
    pub fn seen(&self, msg_id: MsgId, kind: EnvelopeKind) -> bool {
        self.seen.contains(&(msg_id, kind))
    }

    /// Record a sighting, evicting the oldest entry when full.
    ///
    /// Re-marking an existing sighting does not refresh its eviction slot.
    pub fn mark(&mut self, msg_id: MsgId, kind: EnvelopeKind) {
        if !self.seen.insert((msg_id, kind)) {
            return;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back((msg_id, kind));
    }

    /// Current number of recorded sightings.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Preload sightings in chronological order, e.g. from the log at
    /// startup. Oldest entries must come first so eviction order matches the
    /// original arrival order.
    pub fn preload(&mut self, sightings: impl IntoIterator<Item = (MsgId, EnvelopeKind)>) {
        for (msg_id, kind) in sightings {
            self.mark(msg_id, kind);
        }
    }
}
