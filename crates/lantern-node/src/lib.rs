//! Production runtime for a lantern mesh node.
//!
//! This crate is the I/O glue around [`lantern_core`]'s state machines: a
//! WebSocket transport to the hub, a persistent store with memory and redb
//! backends, identity bootstrap, and the single-owner runtime task that
//! executes relay actions in order. Application code talks to a running node
//! through a cloneable [`NodeHandle`].
//!
//! # Architecture
//!
//! One tokio task owns the relay, the admin join, and the store handle.
//! Observer callbacks fire on that task, strictly after the corresponding
//! log write; they must not block. The transport is a pair of channels
//! bridged to the socket by background tasks, so a dead hub never wedges the
//! runtime — writes fail, locally-originated envelopes stay logged, and the
//! reconnect loop takes over.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod handlers;
mod identity;
mod node;
pub mod storage;
mod system_env;
mod transport;

pub use error::NodeError;
pub use handlers::{Handlers, PeerEvent};
pub use identity::NodeIdentity;
pub use node::{Node, NodeConfig, NodeHandle};
pub use storage::{MemoryStore, MeshExport, MeshStore, RedbStore, StoreError};
pub use system_env::SystemEnv;
pub use transport::{connect, ConnectedHub, TransportError};
