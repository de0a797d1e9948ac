//! Core state machines for a lantern mesh node.
//!
//! Everything in this crate follows the action pattern: state machines take
//! events (plus the current time where needed) and return lists of actions
//! for a runtime to execute. No I/O happens here, which keeps the protocol
//! logic deterministic and directly testable — the simulation harness drives
//! these types over channels, the production runtime drives them over
//! WebSockets, and both exercise identical code.
//!
//! # Components
//!
//! - [`Environment`]: clock + RNG abstraction, implemented by the runtime
//! - [`DedupeStore`]: bounded memory of recently seen envelope identifiers
//! - [`Relay`]: the per-node receive/dedupe/deliver/forward state machine
//! - [`AdminJoin`]: correlates message and key paths on admin nodes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dedupe;
pub mod env;
mod error;
mod join;
mod relay;

pub use dedupe::{DedupeStore, DEDUPE_CAPACITY};
pub use env::Environment;
pub use error::{JoinError, RelayError};
pub use join::AdminJoin;
pub use relay::{
    LinkState, OriginateOutcome, Reconnect, Relay, RelayAction, RelayConfig,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
