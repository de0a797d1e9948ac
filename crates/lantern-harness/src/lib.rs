//! Deterministic simulation harness for the lantern mesh.
//!
//! Runs real relay, join, and storage code over an in-process event queue
//! instead of sockets: hubs are membership sets, frames are queue entries,
//! and time is a virtual clock ticking one second per delivery. Everything a
//! production node does between the transport and the log happens here too,
//! so protocol properties proven in simulation hold for the wire.

#![forbid(unsafe_code)]

mod env;
mod sim;

pub use env::SimEnv;
pub use sim::{HubId, NodeIndex, SimMesh, SimNodeState};
