//! Environment abstraction for deterministic testing.
//!
//! Decouples the state machines from system resources (wall clock, entropy,
//! timers). The production runtime implements this with real time and OS
//! randomness; the simulation harness implements it with a virtual clock and
//! a seeded RNG so every run is reproducible.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstract environment providing time and randomness.
///
/// Implementations must guarantee that `now()` never goes backwards within a
/// single execution context and that `random_bytes()` draws from a
/// cryptographically secure source in production.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time, UTC. Envelope timestamps and hop records use
    /// this directly.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration. The only async method in the trait;
    /// used by runtime code (reconnect delays, gateway settle), never by
    /// state machines.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random 128-bit value, for node and message identifiers.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}
