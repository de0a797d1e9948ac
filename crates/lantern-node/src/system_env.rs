//! Production environment: system clock and OS RNG.

use std::time::Duration;

use chrono::{DateTime, Utc};
use lantern_core::Environment;

/// Production [`Environment`] backed by the system clock, getrandom, and
/// tokio timers.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A node without working
/// cryptographic randomness cannot mint identifiers or session keys, so
/// continuing would be worse than stopping.
#[derive(Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn random_u128_is_nonzero() {
        // 2^-128 false-failure probability is acceptable.
        assert_ne!(SystemEnv::new().random_u128(), 0);
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();
        let before = env.now();
        env.sleep(Duration::from_millis(20)).await;
        assert!(env.now() - before >= chrono::Duration::milliseconds(20));
    }
}
