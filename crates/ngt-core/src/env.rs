//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples drivers from system resources (time and
//! randomness). The protocol state machines in this crate never touch it:
//! they are driven purely by packets and local calls. Only the async drivers
//! that own a transport need a clock (for Open retransmission and idle
//! timeouts) and randomness (for the initial sequence number).
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Implementations
///
/// - Production (`ngt-harness::SystemEnv`): tokio clock and the OS RNG.
/// - Simulation (`ngt-harness::SimEnv`): Turmoil virtual time and a seeded
///   RNG, so every run can be replayed from its seed.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    ///
    /// Must support:
    /// - `Copy` - Lightweight to pass around
    /// - `Ord` - Can be compared (for timeout logic)
    /// - `Sub<Output = Duration>` - Can compute elapsed time
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time.
    ///
    /// Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Under simulation this advances virtual time without wall-clock delay.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u8`.
    ///
    /// Used to pick the initial sequence number of a connection.
    fn random_u8(&self) -> u8 {
        let mut byte = [0u8; 1];
        self.random_bytes(&mut byte);
        byte[0]
    }

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }
}
