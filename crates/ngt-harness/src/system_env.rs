//! Environment backed by the real clock and the operating system RNG.

use std::time::Duration;

use ngt_core::Environment;
use rand::{RngCore, rngs::OsRng};

/// Production environment for drivers running over [`UdpTransport`].
///
/// Initial sequence numbers come from the OS, so two runs never pick the
/// same one on purpose.
///
/// [`UdpTransport`]: crate::UdpTransport
///
/// # Panics
///
/// `now()` and `sleep()` panic outside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}
