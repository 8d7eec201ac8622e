//! Environment abstraction for time and randomness.
//!
//! Protocol code never reads the clock or a random number generator directly.
//! Production uses [`SystemEnv`]; simulations supply a seeded implementation
//! running on virtual time so every run is reproducible.

use std::{future::Future, time::Duration};

use rand::RngCore;

/// Source of time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> std::time::Instant;

    /// Suspend the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Uniform random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    /// Uniform random value in `[0, 1)`.
    ///
    /// Built from the top 53 bits of [`Self::random_u64`], which is exactly
    /// the precision of an `f64` mantissa.
    fn random_unit(&self) -> f64 {
        (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Real time and OS-seeded randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
