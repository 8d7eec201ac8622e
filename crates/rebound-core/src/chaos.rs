//! Fault injection for exercising client recovery paths.
//!
//! The injector only makes decisions; the server runtime owns the timers and
//! applies the outcome. All draws go through [`Environment`], so seeded
//! simulations replay the same faults.
//!
//! - **Disconnects**: every `disconnect_interval`, with probability
//!   `random_disconnect_probability`, a `chaos` frame is sent and the
//!   connection is force-closed.
//! - **Latency**: every inbound message first waits a uniform delay in
//!   `[0, max_latency]`.
//! - **Errors**: after the delay, with probability `error_probability`, the
//!   message is failed without decoding.

use std::time::Duration;

use crate::{env::Environment, error::ChaosConfigError};

/// Chaos parameters. Immutable once a server is started.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Master switch; nothing is injected while false
    pub enabled: bool,
    /// Chance per timer period that the connection is force-closed
    pub random_disconnect_probability: f64,
    /// Chance per inbound message that it fails with a simulated fault
    pub error_probability: f64,
    /// Upper bound of the per-message delay
    pub max_latency: Duration,
    /// Period of the disconnect timer
    pub disconnect_interval: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            random_disconnect_probability: 0.1,
            error_probability: 0.1,
            max_latency: Duration::from_millis(2000),
            disconnect_interval: Duration::from_secs(5),
        }
    }
}

impl ChaosConfig {
    /// Default parameters with injection switched on.
    pub fn enabled() -> Self {
        Self { enabled: true, ..Self::default() }
    }

    /// Check probabilities and the timer period.
    pub fn validate(&self) -> Result<(), ChaosConfigError> {
        for (name, value) in [
            ("random_disconnect_probability", self.random_disconnect_probability),
            ("error_probability", self.error_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ChaosConfigError::ProbabilityOutOfRange { name, value });
            }
        }

        if self.disconnect_interval.is_zero() {
            return Err(ChaosConfigError::ZeroInterval);
        }

        Ok(())
    }
}

/// What to do with an inbound message after the chaos delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosVerdict {
    /// Process normally
    Deliver,
    /// Answer with a simulated failure, do not decode
    Fail,
}

/// Validated chaos parameters plus the decisions derived from them.
#[derive(Debug, Clone)]
pub struct ChaosInjector {
    config: ChaosConfig,
}

impl ChaosInjector {
    /// Validate `config` and build an injector.
    pub fn new(config: ChaosConfig) -> Result<Self, ChaosConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Injector that never interferes.
    pub fn disabled() -> Self {
        Self { config: ChaosConfig::default() }
    }

    /// Active parameters.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Whether injection is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Period of the disconnect timer, `None` when disabled.
    pub fn disconnect_interval(&self) -> Option<Duration> {
        self.config.enabled.then_some(self.config.disconnect_interval)
    }

    /// Delay to apply before handling a message, `None` when disabled.
    pub fn latency(&self, env: &impl Environment) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        Some(self.config.max_latency.mul_f64(env.random_unit()))
    }

    /// Draw whether the next message fails.
    pub fn should_fail(&self, env: &impl Environment) -> bool {
        self.config.enabled && env.random_unit() < self.config.error_probability
    }

    /// Draw whether a disconnect timer tick closes the connection.
    pub fn should_disconnect(&self, env: &impl Environment) -> bool {
        self.config.enabled && env.random_unit() < self.config.random_disconnect_probability
    }

    /// Wait out the chaos delay for one message, then decide its fate.
    ///
    /// Suspends only the calling task.
    pub async fn screen_message<E: Environment>(&self, env: &E) -> ChaosVerdict {
        if let Some(delay) = self.latency(env) {
            env.sleep(delay).await;
        }

        if self.should_fail(env) { ChaosVerdict::Fail } else { ChaosVerdict::Deliver }
    }
}
