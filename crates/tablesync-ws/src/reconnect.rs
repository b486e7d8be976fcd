//! Reconnection backoff policy and the cancellable backoff wait

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// Exponential backoff between reconnection attempts
///
/// `next_delay(attempt) = base_delay * multiplier^attempt`, capped at
/// `max_delay`. `attempt` counts failed connection cycles since the last
/// successful open, starting at 0.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0); 0 keeps delays exact
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 1.5,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set growth factor; values below 1.0 are raised to 1.0
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before reconnecting after `attempt` consecutive failures
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        // powi overflows to inf for large attempts; min() keeps it capped
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Apply jitter to a base delay, never exceeding `max_delay`
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 {
            return base;
        }

        let jitter_range = base.as_millis() as f64 * self.jitter;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let adjusted_ms = (base.as_millis() as f64 + jitter).max(0.0) as u64;

        Duration::from_millis(adjusted_ms).min(self.max_delay)
    }

    /// Delay with jitter applied for a given attempt
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.next_delay(attempt))
    }
}

/// The single pending backoff wait of a coordinator
///
/// Arming replaces any previous wait, so there is never more than one live
/// timer.
#[derive(Debug, Default)]
pub struct BackoffTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl BackoffTimer {
    /// Create a disarmed timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting `delay`, replacing any pending wait
    pub fn arm(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(sleep(delay)));
    }

    /// Drop the pending wait
    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    /// Check if a wait is pending
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve once the pending wait elapses
    ///
    /// Never resolves while disarmed. Cancel-safe: dropping the future keeps
    /// the wait armed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}
