//! Fixed-interval REST polling while the socket is down

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Callback invoked on every poll tick
pub type PollFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Periodic refresh driver
///
/// Owns at most one polling task. The first tick fires one interval after
/// [`start`](Self::start); ticks missed while a refresh is still running are
/// delayed rather than bursted.
pub struct FallbackPoller {
    poll: PollFn,
    task: Option<JoinHandle<()>>,
    interval: Option<Duration>,
}

impl FallbackPoller {
    /// Create a stopped poller around a refresh callback
    pub fn new(poll: PollFn) -> Self {
        Self {
            poll,
            task: None,
            interval: None,
        }
    }

    /// Start polling every `every`
    ///
    /// Returns `false` if the poller was already active, in which case the
    /// running interval is kept.
    pub fn start(&mut self, every: Duration) -> bool {
        if self.is_active() {
            return false;
        }

        let poll = Arc::clone(&self.poll);
        let every = every.max(Duration::from_millis(1));
        self.interval = Some(every);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("Fallback poll tick");
                poll().await;
            }
        }));
        true
    }

    /// Stop polling
    ///
    /// Returns `false` if the poller was not active.
    pub fn stop(&mut self) -> bool {
        self.interval = None;
        match self.task.take() {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                was_running
            }
            None => false,
        }
    }

    /// Check if a polling task is running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Interval of the running task
    pub fn interval(&self) -> Option<Duration> {
        self.interval.filter(|_| self.is_active())
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPoller")
            .field("active", &self.is_active())
            .field("interval", &self.interval)
            .finish()
    }
}
