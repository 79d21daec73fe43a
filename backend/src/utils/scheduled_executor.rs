//! Scheduled Executor
//!
//! Minimal framework for periodic background tasks. A task implements
//! `ScheduledTask`; the executor drives it on a fixed interval until the
//! task asks to terminate.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info};

/// A unit of periodic work
pub trait ScheduledTask: Send + Sync + 'static {
    /// Execute one round of the task
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;

    /// Checked before every round; true stops the executor
    fn should_terminate(&self) -> bool;
}

/// Drives a `ScheduledTask` on a fixed interval
pub struct ScheduledExecutor {
    name: String,
    interval: Duration,
}

impl ScheduledExecutor {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self { name: name.into(), interval }
    }

    /// Run the task loop until `should_terminate` returns true.
    ///
    /// The first round runs one full interval after start; a failing round
    /// is logged and does not stop the loop.
    pub async fn start<T: ScheduledTask>(self, task: T) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; consume the first tick
        ticker.tick().await;

        info!("Scheduled task '{}' started (interval: {:?})", self.name, self.interval);

        loop {
            ticker.tick().await;

            if task.should_terminate() {
                info!("Scheduled task '{}' terminating", self.name);
                break;
            }

            debug!("Scheduled task '{}' running", self.name);
            if let Err(e) = task.run().await {
                error!("Scheduled task '{}' failed: {:#}", self.name, e);
            }
        }
    }
}
