//! Worker control contract shared by the classifier and LLM workers.
//!
//! Every long-lived worker is runnable, pausable and stoppable, and latches
//! itself to stopped after too many consecutive failures. A latched worker
//! requires a manual restart.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Consecutive failures after which a worker latches itself to stopped.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Paused,
    Stopped { reason: Option<String> },
}

/// Shared handle controlling one worker loop.
pub struct WorkerHandle {
    name: &'static str,
    state: RwLock<WorkerState>,
    consecutive_failures: AtomicU32,
    notify: Notify,
}

impl WorkerHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(WorkerState::Running),
            consecutive_failures: AtomicU32::new(0),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state.read().expect("worker state lock").clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), WorkerState::Running)
    }

    /// Start or restart the worker; clears a stopped-due-to-errors latch.
    pub fn start(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.set_state(WorkerState::Running);
        info!("Worker '{}' started", self.name);
    }

    pub fn stop(&self, reason: Option<String>) {
        self.set_state(WorkerState::Stopped { reason });
        info!("Worker '{}' stopped", self.name);
    }

    pub fn pause(&self) {
        self.set_state(WorkerState::Paused);
        info!("Worker '{}' paused", self.name);
    }

    pub fn resume(&self) {
        self.set_state(WorkerState::Running);
        info!("Worker '{}' resumed", self.name);
    }

    /// Block until the state is Running. Paused and stopped workers park
    /// here; a latched worker stays parked until a manual `start`.
    pub async fn wait_until_runnable(&self) {
        loop {
            if self.is_running() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Resolve when the worker leaves the Running state. Raced against an
    /// in-flight call to cancel it on pause/stop.
    pub async fn interrupted(&self) {
        loop {
            if !self.is_running() {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Count a failure; after [`MAX_CONSECUTIVE_FAILURES`] in a row the
    /// worker latches to stopped.
    pub fn record_failure(&self, context: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("Worker '{}' failure {}/{}: {}", self.name, failures, MAX_CONSECUTIVE_FAILURES, context);

        if failures >= MAX_CONSECUTIVE_FAILURES {
            let reason =
                format!("stopped after {} consecutive failures; last: {}", failures, context);
            error!("Worker '{}' {}", self.name, reason);
            self.set_state(WorkerState::Stopped { reason: Some(reason) });
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write().expect("worker state lock") = state;
        self.notify.notify_waiters();
    }
}
