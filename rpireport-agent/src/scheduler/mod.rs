//! Self-rescheduling cadences
//!
//! A cadence owns one [`SchedulerHandle`] at a time. When the deadline
//! passes, the firing runs to completion and only then is a new handle armed
//! `period` from now, so firings of one cadence never overlap and a slow
//! firing pushes the next one out. Independent cadences run on separate
//! tasks and may fire concurrently.

pub mod heartbeat;
pub mod report;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Lifecycle of a cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceState {
    Idle,
    Armed,
    Firing,
    Stopped,
}

/// Work performed on each firing of a cadence
#[async_trait]
pub trait Firing: Send + 'static {
    async fn fire(&mut self);
}

/// Pending firing: a deadline plus the cadence's cancellation flag
#[derive(Debug)]
pub struct SchedulerHandle {
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl SchedulerHandle {
    fn arm(after: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self {
            deadline: Instant::now() + after,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the deadline. `false` if the cadence was cancelled first.
    async fn expired(&mut self) -> bool {
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    /// Consumes this handle and arms its successor `period` from now
    fn rearm(self, period: Duration) -> Self {
        Self::arm(period, self.cancel)
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        let stop = *cancel.borrow_and_update();
        if stop {
            return;
        }
        // Sender gone means the cadence was dropped
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<CadenceState>,
    deadline: Mutex<Option<Instant>>,
    firings: AtomicU64,
}

/// One periodic schedule. Dropping it cancels the pending firing.
pub struct Cadence {
    name: &'static str,
    period: Duration,
    stop: watch::Sender<bool>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Cadence {
    pub fn new(name: &'static str, period: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            name,
            period,
            stop,
            shared: Arc::new(Shared {
                state: Mutex::new(CadenceState::Idle),
                deadline: Mutex::new(None),
                firings: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Fires inline on the caller's task, without arming
    pub async fn fire_now<F: Firing>(&self, firing: &mut F) {
        *self.shared.state.lock() = CadenceState::Firing;
        firing.fire().await;
        self.shared.firings.fetch_add(1, Ordering::Relaxed);
    }

    /// Arms the first firing `period` from now and keeps re-arming until stopped
    pub fn arm<F: Firing>(&self, firing: F) {
        let handle = SchedulerHandle::arm(self.period, self.stop.subscribe());
        debug!("- started {} timer - every {:?}", self.name, self.period);

        let task = tokio::spawn(run_cadence(
            self.name,
            self.period,
            self.shared.clone(),
            firing,
            handle,
        ));
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancels the pending firing; an in-progress firing completes first
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let task = self.task.lock().take();
        match task {
            Some(task) => {
                let _ = task.await;
            }
            None => {
                *self.shared.state.lock() = CadenceState::Stopped;
            }
        }
        debug!("- stopped {} timer", self.name);
    }

    pub fn state(&self) -> CadenceState {
        *self.shared.state.lock()
    }

    /// Completed firings, including inline ones
    pub fn firings(&self) -> u64 {
        self.shared.firings.load(Ordering::Relaxed)
    }

    /// Deadline of the armed firing, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        *self.shared.deadline.lock()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

async fn run_cadence<F: Firing>(
    name: &'static str,
    period: Duration,
    shared: Arc<Shared>,
    mut firing: F,
    mut handle: SchedulerHandle,
) {
    loop {
        *shared.deadline.lock() = Some(handle.deadline());
        *shared.state.lock() = CadenceState::Armed;

        if !handle.expired().await {
            break;
        }

        debug!("- {} timer fired -", name);
        *shared.deadline.lock() = None;
        *shared.state.lock() = CadenceState::Firing;
        firing.fire().await;
        shared.firings.fetch_add(1, Ordering::Relaxed);

        handle = handle.rearm(period);
    }

    *shared.deadline.lock() = None;
    *shared.state.lock() = CadenceState::Stopped;
}
