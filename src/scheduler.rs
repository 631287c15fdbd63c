//! Daily re-evaluation timer.
//!
//! Due dates do not change when the calendar rolls over, but which bucket a
//! task falls into does. [`RefreshScheduler`] fires once at the next local
//! midnight after it is created and every 24 hours after that, invoking the
//! registered callbacks. It never touches task data, and it has no opinion on
//! threads: a callback that must run elsewhere forwards the tick itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Source of the local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Reads the system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().expect("clock lock poisoned") = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().expect("clock lock poisoned")
    }
}

/// Lifecycle of a [`RefreshScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Scheduled { next_fire_at: NaiveDateTime },
    Fired { at: NaiveDateTime },
    Cancelled,
}

/// Passed to every callback on each firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshTick {
    /// Wall-clock moment this firing was scheduled for.
    pub fired_at: NaiveDateTime,
    /// 1 for the first firing.
    pub sequence: u64,
}

pub type RefreshCallback = Arc<dyn Fn(&RefreshTick) -> anyhow::Result<()> + Send + Sync>;

/// Start of the calendar day after `now`.
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let date = now.date();
    date.succ_opt().unwrap_or(date).and_time(chrono::NaiveTime::MIN)
}

struct Shared {
    state: Mutex<SchedulerState>,
    callbacks: Mutex<Vec<RefreshCallback>>,
}

impl Shared {
    fn set_state(&self, next: SchedulerState) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        if *state != SchedulerState::Cancelled {
            *state = next;
        }
    }

    /// Runs every callback; a failing or panicking callback does not stop the
    /// others or later firings.
    fn fire(&self, tick: &RefreshTick) {
        let callbacks: Vec<RefreshCallback> = self
            .callbacks
            .lock()
            .expect("scheduler lock poisoned")
            .clone();
        tracing::debug!(fired_at = %tick.fired_at, sequence = tick.sequence, "Refresh tick");
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(tick))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(fired_at = %tick.fired_at, "Refresh callback failed: {:#}", e)
                }
                Err(_) => {
                    tracing::error!(fired_at = %tick.fired_at, "Refresh callback panicked")
                }
            }
        }
    }
}

/// Fires at the next local midnight, then every 24 hours, until cancelled.
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    created_at: NaiveDateTime,
    created_instant: Instant,
    cancel: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// The schedule is anchored to `clock`'s time at creation.
    pub fn new(clock: &dyn Clock) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::Idle),
                callbacks: Mutex::new(Vec::new()),
            }),
            created_at: clock.now(),
            created_instant: Instant::now(),
            cancel,
            handle: Mutex::new(None),
        }
    }

    pub fn on_fire(&self, callback: RefreshCallback) {
        self.shared
            .callbacks
            .lock()
            .expect("scheduler lock poisoned")
            .push(callback);
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock().expect("scheduler lock poisoned")
    }

    /// Spawns the timer on the current tokio runtime. Calling it again, or
    /// after cancellation, does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock().expect("scheduler lock poisoned");
        if handle.is_some() || self.state() != SchedulerState::Idle {
            return;
        }
        let first = next_midnight(self.created_at);
        self.shared.set_state(SchedulerState::Scheduled { next_fire_at: first });
        tracing::info!(first_fire_at = %first, "Refresh scheduler started");
        *handle = Some(tokio::spawn(run(
            self.shared.clone(),
            first,
            self.created_at,
            self.created_instant,
            self.cancel.subscribe(),
        )));
    }

    /// Prevents further firings. A firing already running completes.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
        self.shared.set_state(SchedulerState::Cancelled);
    }

    /// Cancels and waits for the timer task to finish.
    pub async fn shutdown(&self) {
        self.cancel();
        let handle = self.handle.lock().expect("scheduler lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Refresh scheduler task ended abnormally: {}", e);
            }
        }
        tracing::info!("Refresh scheduler stopped");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

async fn run(
    shared: Arc<Shared>,
    first: NaiveDateTime,
    anchor: NaiveDateTime,
    anchor_instant: Instant,
    mut cancel: watch::Receiver<bool>,
) {
    let mut next = first;
    let mut sequence = 0;
    loop {
        if *cancel.borrow() {
            break;
        }
        shared.set_state(SchedulerState::Scheduled { next_fire_at: next });
        let deadline = anchor_instant + (next - anchor).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.changed() => break,
        }
        if *cancel.borrow() {
            break;
        }
        sequence += 1;
        shared.set_state(SchedulerState::Fired { at: next });
        shared.fire(&RefreshTick {
            fired_at: next,
            sequence,
        });
        next += TimeDelta::days(1);
    }
    shared.set_state(SchedulerState::Cancelled);
}
