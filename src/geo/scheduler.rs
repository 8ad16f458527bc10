use crate::geo::{DatabaseSlot, Decoder, Refresher};

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// Longer periods are as good as never and would overflow the timer
const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

enum State {
    Idle,
    Running {
        token: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopping,
    Stopped,
}

/// Runs a job on a fixed period in a background task.
///
/// A cycle that overruns the period delays the next one, missed ticks are not queued and cycles
/// never overlap. Stopping waits for the cycle in flight.
pub struct Scheduler {
    state: Mutex<State>,
    stopping: tokio::sync::Mutex<()>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
            stopping: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SchedulerState {
        match *self.lock() {
            State::Idle => SchedulerState::Idle,
            State::Running { .. } => SchedulerState::Running,
            State::Stopping => SchedulerState::Stopping,
            State::Stopped => SchedulerState::Stopped,
        }
    }

    /// Returns false if the scheduler has already been started or stopped
    pub fn start<F, Fut>(&self, interval: Duration, cycle: F) -> bool
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if !matches!(*state, State::Idle) {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(interval, token.clone(), cycle));
        *state = State::Running { token, handle };
        true
    }

    /// Cancels the loop and waits for the cycle in flight, if any
    pub async fn stop(&self) {
        let _stopping = self.stopping.lock().await;
        let running = match std::mem::replace(&mut *self.lock(), State::Stopping) {
            State::Running { token, handle } => Some((token, handle)),
            State::Idle | State::Stopping | State::Stopped => None,
        };
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(error) = handle.await {
                log::error!("database update task failed: {error}");
            }
        }
        *self.lock() = State::Stopped;
    }
}

fn first_tick(now: Instant, interval: Duration) -> (Instant, Duration) {
    let interval = interval.min(MAX_INTERVAL);
    let start = now
        .checked_add(interval)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now);
    (start, interval)
}

async fn run<F, Fut>(interval: Duration, token: CancellationToken, mut cycle: F)
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = ()>,
{
    let (start, interval) = first_tick(Instant::now(), interval);
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        cycle(token.clone()).await;
    }
}

/// One refresh cycle: download and swap every slot in turn. A failing slot keeps serving its
/// previous version and does not prevent the others from being refreshed.
///
/// Returns the number of slots refreshed.
pub async fn refresh_all<D: Decoder>(
    refresher: &Refresher,
    slots: &[Arc<DatabaseSlot<D>>],
    token: &CancellationToken,
) -> usize {
    log::info!("starting scheduled database update");
    let mut refreshed = 0;
    for slot in slots {
        if token.is_cancelled() {
            log::info!("scheduled database update cancelled");
            return refreshed;
        }
        match refresher.refresh(slot).await {
            Ok(()) => refreshed += 1,
            Err(error) => log::warn!(
                "{} database update failed, serving previous version: {error}",
                slot.kind()
            ),
        }
    }
    log::info!(
        "database update completed, {refreshed} of {} refreshed",
        slots.len()
    );
    refreshed
}
