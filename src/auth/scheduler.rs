//! Background timer that renews tokens before they expire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::coordinator::RefreshCoordinator;
use super::store::{last_refresh_time, CredentialStore};
use crate::config::SessionConfig;

/// When the next proactive refresh fires and the delay that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub next_fire_at: DateTime<Utc>,
    pub interval: Duration,
}

#[derive(Default)]
struct TimerSlot {
    cancel: Option<CancellationToken>,
    generation: u64,
    schedule: Option<ScheduleState>,
    fires: u64,
}

struct Shared {
    coordinator: RefreshCoordinator,
    store: Arc<dyn CredentialStore>,
    refresh_interval: Duration,
    retry_interval: Duration,
    min_interval: Duration,
    slot: Mutex<TimerSlot>,
}

/// Periodically invokes [`RefreshCoordinator::refresh`] while started.
///
/// At most one timer is armed at any moment. Success re-arms after the long
/// `refresh_interval`, failure after the short `retry_interval`; failures
/// never stop the schedule.
#[derive(Clone)]
pub struct ProactiveRefreshScheduler {
    shared: Arc<Shared>,
}

impl ProactiveRefreshScheduler {
    pub fn new(
        coordinator: RefreshCoordinator,
        store: Arc<dyn CredentialStore>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                coordinator,
                store,
                refresh_interval: config.refresh_interval,
                retry_interval: config.retry_interval,
                min_interval: config.min_interval,
                slot: Mutex::new(TimerSlot::default()),
            }),
        }
    }

    /// Arm the timer, replacing any timer already armed.
    ///
    /// The first delay is the refresh interval minus the time since the last
    /// successful refresh, floored at the minimum interval.
    pub async fn start(&self) {
        let last = last_refresh_time(self.shared.store.as_ref()).await;
        let delay = self.shared.initial_delay(last, Utc::now());
        self.arm(delay);
    }

    fn arm(&self, delay: Duration) {
        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = self.shared.lock_slot();
            if let Some(previous) = slot.cancel.take() {
                previous.cancel();
            }
            slot.generation += 1;
            slot.cancel = Some(cancel.clone());
            slot.schedule = Some(ScheduleState::after(delay));
            slot.generation
        };
        tracing::info!(delay_secs = delay.as_secs(), "Proactive refresh scheduled");
        tokio::spawn(Arc::clone(&self.shared).run(cancel, generation, delay));
    }

    /// Cancel the pending timer. A refresh already in flight still completes.
    /// Calling this when not started is a no-op.
    pub fn stop(&self) {
        let mut slot = self.shared.lock_slot();
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
            tracing::info!("Proactive refresh stopped");
        }
        slot.schedule = None;
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_slot().cancel.is_some()
    }

    pub fn schedule_state(&self) -> Option<ScheduleState> {
        self.shared.lock_slot().schedule
    }

    /// Number of timer fires since construction.
    pub fn fire_count(&self) -> u64 {
        self.shared.lock_slot().fires
    }
}

impl ScheduleState {
    fn after(interval: Duration) -> Self {
        let offset = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            next_fire_at: Utc::now() + offset,
            interval,
        }
    }
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, TimerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initial_delay(&self, last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(last_refresh) = last_refresh else {
            return self.min_interval;
        };
        let elapsed = (now - last_refresh).to_std().unwrap_or(Duration::ZERO);
        self.refresh_interval
            .saturating_sub(elapsed)
            .max(self.min_interval)
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, generation: u64, mut delay: Duration) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            self.lock_slot().fires += 1;

            delay = match self.coordinator.refresh().await {
                Ok(_) => self.refresh_interval,
                Err(err) => {
                    tracing::warn!(error = %err, retry_secs = self.retry_interval.as_secs(), "Proactive refresh failed");
                    self.retry_interval
                }
            }
            .max(self.min_interval);

            let mut slot = self.lock_slot();
            if cancel.is_cancelled() || slot.generation != generation {
                return;
            }
            slot.schedule = Some(ScheduleState::after(delay));
            tracing::debug!(delay_secs = delay.as_secs(), "Proactive refresh rescheduled");
        }
    }
}
