use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::errors::CycleError;
use crate::utils::diff::diff_grades;
use crate::utils::notify::{Audience, Notifier};
use crate::utils::qis::GradeFetcher;
use crate::utils::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Changes,
    NoChanges,
    /// The cycle aborted; details went to the operator channel.
    Failed,
    /// Another cycle was already in flight.
    Skipped,
}

#[derive(Debug, Default)]
struct SchedulerState {
    timer: Option<JoinHandle<()>>,
}

impl SchedulerState {
    fn arm(&mut self, timer: JoinHandle<()>) {
        self.cancel();
        self.timer = Some(timer);
    }

    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

/// Drives fetch, diff, notify and persist on a fixed interval.
pub struct Poller {
    fetcher: Arc<dyn GradeFetcher>,
    store: SnapshotStore,
    notifier: Notifier,
    interval: Duration,
    cycle_guard: tokio::sync::Mutex<()>,
    state: Mutex<SchedulerState>,
}

impl Poller {
    pub fn new(
        fetcher: Arc<dyn GradeFetcher>,
        store: SnapshotStore,
        notifier: Notifier,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            store,
            notifier,
            interval,
            cycle_guard: tokio::sync::Mutex::new(()),
            state: Mutex::new(SchedulerState::default()),
        })
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one cycle. Never fails; errors are logged and reported to the owner.
    ///
    /// A call made while another cycle is running returns `Skipped` at once.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            info!("Grade check already running, skipping");
            return CycleOutcome::Skipped;
        };

        match self.check_grades().await {
            Ok(true) => CycleOutcome::Changes,
            Ok(false) => CycleOutcome::NoChanges,
            Err(e) => {
                error!("Grade check failed: {}", e);
                self.notifier.report(&format!("Error: {e} ({e:?})")).await;
                CycleOutcome::Failed
            }
        }
    }

    async fn check_grades(&self) -> Result<bool, CycleError> {
        let current = self.fetcher.fetch_current_grades().await?;
        let previous = self.store.load()?;

        let events = diff_grades(previous.as_deref(), &current);
        info!("changedGrades: {}", events.len());

        let report = self.notifier.dispatch(&events).await;
        if report.failures() > 0 {
            warn!("{} of {} notifications failed", report.failures(), report.outcomes.len());
            for audience in [Audience::Broadcast, Audience::Owner] {
                let failed = report.failed(audience);
                if !failed.is_empty() {
                    warn!("Undelivered {:?} notifications: {:?}", audience, failed);
                }
            }
        }

        // Sent notifications stand even if this fails; the next cycle re-diffs
        // against the stale snapshot.
        if let Err(e) = self.store.save(&current) {
            error!("Failed to persist grades: {}", e);
            self.notifier.report(&format!("Error: {e} ({e:?})")).await;
        }

        Ok(report.had_changes)
    }

    /// Arms the recurring check, replacing any timer that is already armed.
    ///
    /// Replacing the timer never interrupts a cycle that is already running.
    pub fn schedule_recurring(self: &Arc<Self>, interval: Duration) {
        let poller = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(poller) = poller.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    poller.run_cycle().await;
                });
            }
        });

        self.state().arm(timer);
        info!("Interval started ({} s)", interval.as_secs());
    }

    /// Manual check: runs a cycle now, then restarts the countdown.
    pub async fn trigger(self: &Arc<Self>) -> CycleOutcome {
        let outcome = self.run_cycle().await;
        self.schedule_recurring(self.interval);
        outcome
    }

    /// Initial check followed by the recurring schedule.
    pub fn start(self: &Arc<Self>) {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            poller.run_cycle().await;
        });
        self.schedule_recurring(self.interval);
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.state().is_armed()
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.state().cancel();
    }
}
