use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pool::RefreshOutcome;
use super::{Reaper, ReaperError};

/// Tally of one refresh cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Sources found stale at the start of the cycle.
    pub stale: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub(crate) fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Updated => self.updated += 1,
            RefreshOutcome::Failed => self.failed += 1,
            RefreshOutcome::Skipped => self.skipped += 1,
        }
    }

    pub(crate) fn merge(&mut self, other: &CycleReport) {
        self.updated += other.updated;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl Reaper {
    /// Run one refresh cycle over every stale source and wait for it to finish.
    ///
    /// Cycles never overlap: a call made while another cycle is running waits
    /// for it, then re-selects whatever is still stale (usually nothing).
    pub async fn refresh_stale(self: &Arc<Self>) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        let now = Utc::now();

        let stale: Vec<_> = self
            .cache
            .all()
            .into_iter()
            .filter(|source| source.is_stale(now))
            .collect();
        tracing::debug!(
            cached = self.cache.len(),
            stale = stale.len(),
            "Starting refresh cycle"
        );

        let mut report = self.run_pool(stale).await;
        report.elapsed = started.elapsed();

        tracing::info!(
            stale = report.stale,
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Refresh cycle finished"
        );
        report
    }

    /// Spawn the periodic refresh loop.
    ///
    /// The loop seeds the cache from storage, then alternates between a
    /// refresh cycle and sleeping for the configured interval. Only one loop
    /// may ever be started per `Reaper`.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle, ReaperError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ReaperError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let reaper = Arc::clone(self);
        let task = tokio::spawn(async move { reaper.run(StopSignal(Some(stop_rx))).await });

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            workers = self.workers,
            "Refresh scheduler started"
        );
        Ok(SchedulerHandle { stop_tx, task })
    }

    async fn run(self: Arc<Self>, mut stop: StopSignal) {
        if let Err(e) = self.load().await {
            tracing::warn!(error = %e, "Could not load feeds from storage");
        }

        loop {
            if stop.is_stopped() {
                break;
            }
            self.refresh_stale().await;
            if stop.sleep(self.interval).await {
                break;
            }
        }
        tracing::info!("Refresh scheduler stopped");
    }
}

/// Stop requests for the refresh loop.
///
/// Holds `None` once the handle has been dropped without stopping; the loop
/// then keeps running for the rest of the process.
struct StopSignal(Option<watch::Receiver<bool>>);

impl StopSignal {
    fn is_stopped(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `period`, returning early with `true` if a stop is requested.
    async fn sleep(&mut self, period: Duration) -> bool {
        let deadline = sleep_deadline(tokio::time::Instant::now(), period);
        loop {
            let Some(rx) = self.0.as_mut() else {
                tokio::time::sleep_until(deadline).await;
                return false;
            };

            let changed = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                changed = rx.changed() => changed.is_ok(),
            };

            if !changed {
                tracing::debug!("Scheduler handle dropped, refresh loop detached");
                self.0 = None;
            } else if self.is_stopped() {
                return true;
            }
        }
    }
}

/// Longest single sleep (30 years); longer intervals are clamped to it.
const MAX_SLEEP: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + period`, clamped so huge intervals cannot overflow the clock.
fn sleep_deadline(now: tokio::time::Instant, period: Duration) -> tokio::time::Instant {
    now.checked_add(period.min(MAX_SLEEP))
        .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60))
}

/// Controls a running refresh loop.
///
/// Dropping the handle detaches the loop; call [`SchedulerHandle::stop`] to
/// end it.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to stop and wait for it to exit.
    ///
    /// A cycle already in progress runs to completion first; a sleeping loop
    /// wakes immediately.
    pub async fn stop(self) {
        // Err only if the loop already exited
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Refresh scheduler task failed");
        }
    }
}
