//! Fixed-interval sync scheduler.
//!
//! The interval comes from a `watch` channel fed by the config observer on
//! `sync.interval_minutes`, so a change takes effect without a restart: the
//! ticker is rebuilt and the next run happens one full new interval later.
//! An interval of 0, or one too long for the clock to represent, parks the
//! scheduler until the value changes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::driver::{SyncDriver, SyncOutcome};
use crate::error::{SyncError, SyncResult};

/// Background task running scheduled sync cycles.
pub struct SyncScheduler {
    driver: Arc<SyncDriver>,
    interval_rx: watch::Receiver<u64>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the scheduler.
#[derive(Clone)]
pub struct SyncSchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncSchedulerHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("scheduler already stopped".into()))
    }
}

impl SyncScheduler {
    /// Creates a scheduler reading its interval (minutes) from `interval_rx`.
    pub fn new(
        driver: Arc<SyncDriver>,
        interval_rx: watch::Receiver<u64>,
    ) -> (Self, SyncSchedulerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = SyncScheduler {
            driver,
            interval_rx,
            shutdown_rx,
        };

        (scheduler, SyncSchedulerHandle { shutdown_tx })
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Sync scheduler starting");
        self.schedule().await;
        info!("Sync scheduler stopped");
    }

    async fn schedule(&mut self) {
        loop {
            let minutes = *self.interval_rx.borrow_and_update();
            let period = Duration::from_secs(minutes.saturating_mul(60));
            let start = Instant::now().checked_add(period);

            let start = match start.filter(|_| minutes > 0) {
                Some(start) => start,
                None => {
                    if minutes == 0 {
                        info!("Sync interval is 0, scheduled runs paused");
                    } else {
                        warn!(minutes, "Sync interval out of range, scheduled runs paused");
                    }
                    tokio::select! {
                        changed = self.interval_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = self.shutdown_rx.recv() => return,
                    }
                    continue;
                }
            };

            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(minutes, "Sync interval set");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.driver.run_exclusive().await {
                            Ok(SyncOutcome::Completed(report)) => {
                                debug!(run_id = %report.run_id, "Scheduled sync done");
                            }
                            Ok(SyncOutcome::Skipped(reason)) => {
                                debug!(?reason, "Scheduled sync skipped");
                            }
                            Err(e) => error!(error = %e, "Scheduled sync failed"),
                        }
                    }
                    changed = self.interval_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        info!("Sync interval changed, rescheduling");
                        break;
                    }
                    _ = self.shutdown_rx.recv() => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn list_calls(fx: &Fixture) -> usize {
        fx.directory.state.lock().unwrap().list_calls
    }

    /// Lets spawned tasks run without moving the paused clock far.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Moves the paused clock one second at a time so every tick is seen.
    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    async fn start(fx: &Fixture, minutes: u64) -> (watch::Sender<u64>, SyncSchedulerHandle) {
        // Directory failures keep cycles away from the database
        fx.directory.state.lock().unwrap().unavailable = true;

        let driver = Arc::new(SyncDriver::new(
            fx.config.clone(),
            fx.directory.clone(),
            fx.remote.clone(),
            fx.accounts.clone(),
            fx.ready.clone(),
        ));
        let (tx, rx) = watch::channel(minutes);
        let (scheduler, handle) = SyncScheduler::new(driver, rx);

        tokio::time::pause();
        tokio::spawn(scheduler.run());
        settle().await;

        (tx, handle)
    }

    #[tokio::test]
    async fn test_runs_once_per_interval() {
        let fx = Fixture::new().await;
        let (_tx, handle) = start(&fx, 1).await;

        advance_secs(30).await;
        assert_eq!(list_calls(&fx), 0);

        advance_secs(31).await;
        assert_eq!(list_calls(&fx), 1);

        // Delay measures the next period from when the tick was seen
        advance_secs(62).await;
        assert!(list_calls(&fx) >= 2);
        assert!(list_calls(&fx) <= 3);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_change_reschedules() {
        let fx = Fixture::new().await;
        let (tx, handle) = start(&fx, 60).await;

        tx.send(1).unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(list_calls(&fx), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_pauses() {
        let fx = Fixture::new().await;
        let (tx, handle) = start(&fx, 0).await;

        tokio::time::advance(Duration::from_secs(6 * 3600)).await;
        settle().await;
        assert_eq!(list_calls(&fx), 0);

        tx.send(1).unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(list_calls(&fx), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_interval_parks_instead_of_dying() {
        let fx = Fixture::new().await;
        let (tx, handle) = start(&fx, 1).await;

        tx.send(u64::MAX).unwrap();
        settle().await;
        advance_secs(120).await;
        assert_eq!(list_calls(&fx), 0);

        tx.send(1).unwrap();
        settle().await;
        advance_secs(61).await;
        assert_eq!(list_calls(&fx), 1);

        handle.shutdown().await.unwrap();
    }
}
