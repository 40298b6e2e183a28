//! Periodic background synchronization.
//!
//! [`SyncScheduler`] runs [`SeriesRegistry::try_synchronize`] on a fixed
//! interval. Each cycle runs in its own task so the timer keeps ticking; a
//! tick that fires while the previous cycle is still running is skipped and
//! logged, never queued.
//!
//! Stopping is cooperative: [`SchedulerHandle::stop`] prevents new cycles
//! and waits for a running one to finish on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::gateway::PersistenceGateway;
use crate::registry::SeriesRegistry;

/// Default interval between cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Counters shared between the scheduler task and observers.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    last_error: RwLock<Option<String>>,
    /// Unix timestamp of the last failure (0 = never).
    last_error_at: AtomicI64,
}

impl SchedulerStats {
    /// Timer ticks observed.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Cycles started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Cycles that completed without error.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Cycles that returned an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Ticks skipped because a cycle was still running.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Message of the most recent failed cycle.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// When the most recent failure happened.
    pub fn last_error_at(&self) -> Option<OffsetDateTime> {
        match self.last_error_at.load(Ordering::SeqCst) {
            0 => None,
            ts => OffsetDateTime::from_unix_timestamp(ts).ok(),
        }
    }

    async fn record_failure(&self, message: String) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.last_error_at
            .store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::SeqCst);
        *self.last_error.write().await = Some(message);
    }
}

/// Periodically synchronizes a registry with its store.
pub struct SyncScheduler<G> {
    registry: Arc<SeriesRegistry<G>>,
    period: Duration,
}

impl<G> SyncScheduler<G>
where
    G: PersistenceGateway + 'static,
{
    /// Create a scheduler that syncs every `period`.
    pub fn new(registry: Arc<SeriesRegistry<G>>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Start the timer task. The first cycle runs one period from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stats = Arc::new(SchedulerStats::default());

        info!("Starting sync scheduler (interval: {:?})", self.period);
        let task = tokio::spawn(run(
            self.registry,
            self.period,
            stop_rx,
            Arc::clone(&stats),
        ));

        SchedulerHandle {
            stop_tx,
            task,
            stats,
            started_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<SchedulerStats>,
    started_at: OffsetDateTime,
}

impl SchedulerHandle {
    /// Shared counters.
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Whether the timer task is still alive.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer and wait for a running cycle to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Sync scheduler task ended abnormally: {}", e);
        }
        info!("Sync scheduler stopped");
    }
}

async fn run<G>(
    registry: Arc<SeriesRegistry<G>>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    stats: Arc<SchedulerStats>,
) where
    G: PersistenceGateway + 'static,
{
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }
        stats.ticks.fetch_add(1, Ordering::SeqCst);

        if in_flight.as_ref().is_some_and(|cycle| !cycle.is_finished()) {
            stats.skipped.fetch_add(1, Ordering::SeqCst);
            warn!("Previous sync cycle still running, skipping tick");
            continue;
        }

        let registry = Arc::clone(&registry);
        let stats = Arc::clone(&stats);
        in_flight = Some(tokio::spawn(async move {
            run_cycle(&registry, &stats).await;
        }));
    }

    if let Some(cycle) = in_flight {
        debug!("Waiting for the running sync cycle to finish");
        let _ = cycle.await;
    }
}

async fn run_cycle<G>(registry: &SeriesRegistry<G>, stats: &SchedulerStats)
where
    G: PersistenceGateway + 'static,
{
    stats.started.fetch_add(1, Ordering::SeqCst);

    match registry.try_synchronize().await {
        Ok(report) => {
            stats.succeeded.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Sync cycle done: {} series, {} rows",
                report.flushed_series, report.rows
            );
        }
        Err(Error::SyncInProgress) => {
            stats.skipped.fetch_add(1, Ordering::SeqCst);
            warn!("Manual sync in progress, skipping tick");
        }
        Err(e) => {
            error!("Sync cycle failed: {}", e);
            stats.record_failure(e.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGateway, Operation};
    use crate::registry::RegistryOptions;

    fn registry(gateway: MockGateway) -> Arc<SeriesRegistry<MockGateway>> {
        Arc::new(SeriesRegistry::new(gateway, RegistryOptions::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_tick() {
        let registry = registry(MockGateway::new());
        let handle = SyncScheduler::new(Arc::clone(&registry), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        let stats = handle.stats();
        handle.stop().await;

        assert_eq!(stats.ticks(), 3);
        assert_eq!(stats.succeeded(), 3);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(
            registry.gateway().lock().await.count(Operation::ListSeries),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_skips_overlapping_ticks() {
        let mut gateway = MockGateway::new();
        gateway.set_latency(Duration::from_secs(25));
        let registry = registry(gateway);
        let handle = SyncScheduler::new(Arc::clone(&registry), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let stats = handle.stats();
        handle.stop().await;

        // Cycles start at 10s and 40s; ticks at 20, 30, 50 and 60 are skipped.
        assert_eq!(stats.started(), 2);
        assert_eq!(stats.skipped(), 4);
        assert_eq!(stats.ticks(), stats.started() + stats.skipped());
        assert_eq!(
            registry.gateway().lock().await.count(Operation::ListSeries),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_cycles() {
        let registry = registry(MockGateway::new());
        let handle = SyncScheduler::new(Arc::clone(&registry), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(15)).await;
        let stats = handle.stats();
        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(stats.started(), 1);
        assert_eq!(
            registry.gateway().lock().await.count(Operation::ListSeries),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_running_cycle() {
        let mut gateway = MockGateway::new();
        gateway.set_latency(Duration::from_secs(20));
        let registry = registry(gateway);
        let handle = SyncScheduler::new(Arc::clone(&registry), Duration::from_secs(10)).start();

        // Cycle starts at 10s and needs until 30s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        let stats = handle.stats();
        handle.stop().await;

        assert_eq!(stats.succeeded(), 1);
        assert!(registry.last_synced_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_recorded_and_retried() {
        let mut gateway = MockGateway::new();
        gateway.fail_next(Operation::ListSeries);
        let registry = registry(gateway);
        let handle = SyncScheduler::new(Arc::clone(&registry), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let stats = handle.stats();
        handle.stop().await;

        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.succeeded(), 1);
        assert!(stats.last_error().await.unwrap().contains("list_series"));
        assert!(stats.last_error_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_running() {
        let registry = registry(MockGateway::new());
        let handle = SyncScheduler::new(registry, Duration::from_secs(10)).start();
        assert!(handle.is_running());
        handle.stop().await;
    }
}
