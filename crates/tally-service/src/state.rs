//! Application state shared across handlers.
//!
//! The state is built once in `main`, after the store has been opened and
//! the registry populated from it, and passed to every handler through
//! axum's `State` extractor.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{
    PersistenceGateway, SchedulerHandle, SchedulerStats, SeriesRegistry, SyncScheduler,
};
use tally_store::Store;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::Config;

/// Shared application state.
pub struct AppState<G = Store> {
    /// All series and their store.
    pub registry: Arc<SeriesRegistry<G>>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Background sync control.
    pub scheduler: SchedulerControl,
    started_at: OffsetDateTime,
}

impl<G: PersistenceGateway + 'static> AppState<G> {
    /// Create new application state around a loaded registry.
    pub fn new(registry: SeriesRegistry<G>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(registry),
            config: RwLock::new(config),
            scheduler: SchedulerControl::default(),
            started_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Start the background scheduler with the configured interval.
    ///
    /// Returns false if it was already running.
    pub async fn start_scheduler(&self) -> bool {
        let interval = self.config.read().await.sync.interval();
        self.scheduler
            .start(Arc::clone(&self.registry), interval)
            .await
    }

    /// Stop the background scheduler, waiting for a running cycle.
    ///
    /// Returns false if it was not running.
    pub async fn stop_scheduler(&self) -> bool {
        self.scheduler.stop().await
    }
}

/// Owns the running scheduler, if any.
#[derive(Default)]
pub struct SchedulerControl {
    handle: Mutex<Option<SchedulerHandle>>,
    /// Stats of the most recent scheduler, kept after it stops.
    stats: RwLock<Option<Arc<SchedulerStats>>>,
}

impl SchedulerControl {
    async fn start<G: PersistenceGateway + 'static>(
        &self,
        registry: Arc<SeriesRegistry<G>>,
        interval: Duration,
    ) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(SchedulerHandle::is_running) {
            return false;
        }

        let started = SyncScheduler::new(registry, interval).start();
        *self.stats.write().await = Some(started.stats());
        *handle = Some(started);
        true
    }

    async fn stop(&self) -> bool {
        let Some(handle) = self.handle.lock().await.take() else {
            return false;
        };
        info!("Stopping sync scheduler");
        handle.stop().await;
        true
    }

    /// Whether a scheduler is running.
    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    /// When the running scheduler was started.
    pub async fn started_at(&self) -> Option<OffsetDateTime> {
        self.handle
            .lock()
            .await
            .as_ref()
            .map(SchedulerHandle::started_at)
    }

    /// Stats of the current or most recent scheduler.
    pub async fn stats(&self) -> Option<Arc<SchedulerStats>> {
        self.stats.read().await.clone()
    }
}
