//! The set of all series and the synchronize cycle.
//!
//! # Concurrency and Lock Acquisition
//!
//! - **`series`** (RwLock): title to series map. Read-locked for lookups,
//!   write-locked only to register new series.
//! - **`creation`** (Mutex): serializes series creation so one title maps
//!   to exactly one store row and one in-memory series.
//! - **`gateway`** (Mutex): the store. Held for a whole flush phase so a
//!   series created meanwhile does not land in the cycle transaction. The
//!   flush phase runs on its own task that owns this guard, so dropping a
//!   cycle future never leaves the transaction open or entries in flight.
//! - **per-series** (Mutex): held by appends, and by flush/compact for the
//!   duration of that series' own work only.
//! - **`cycle`** (Mutex): held for a whole synchronize cycle; cycles never
//!   overlap.
//!
//! ## Lock Ordering
//!
//! 1. `cycle`
//! 2. `creation`
//! 3. `series` (never held while waiting on `gateway`)
//! 4. `gateway`
//! 5. per-series lock

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::bucket::Bucketing;
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{PersistenceGateway, SeriesRecord};
use crate::series::{FlushReport, Series};

/// A series shared between ingestion callers and the sync cycle.
pub type SharedSeries = Arc<Mutex<Series>>;

/// Default number of cycles between compaction passes.
pub const DEFAULT_VACUUM_EVERY: u32 = 5;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Compact flushed series every this many cycles.
    pub vacuum_every: u32,
    /// Bucket size for ingested rows.
    pub bucketing: Bucketing,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            vacuum_every: DEFAULT_VACUUM_EVERY,
            bucketing: Bucketing::default(),
        }
    }
}

/// Outcome of one synchronize cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Series whose buffers were committed this cycle.
    pub flushed_series: usize,
    pub rows: usize,
    pub meta: usize,
    pub comments: usize,
    /// Series found in the store but not yet in memory.
    pub discovered: usize,
    /// Whether this cycle ran a compaction pass.
    pub vacuumed: bool,
    /// Entries removed by compaction.
    pub compacted: usize,
}

impl SyncReport {
    fn add_flush(&mut self, report: FlushReport) {
        self.flushed_series += 1;
        self.rows += report.rows;
        self.meta += report.meta;
        self.comments += report.comments;
    }
}

#[derive(Debug, Default)]
struct CycleState {
    counter: u32,
}

impl CycleState {
    /// Count one cycle; true if compaction is due.
    fn advance(&mut self, every: u32) -> bool {
        self.counter += 1;
        if self.counter >= every.max(1) {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

/// Owns every series, keyed by title, and the store they flush to.
pub struct SeriesRegistry<G> {
    gateway: Arc<Mutex<G>>,
    series: RwLock<HashMap<String, SharedSeries>>,
    creation: Mutex<()>,
    cycle: Mutex<CycleState>,
    /// Unix timestamp of the last successful cycle (0 = never).
    last_synced_at: AtomicI64,
    options: RegistryOptions,
}

impl<G: PersistenceGateway + 'static> SeriesRegistry<G> {
    /// Create an empty registry.
    pub fn new(gateway: G, options: RegistryOptions) -> Self {
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            series: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
            cycle: Mutex::new(CycleState::default()),
            last_synced_at: AtomicI64::new(0),
            options,
        }
    }

    /// Create a registry populated from the store's current listing.
    pub async fn load(gateway: G, options: RegistryOptions) -> Result<Self> {
        let registry = Self::new(gateway, options);
        let discovered = registry.reload().await?;
        info!("Loaded {} series from the store", discovered);
        Ok(registry)
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// The underlying gateway.
    pub fn gateway(&self) -> &Mutex<G> {
        &self.gateway
    }

    /// Number of registered series.
    pub async fn len(&self) -> usize {
        self.series.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.series.read().await.is_empty()
    }

    /// Registered titles, sorted.
    pub async fn titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.series.read().await.keys().cloned().collect();
        titles.sort();
        titles
    }

    /// When the last cycle completed without error.
    pub fn last_synced_at(&self) -> Option<OffsetDateTime> {
        match self.last_synced_at.load(Ordering::SeqCst) {
            0 => None,
            ts => OffsetDateTime::from_unix_timestamp(ts).ok(),
        }
    }

    /// Look up a registered series.
    pub async fn get(&self, title: &str) -> Option<SharedSeries> {
        self.series.read().await.get(title).cloned()
    }

    /// Look up a series, creating it in the store if `auto_create` is set.
    ///
    /// Returns `Ok(None)` when the title is unknown and `auto_create` is false.
    /// Concurrent callers creating the same title all receive the same series.
    pub async fn find_by_title(
        &self,
        title: &str,
        auto_create: bool,
    ) -> Result<Option<SharedSeries>> {
        if let Some(series) = self.get(title).await {
            return Ok(Some(series));
        }
        if !auto_create {
            return Ok(None);
        }
        self.create(title).await.map(Some)
    }

    /// Create a series in the store and register it.
    ///
    /// If the title is already registered the existing series is returned.
    /// If the store already holds the title, its row is adopted.
    pub async fn create(&self, title: &str) -> Result<SharedSeries> {
        let _creating = self.creation.lock().await;

        // Another caller may have won the race while we waited.
        if let Some(existing) = self.get(title).await {
            return Ok(existing);
        }

        let added_at = OffsetDateTime::now_utc();
        let series = {
            let mut gateway = self.gateway.lock().await;
            match gateway.create_series(title, added_at).await {
                Ok(id) => Series::new(id, title, added_at),
                Err(GatewayError::Conflict { .. }) => {
                    warn!("Series '{}' already in the store, adopting it", title);
                    let record = gateway
                        .list_series()
                        .await?
                        .into_iter()
                        .find(|s| s.title == title)
                        .ok_or_else(|| Error::Unassigned(title.to_string()))?;
                    Series::from_record(&record)
                }
                Err(e) => {
                    error!("Failed to create series '{}': {}", title, e);
                    return Err(e.into());
                }
            }
        };

        info!("Created series '{}' (id {})", title, series.id());
        Ok(self.register(series).await)
    }

    async fn register(&self, series: Series) -> SharedSeries {
        let mut map = self.series.write().await;
        map.entry(series.title().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(series)))
            .clone()
    }

    /// Run one synchronize cycle, waiting for a running one to finish first.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        let mut cycle = self.cycle.lock().await;
        self.run_cycle(&mut cycle).await
    }

    /// Run one synchronize cycle unless one is already running.
    pub async fn try_synchronize(&self) -> Result<SyncReport> {
        let Ok(mut cycle) = self.cycle.try_lock() else {
            return Err(Error::SyncInProgress);
        };
        self.run_cycle(&mut cycle).await
    }

    async fn run_cycle(&self, cycle: &mut CycleState) -> Result<SyncReport> {
        let now = OffsetDateTime::now_utc();

        let flushed = self.flush_all(now).await;
        let reloaded = self.reload().await;
        let vacuum_due = cycle.advance(self.options.vacuum_every);

        let (flushed, mut report) = match flushed {
            Ok(flushed) => flushed,
            Err(e) => {
                error!("Flush phase failed, will retry next cycle: {}", e);
                if let Err(reload_err) = reloaded {
                    warn!("Reload phase failed: {}", reload_err);
                }
                return Err(e);
            }
        };

        if vacuum_due {
            report.vacuumed = true;
            for series in &flushed {
                report.compacted += series.lock().await.compact();
            }
            debug!("Vacuum removed {} entries", report.compacted);
        }

        report.discovered = reloaded.inspect_err(|e| warn!("Reload phase failed: {}", e))?;

        self.last_synced_at
            .store(now.unix_timestamp(), Ordering::SeqCst);
        debug!(
            "Sync cycle: {} series flushed ({} rows, {} meta, {} comments), {} discovered",
            report.flushed_series, report.rows, report.meta, report.comments, report.discovered
        );
        Ok(report)
    }

    /// Flush every dirty series inside one transaction.
    ///
    /// Returns the series that were committed. On failure the transaction is
    /// rolled back and every series flushed so far gets its entries back.
    ///
    /// The transaction runs on a spawned task holding the gateway lock. If
    /// this future is dropped, the task still commits or rolls back and
    /// settles every flushed series before releasing the store.
    async fn flush_all(&self, now: OffsetDateTime) -> Result<(Vec<SharedSeries>, SyncReport)> {
        let candidates: Vec<SharedSeries> = self.series.read().await.values().cloned().collect();
        let gateway = Arc::clone(&self.gateway).lock_owned().await;

        match tokio::spawn(Self::flush_transaction(gateway, candidates, now)).await {
            Ok(result) => result,
            Err(e) => {
                error!("Flush task did not complete: {}", e);
                Err(GatewayError::failed("flush", e).into())
            }
        }
    }

    async fn flush_transaction(
        mut gateway: OwnedMutexGuard<G>,
        candidates: Vec<SharedSeries>,
        now: OffsetDateTime,
    ) -> Result<(Vec<SharedSeries>, SyncReport)> {
        let mut flushed = Vec::new();
        let mut report = SyncReport::default();
        let mut open = false;

        for series in candidates {
            let mut guard = series.lock().await;
            if !guard.is_dirty() {
                continue;
            }
            if guard.id() == 0 {
                warn!("Skipping flush of '{}': no store id", guard.title());
                continue;
            }
            if !open {
                gateway.begin_transaction().await?;
                open = true;
            }

            match guard.flush(&mut *gateway, now).await {
                Ok(flush) => {
                    report.add_flush(flush);
                    drop(guard);
                    flushed.push(series);
                }
                Err(e) => {
                    warn!("Flush of '{}' failed: {}", guard.title(), e);
                    drop(guard);
                    Self::abandon(&mut gateway, &flushed).await;
                    return Err(e);
                }
            }
        }

        if !open {
            return Ok((flushed, report));
        }

        if let Err(e) = gateway.commit().await {
            Self::abandon(&mut gateway, &flushed).await;
            return Err(e.into());
        }

        // Settled before the store is released, so the next flush never
        // sees this cycle's entries still in flight.
        for series in &flushed {
            series.lock().await.commit_flush();
        }
        Ok((flushed, report))
    }

    async fn abandon(gateway: &mut G, flushed: &[SharedSeries]) {
        if let Err(e) = gateway.rollback().await {
            warn!("Rollback failed: {}", e);
        }
        for series in flushed {
            series.lock().await.abort_flush();
        }
    }

    /// Merge the store's series listing into the registry.
    ///
    /// Unknown titles are registered clean; known ones take the store's
    /// title and timestamps. Series missing from the store are kept.
    async fn reload(&self) -> Result<usize> {
        let listing: Vec<SeriesRecord> = {
            let mut gateway = self.gateway.lock().await;
            gateway.list_series().await?
        };

        let mut map = self.series.write().await;
        let mut discovered = 0;
        for record in listing {
            if let Some(existing) = map.get(&record.title) {
                existing.lock().await.merge(&record);
                continue;
            }
            map.insert(
                record.title.clone(),
                Arc::new(Mutex::new(Series::from_record(&record))),
            );
            discovered += 1;
        }
        Ok(discovered)
    }
}
