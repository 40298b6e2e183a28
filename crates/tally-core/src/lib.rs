//! In-memory buffering and periodic persistence of time series events.
//!
//! Events arrive one at a time for a named series. Each series buffers them
//! in memory, aggregating events that fall into the same time bucket and
//! sub-entity into a single row. A background cycle periodically writes
//! every buffered entry to a persistent store in one transaction, then
//! reloads the list of series from the store.
//!
//! # Features
//!
//! - **Aggregation**: events for the same `(bucket, object_id)` collapse
//!   into one row carrying the value sum and an event count
//! - **Atomic flush**: one transaction per cycle; a failed cycle leaves every
//!   entry buffered for the next one
//! - **Slot reuse and compaction**: persisted rows are recycled and
//!   periodically dropped so buffers stay bounded
//! - **Pluggable storage**: anything implementing [`PersistenceGateway`]
//! - **Scheduling**: [`SyncScheduler`] runs cycles on an interval and never
//!   overlaps them
//!
//! # Quick Start
//!
//! ```
//! use tally_core::mock::MockGateway;
//! use tally_core::{PushEvent, RegistryOptions, SeriesRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tally_core::Result<()> {
//! let registry = SeriesRegistry::new(MockGateway::new(), RegistryOptions::default());
//!
//! registry.push(PushEvent::new("cpu", 3.0)).await?;
//! registry.push(PushEvent::new("cpu", 4.0)).await?;
//!
//! let report = registry.synchronize().await?;
//! assert_eq!(report.rows, 1);
//! # Ok(())
//! # }
//! ```

mod bucket;
mod error;
mod gateway;
mod ingest;
pub mod mock;
mod registry;
mod scheduler;
mod series;

pub use bucket::{Bucketing, DEFAULT_BUCKET};
pub use error::{Error, GatewayError, GatewayResult, Result};
pub use gateway::{NoteRecord, PersistenceGateway, RowRecord, SeriesId, SeriesRecord};
pub use ingest::{PushEvent, PushOutcome};
pub use registry::{DEFAULT_VACUUM_EVERY, RegistryOptions, SeriesRegistry, SharedSeries, SyncReport};
pub use scheduler::{DEFAULT_SYNC_INTERVAL, SchedulerHandle, SchedulerStats, SyncScheduler};
pub use series::{
    AppendOutcome, CommentEntry, EntryState, FlushReport, MeasurementRow, MetaEntry, NoteEntry,
    Series, SeriesInfo,
};
