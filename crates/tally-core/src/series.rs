//! A single named series and its in-memory buffers.
//!
//! A [`Series`] buffers three kinds of entries until the next sync cycle:
//! aggregated measurement rows, meta entries and comments. Every entry moves
//! through the same lifecycle:
//!
//! ```text
//! Pending --flush--> InFlight --commit--> Persisted --compact--> (removed)
//!                        |
//!                        +----rollback---> Pending
//! ```
//!
//! Only `Pending` rows take part in aggregation. `Persisted` slots are
//! reused by later appends before the buffer grows.

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gateway::{NoteRecord, PersistenceGateway, RowRecord, SeriesId, SeriesRecord};

/// Lifecycle state of a buffered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Not yet sent to the store.
    Pending,
    /// Sent inside the open sync transaction, outcome not known yet.
    InFlight,
    /// Committed to the store; the slot may be reused.
    Persisted,
}

/// One aggregated observation for an (object id, bucket) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRow {
    #[serde(with = "time::serde::rfc3339")]
    pub bucket: OffsetDateTime,
    pub object_id: i64,
    /// Sum of all raw values folded into this row.
    pub value: f64,
    /// Number of raw events folded into this row.
    pub amount: u32,
    state: EntryState,
}

impl MeasurementRow {
    fn new(object_id: i64, bucket: OffsetDateTime, value: f64) -> Self {
        Self {
            bucket,
            object_id,
            value,
            amount: 1,
            state: EntryState::Pending,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// True once the row is durably committed.
    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Persisted
    }

    fn record(&self) -> RowRecord {
        RowRecord {
            timestamp: self.bucket,
            value: self.value,
            object_id: self.object_id,
            amount: self.amount,
        }
    }
}

/// A text entry attached to a series. Never aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEntry {
    pub value: String,
    pub object_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    state: EntryState,
}

/// Meta entry buffered for a series.
pub type MetaEntry = NoteEntry;
/// Comment buffered for a series.
pub type CommentEntry = NoteEntry;

impl NoteEntry {
    fn new(value: String, object_id: i64, timestamp: OffsetDateTime) -> Self {
        Self {
            value,
            object_id,
            timestamp,
            state: EntryState::Pending,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// True once the entry is durably committed.
    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Persisted
    }

    fn record(&self) -> NoteRecord {
        NoteRecord {
            timestamp: self.timestamp,
            value: self.value.clone(),
            object_id: self.object_id,
        }
    }
}

trait Slot {
    fn state(&self) -> EntryState;
    fn set_state(&mut self, state: EntryState);
}

impl Slot for MeasurementRow {
    fn state(&self) -> EntryState {
        self.state
    }
    fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }
}

impl Slot for NoteEntry {
    fn state(&self) -> EntryState {
        self.state
    }
    fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }
}

fn indices_in<T: Slot>(entries: &[T], state: EntryState) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.state() == state)
        .map(|(i, _)| i)
        .collect()
}

fn transition<T: Slot>(entries: &mut [T], from: EntryState, to: EntryState) {
    for entry in entries.iter_mut().filter(|e| e.state() == from) {
        entry.set_state(to);
    }
}

/// Put `entry` into the first persisted slot, or append it.
fn reuse_or_push<T: Slot>(entries: &mut Vec<T>, entry: T) -> AppendOutcome {
    match entries.iter().position(|e| e.state() == EntryState::Persisted) {
        Some(idx) => {
            entries[idx] = entry;
            AppendOutcome::Reused
        }
        None => {
            entries.push(entry);
            AppendOutcome::Appended
        }
    }
}

/// How an append was absorbed into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    /// Merged into an existing pending row.
    Aggregated,
    /// Overwrote a persisted slot.
    Reused,
    /// Grew the buffer.
    Appended,
}

/// Counts of entries sent by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub rows: usize,
    pub meta: usize,
    pub comments: usize,
}

impl FlushReport {
    /// Total entries sent.
    pub fn total(&self) -> usize {
        self.rows + self.meta + self.comments
    }
}

/// Serializable view of a series, without its buffers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesInfo {
    pub id: SeriesId,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub dirty: bool,
    /// Entries not yet committed to the store.
    pub unflushed: usize,
    /// Slots currently allocated across all buffers.
    pub buffered: usize,
}

/// One named time series.
#[derive(Debug)]
pub struct Series {
    id: SeriesId,
    title: String,
    added_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    dirty: bool,
    rows: Vec<MeasurementRow>,
    meta: Vec<MetaEntry>,
    comments: Vec<CommentEntry>,
    /// Flush time of the entries currently in flight.
    in_flight_at: Option<OffsetDateTime>,
}

impl Series {
    /// Create an empty series.
    pub fn new(id: SeriesId, title: impl Into<String>, added_at: OffsetDateTime) -> Self {
        Self {
            id,
            title: title.into(),
            added_at,
            updated_at: added_at,
            dirty: false,
            rows: Vec::new(),
            meta: Vec::new(),
            comments: Vec::new(),
            in_flight_at: None,
        }
    }

    /// Create an empty series from a store listing.
    pub fn from_record(record: &SeriesRecord) -> Self {
        let mut series = Self::new(record.id, record.title.clone(), record.added_at);
        series.updated_at = record.updated_at;
        series
    }

    pub fn id(&self) -> SeriesId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn added_at(&self) -> OffsetDateTime {
        self.added_at
    }

    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    /// True if any entry has not been committed to the store yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn rows(&self) -> &[MeasurementRow] {
        &self.rows
    }

    pub fn meta(&self) -> &[MetaEntry] {
        &self.meta
    }

    pub fn comments(&self) -> &[CommentEntry] {
        &self.comments
    }

    /// Allocated slots across all three buffers, persisted ones included.
    pub fn buffered_len(&self) -> usize {
        self.rows.len() + self.meta.len() + self.comments.len()
    }

    /// Entries that are not yet committed.
    pub fn unflushed_len(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_deleted()).count()
            + self.meta.iter().filter(|m| !m.is_deleted()).count()
            + self.comments.iter().filter(|c| !c.is_deleted()).count()
    }

    /// Snapshot for serialization.
    pub fn info(&self) -> SeriesInfo {
        SeriesInfo {
            id: self.id,
            title: self.title.clone(),
            added_at: self.added_at,
            updated_at: self.updated_at,
            dirty: self.dirty,
            unflushed: self.unflushed_len(),
            buffered: self.buffered_len(),
        }
    }

    /// Add one raw event.
    ///
    /// Folds into the pending row with the same object id and bucket if there
    /// is one; otherwise takes the first persisted slot, or grows the buffer.
    ///
    /// A non-finite `value`, or one that would make the aggregated sum
    /// non-finite, is refused with [`Error::NonFinite`] and changes nothing.
    pub fn append_row(
        &mut self,
        object_id: i64,
        bucket: OffsetDateTime,
        value: f64,
    ) -> Result<AppendOutcome> {
        if !value.is_finite() {
            return Err(self.non_finite(value));
        }

        let mut free = None;
        let mut pending = None;
        for (idx, row) in self.rows.iter().enumerate() {
            match row.state {
                EntryState::Pending if row.object_id == object_id && row.bucket == bucket => {
                    pending = Some(idx);
                    break;
                }
                EntryState::Persisted if free.is_none() => free = Some(idx),
                _ => {}
            }
        }

        if let Some(idx) = pending {
            let row = &mut self.rows[idx];
            let sum = row.value + value;
            if !sum.is_finite() {
                return Err(self.non_finite(sum));
            }
            row.value = sum;
            row.amount = row.amount.saturating_add(1);
            self.dirty = true;
            return Ok(AppendOutcome::Aggregated);
        }

        self.dirty = true;
        let row = MeasurementRow::new(object_id, bucket, value);
        match free {
            Some(idx) => {
                self.rows[idx] = row;
                Ok(AppendOutcome::Reused)
            }
            None => {
                self.rows.push(row);
                Ok(AppendOutcome::Appended)
            }
        }
    }

    fn non_finite(&self, value: f64) -> Error {
        Error::NonFinite {
            title: self.title.clone(),
            value,
        }
    }

    /// Add a meta entry stamped with `now`.
    pub fn append_meta(
        &mut self,
        text: impl Into<String>,
        object_id: i64,
        now: OffsetDateTime,
    ) -> AppendOutcome {
        self.dirty = true;
        reuse_or_push(&mut self.meta, NoteEntry::new(text.into(), object_id, now))
    }

    /// Add a comment stamped with `now`.
    pub fn append_comment(
        &mut self,
        text: impl Into<String>,
        object_id: i64,
        now: OffsetDateTime,
    ) -> AppendOutcome {
        self.dirty = true;
        reuse_or_push(&mut self.comments, NoteEntry::new(text.into(), object_id, now))
    }

    /// Send every pending entry to the gateway inside the caller's transaction.
    ///
    /// Rows, then meta, then comments are inserted as one batch each, and the
    /// series is touched with `now`. Entries are marked in flight only after
    /// all of that succeeds; on any failure the buffers are left untouched and
    /// the caller must roll back.
    ///
    /// The caller settles the flush with [`commit_flush`](Self::commit_flush)
    /// or [`abort_flush`](Self::abort_flush) once the transaction outcome is
    /// known.
    pub async fn flush<G>(&mut self, gateway: &mut G, now: OffsetDateTime) -> Result<FlushReport>
    where
        G: PersistenceGateway + ?Sized,
    {
        if self.id == 0 {
            return Err(Error::Unassigned(self.title.clone()));
        }

        let rows = indices_in(&self.rows, EntryState::Pending);
        let meta = indices_in(&self.meta, EntryState::Pending);
        let comments = indices_in(&self.comments, EntryState::Pending);
        let report = FlushReport {
            rows: rows.len(),
            meta: meta.len(),
            comments: comments.len(),
        };
        if report.total() == 0 {
            return Ok(report);
        }

        if !rows.is_empty() {
            let batch: Vec<RowRecord> = rows.iter().map(|&i| self.rows[i].record()).collect();
            gateway.insert_rows(self.id, &batch).await?;
        }
        if !meta.is_empty() {
            let batch: Vec<NoteRecord> = meta.iter().map(|&i| self.meta[i].record()).collect();
            gateway.insert_meta(self.id, &batch).await?;
        }
        if !comments.is_empty() {
            let batch: Vec<NoteRecord> =
                comments.iter().map(|&i| self.comments[i].record()).collect();
            gateway.insert_comments(self.id, &batch).await?;
        }
        gateway.touch_series(self.id, now).await?;

        for i in rows {
            self.rows[i].state = EntryState::InFlight;
        }
        for i in meta {
            self.meta[i].state = EntryState::InFlight;
        }
        for i in comments {
            self.comments[i].state = EntryState::InFlight;
        }
        self.in_flight_at = Some(now);

        debug!(
            "Flushed {} rows, {} meta, {} comments for '{}'",
            report.rows, report.meta, report.comments, self.title
        );
        Ok(report)
    }

    /// The flush transaction committed: in-flight entries become persisted.
    pub fn commit_flush(&mut self) {
        transition(&mut self.rows, EntryState::InFlight, EntryState::Persisted);
        transition(&mut self.meta, EntryState::InFlight, EntryState::Persisted);
        transition(&mut self.comments, EntryState::InFlight, EntryState::Persisted);

        if let Some(at) = self.in_flight_at.take() {
            self.updated_at = at;
        }
        self.dirty = self.unflushed_len() > 0;
    }

    /// The flush transaction rolled back: in-flight entries are pending again.
    pub fn abort_flush(&mut self) {
        transition(&mut self.rows, EntryState::InFlight, EntryState::Pending);
        transition(&mut self.meta, EntryState::InFlight, EntryState::Pending);
        transition(&mut self.comments, EntryState::InFlight, EntryState::Pending);

        self.in_flight_at = None;
        self.dirty = self.unflushed_len() > 0;
    }

    /// Drop persisted entries from all buffers. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.buffered_len();

        self.rows.retain(|r| !r.is_deleted());
        self.meta.retain(|m| !m.is_deleted());
        self.comments.retain(|c| !c.is_deleted());

        let after = self.buffered_len();
        debug!("Vacuum '{}': records before {}, after {}", self.title, before, after);
        before - after
    }

    /// Take title and timestamps from a store listing. Buffers are untouched.
    pub fn merge(&mut self, record: &SeriesRecord) {
        if self.id == 0 {
            self.id = record.id;
        }
        self.title.clone_from(&record.title);
        self.added_at = record.added_at;
        self.updated_at = record.updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGateway, Operation};
    use time::macros::datetime;

    const BUCKET: OffsetDateTime = datetime!(2024-04-01 13:00:00 UTC);
    const NOW: OffsetDateTime = datetime!(2024-04-01 13:42:00 UTC);

    fn series() -> Series {
        Series::new(7, "cpu", datetime!(2024-04-01 00:00:00 UTC))
    }

    async fn flush_and_commit(series: &mut Series, gateway: &mut MockGateway) {
        gateway.begin_transaction().await.unwrap();
        series.flush(gateway, NOW).await.unwrap();
        gateway.commit().await.unwrap();
        series.commit_flush();
    }

    #[test]
    fn test_new_series_is_clean() {
        let series = series();
        assert!(!series.is_dirty());
        assert_eq!(series.buffered_len(), 0);
        assert_eq!(series.updated_at(), series.added_at());
    }

    #[test]
    fn test_aggregates_same_object_and_bucket() {
        let mut series = series();

        assert_eq!(series.append_row(1, BUCKET, 3.0).unwrap(), AppendOutcome::Appended);
        assert_eq!(series.append_row(1, BUCKET, 4.0).unwrap(), AppendOutcome::Aggregated);

        assert_eq!(series.rows().len(), 1);
        assert_eq!(series.rows()[0].value, 7.0);
        assert_eq!(series.rows()[0].amount, 2);
        assert!(series.is_dirty());
    }

    #[test]
    fn test_different_object_gets_own_row() {
        let mut series = series();
        series.append_row(1, BUCKET, 3.0).unwrap();
        series.append_row(1, BUCKET, 4.0).unwrap();
        series.append_row(2, BUCKET, 5.0).unwrap();

        assert_eq!(series.rows().len(), 2);
        assert_eq!(series.rows()[1].object_id, 2);
        assert_eq!(series.rows()[1].amount, 1);
    }

    #[test]
    fn test_different_bucket_gets_own_row() {
        let mut series = series();
        series.append_row(1, BUCKET, 1.0).unwrap();
        series.append_row(1, datetime!(2024-04-01 14:00:00 UTC), 1.0).unwrap();
        assert_eq!(series.rows().len(), 2);
    }

    #[test]
    fn test_non_finite_value_is_refused() {
        let mut series = series();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                series.append_row(1, BUCKET, value),
                Err(Error::NonFinite { .. })
            ));
        }
        assert!(series.rows().is_empty());
        assert!(!series.is_dirty());
    }

    #[test]
    fn test_overflowing_sum_leaves_row_unchanged() {
        let mut series = series();
        series.append_row(1, BUCKET, f64::MAX).unwrap();

        let err = series.append_row(1, BUCKET, f64::MAX).unwrap_err();
        assert!(matches!(err, Error::NonFinite { value, .. } if value.is_infinite()));
        assert_eq!(series.rows().len(), 1);
        assert_eq!(series.rows()[0].value, f64::MAX);
        assert_eq!(series.rows()[0].amount, 1);

        // Finite increments still aggregate.
        series.append_row(1, BUCKET, -1.0).unwrap();
        assert_eq!(series.rows()[0].amount, 2);
    }

    #[test]
    fn test_meta_and_comments_never_aggregate() {
        let mut series = series();
        series.append_meta("host=a", 1, NOW);
        series.append_meta("host=a", 1, NOW);
        series.append_comment("deploy", 1, NOW);
        series.append_comment("deploy", 1, NOW);

        assert_eq!(series.meta().len(), 2);
        assert_eq!(series.comments().len(), 2);
        assert_eq!(series.meta()[0].timestamp, NOW);
    }

    #[tokio::test]
    async fn test_flush_marks_in_flight_then_persisted() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 3.0).unwrap();
        series.append_meta("m", 1, NOW);

        gateway.begin_transaction().await.unwrap();
        let report = series.flush(&mut gateway, NOW).await.unwrap();
        assert_eq!(report, FlushReport { rows: 1, meta: 1, comments: 0 });
        assert_eq!(series.rows()[0].state(), EntryState::InFlight);
        assert!(series.is_dirty());

        gateway.commit().await.unwrap();
        series.commit_flush();

        assert!(series.rows()[0].is_deleted());
        assert!(series.meta()[0].is_deleted());
        assert!(!series.is_dirty());
        assert_eq!(series.updated_at(), NOW);
        assert_eq!(gateway.committed_rows().len(), 1);
        assert_eq!(gateway.count(Operation::TouchSeries), 1);
    }

    #[tokio::test]
    async fn test_meta_failure_marks_nothing() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        gateway.fail_next(Operation::InsertMeta);
        series.append_row(1, BUCKET, 3.0).unwrap();
        series.append_row(2, BUCKET, 1.0).unwrap();
        series.append_meta("m", 1, NOW);

        gateway.begin_transaction().await.unwrap();
        let result = series.flush(&mut gateway, NOW).await;
        assert!(matches!(result, Err(Error::Store(_))));
        gateway.rollback().await.unwrap();

        assert!(series.rows().iter().all(|r| r.state() == EntryState::Pending));
        assert!(series.is_dirty());
        assert!(gateway.committed_rows().is_empty());
        assert_eq!(gateway.count(Operation::TouchSeries), 0);
    }

    #[tokio::test]
    async fn test_touch_failure_keeps_dirty() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        gateway.fail_next(Operation::TouchSeries);
        series.append_row(1, BUCKET, 3.0).unwrap();

        gateway.begin_transaction().await.unwrap();
        assert!(series.flush(&mut gateway, NOW).await.is_err());
        gateway.rollback().await.unwrap();

        assert!(series.is_dirty());
        assert!(!series.rows()[0].is_deleted());
        assert_ne!(series.updated_at(), NOW);
    }

    #[tokio::test]
    async fn test_abort_returns_entries_to_pending() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 3.0).unwrap();

        gateway.begin_transaction().await.unwrap();
        series.flush(&mut gateway, NOW).await.unwrap();
        gateway.rollback().await.unwrap();
        series.abort_flush();

        assert_eq!(series.rows()[0].state(), EntryState::Pending);
        assert!(series.is_dirty());
        assert_ne!(series.updated_at(), NOW);

        // Retried next cycle with the same content.
        flush_and_commit(&mut series, &mut gateway).await;
        let rows = gateway.committed_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.value, 3.0);
    }

    #[tokio::test]
    async fn test_in_flight_row_is_not_aggregated_into() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 3.0).unwrap();

        gateway.begin_transaction().await.unwrap();
        series.flush(&mut gateway, NOW).await.unwrap();

        assert_eq!(series.append_row(1, BUCKET, 4.0).unwrap(), AppendOutcome::Appended);
        assert_eq!(series.rows()[0].value, 3.0);

        gateway.commit().await.unwrap();
        series.commit_flush();

        assert!(series.is_dirty());
        assert_eq!(series.unflushed_len(), 1);
        assert_eq!(series.rows()[1].value, 4.0);
    }

    #[tokio::test]
    async fn test_persisted_slots_are_reused() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        for object_id in 0..4 {
            series.append_row(object_id, BUCKET, 1.0).unwrap();
        }
        flush_and_commit(&mut series, &mut gateway).await;
        assert_eq!(series.rows().len(), 4);

        for object_id in 10..14 {
            assert_eq!(series.append_row(object_id, BUCKET, 1.0).unwrap(), AppendOutcome::Reused);
        }
        assert_eq!(series.rows().len(), 4);
        assert_eq!(series.unflushed_len(), 4);
    }

    #[tokio::test]
    async fn test_persisted_row_does_not_absorb_same_key() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 3.0).unwrap();
        flush_and_commit(&mut series, &mut gateway).await;

        assert_eq!(series.append_row(1, BUCKET, 4.0).unwrap(), AppendOutcome::Reused);
        assert_eq!(series.rows().len(), 1);
        assert_eq!(series.rows()[0].value, 4.0);
        assert_eq!(series.rows()[0].amount, 1);
    }

    #[tokio::test]
    async fn test_note_slot_reuse() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_comment("first", 1, NOW);
        flush_and_commit(&mut series, &mut gateway).await;

        assert_eq!(series.append_comment("second", 1, NOW), AppendOutcome::Reused);
        assert_eq!(series.comments().len(), 1);
        assert_eq!(series.comments()[0].value, "second");
    }

    #[tokio::test]
    async fn test_compact_removes_only_persisted() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 1.0).unwrap();
        series.append_row(2, BUCKET, 2.0).unwrap();
        series.append_meta("m", 1, NOW);
        flush_and_commit(&mut series, &mut gateway).await;

        series.append_row(3, BUCKET, 5.0).unwrap();
        series.append_row(3, BUCKET, 6.0).unwrap();
        series.append_row(4, BUCKET, 7.0).unwrap();
        series.append_comment("c", 3, NOW);
        // Slots reused for objects 3 and 4; meta slot still persisted.
        let kept: Vec<(i64, f64, u32)> = series
            .rows()
            .iter()
            .filter(|r| !r.is_deleted())
            .map(|r| (r.object_id, r.value, r.amount))
            .collect();

        let removed = series.compact();

        assert_eq!(removed, 1);
        let after: Vec<(i64, f64, u32)> = series
            .rows()
            .iter()
            .map(|r| (r.object_id, r.value, r.amount))
            .collect();
        assert_eq!(after, kept);
        assert!(series.meta().is_empty());
        assert_eq!(series.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_compact_keeps_in_flight() {
        let mut series = series();
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 1.0).unwrap();

        gateway.begin_transaction().await.unwrap();
        series.flush(&mut gateway, NOW).await.unwrap();
        assert_eq!(series.compact(), 0);
        assert_eq!(series.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_unassigned_series_fails() {
        let mut series = Series::new(0, "orphan", NOW);
        let mut gateway = MockGateway::new();
        series.append_row(1, BUCKET, 1.0).unwrap();

        let result = series.flush(&mut gateway, NOW).await;
        assert!(matches!(result, Err(Error::Unassigned(title)) if title == "orphan"));
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending_skips_store() {
        let mut series = series();
        let mut gateway = MockGateway::new();

        let report = series.flush(&mut gateway, NOW).await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_merge_keeps_buffers() {
        let mut series = Series::new(0, "cpu", NOW);
        series.append_row(1, BUCKET, 1.0).unwrap();

        let record = SeriesRecord {
            id: 42,
            title: "cpu".to_string(),
            added_at: datetime!(2024-01-01 00:00:00 UTC),
            updated_at: datetime!(2024-03-01 00:00:00 UTC),
        };
        series.merge(&record);

        assert_eq!(series.id(), 42);
        assert_eq!(series.added_at(), record.added_at);
        assert_eq!(series.updated_at(), record.updated_at);
        assert_eq!(series.rows().len(), 1);
        assert!(series.is_dirty());
    }

    #[test]
    fn test_info_serializes() {
        let mut series = series();
        series.append_row(1, BUCKET, 1.0).unwrap();

        let json = serde_json::to_value(series.info()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["title"], "cpu");
        assert_eq!(json["dirty"], true);
        assert_eq!(json["unflushed"], 1);
        assert!(json["added_at"].is_string());
    }
}
