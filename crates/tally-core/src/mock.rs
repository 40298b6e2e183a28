//! In-memory gateway implementation for testing.
//!
//! [`MockGateway`] implements [`PersistenceGateway`] without a database so the
//! registry and scheduler can be exercised in unit tests.
//!
//! # Features
//!
//! - **Transactions**: writes made after `begin_transaction` are staged and
//!   only become visible through the `committed_*` accessors on commit
//! - **Failure injection**: make the next N calls (or every call) of an
//!   operation fail
//! - **Latency simulation**: delay every call to simulate a slow store
//! - **Call log**: inspect which operations ran, in order

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{NoteRecord, PersistenceGateway, RowRecord, SeriesId, SeriesRecord};

/// Gateway operations, for failure injection and call inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Begin,
    Commit,
    Rollback,
    InsertRows,
    InsertMeta,
    InsertComments,
    TouchSeries,
    CreateSeries,
    ListSeries,
}

impl Operation {
    /// Operation name as used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin => "begin_transaction",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::InsertRows => "insert_rows",
            Self::InsertMeta => "insert_meta",
            Self::InsertComments => "insert_comments",
            Self::TouchSeries => "touch_series",
            Self::CreateSeries => "create_series",
            Self::ListSeries => "list_series",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    series: Vec<SeriesRecord>,
    rows: Vec<(SeriesId, RowRecord)>,
    meta: Vec<(SeriesId, NoteRecord)>,
    comments: Vec<(SeriesId, NoteRecord)>,
    row_batches: usize,
}

/// A mock persistence gateway.
///
/// # Example
///
/// ```
/// use tally_core::PersistenceGateway;
/// use tally_core::mock::{MockGateway, Operation};
///
/// #[tokio::main]
/// async fn main() {
///     let mut gateway = MockGateway::new();
///     gateway.fail_next(Operation::ListSeries);
///
///     assert!(gateway.list_series().await.is_err());
///     assert!(gateway.list_series().await.is_ok());
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockGateway {
    committed: Tables,
    /// Working copy while a transaction is open.
    staged: Option<Tables>,
    next_id: SeriesId,
    /// Remaining injected failures per operation (`u32::MAX` = always).
    failures: HashMap<Operation, u32>,
    latency: Duration,
    calls: Vec<Operation>,
}

impl MockGateway {
    /// Create an empty mock gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock gateway that already stores the given series.
    pub fn with_series(series: impl IntoIterator<Item = SeriesRecord>) -> Self {
        let mut gateway = Self::new();
        for record in series {
            gateway.next_id = gateway.next_id.max(record.id);
            gateway.committed.series.push(record);
        }
        gateway
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&mut self, op: Operation) {
        self.fail_times(op, 1);
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_times(&mut self, op: Operation, times: u32) {
        self.failures.insert(op, times);
    }

    /// Make every call of `op` fail until cleared.
    pub fn fail_always(&mut self, op: Operation) {
        self.failures.insert(op, u32::MAX);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Every operation called so far, in order.
    pub fn calls(&self) -> &[Operation] {
        &self.calls
    }

    /// Number of calls of `op` so far (failed ones included).
    pub fn count(&self, op: Operation) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    /// Committed series.
    pub fn committed_series(&self) -> &[SeriesRecord] {
        &self.committed.series
    }

    /// Committed rows with their series id.
    pub fn committed_rows(&self) -> &[(SeriesId, RowRecord)] {
        &self.committed.rows
    }

    /// Committed meta entries with their series id.
    pub fn committed_meta(&self) -> &[(SeriesId, NoteRecord)] {
        &self.committed.meta
    }

    /// Committed comments with their series id.
    pub fn committed_comments(&self) -> &[(SeriesId, NoteRecord)] {
        &self.committed.comments
    }

    /// Number of committed, non-empty row batches.
    pub fn committed_row_batches(&self) -> usize {
        self.committed.row_batches
    }

    /// Add a series behind the registry's back, as another writer would.
    pub fn insert_external_series(&mut self, title: &str, added_at: OffsetDateTime) -> SeriesId {
        self.next_id += 1;
        self.committed.series.push(SeriesRecord {
            id: self.next_id,
            title: title.to_string(),
            added_at,
            updated_at: added_at,
        });
        self.next_id
    }

    async fn enter(&mut self, op: Operation) -> GatewayResult<()> {
        self.calls.push(op);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(remaining) = self.failures.get_mut(&op)
            && *remaining > 0
        {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            return Err(GatewayError::failed(op.name(), "injected failure"));
        }

        Ok(())
    }

    fn tables(&mut self) -> &mut Tables {
        self.staged.as_mut().unwrap_or(&mut self.committed)
    }
}

#[async_trait]
impl PersistenceGateway for MockGateway {
    async fn begin_transaction(&mut self) -> GatewayResult<()> {
        self.enter(Operation::Begin).await?;
        if self.staged.is_some() {
            return Err(GatewayError::failed(
                Operation::Begin.name(),
                "transaction already open",
            ));
        }
        self.staged = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        self.enter(Operation::Commit).await?;
        match self.staged.take() {
            Some(staged) => {
                self.committed = staged;
                Ok(())
            }
            None => Err(GatewayError::failed(
                Operation::Commit.name(),
                "no transaction open",
            )),
        }
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        self.enter(Operation::Rollback).await?;
        self.staged = None;
        Ok(())
    }

    async fn insert_rows(&mut self, series_id: SeriesId, rows: &[RowRecord]) -> GatewayResult<()> {
        self.enter(Operation::InsertRows).await?;
        let tables = self.tables();
        tables
            .rows
            .extend(rows.iter().cloned().map(|row| (series_id, row)));
        if !rows.is_empty() {
            tables.row_batches += 1;
        }
        Ok(())
    }

    async fn insert_meta(
        &mut self,
        series_id: SeriesId,
        meta: &[NoteRecord],
    ) -> GatewayResult<()> {
        self.enter(Operation::InsertMeta).await?;
        self.tables()
            .meta
            .extend(meta.iter().cloned().map(|m| (series_id, m)));
        Ok(())
    }

    async fn insert_comments(
        &mut self,
        series_id: SeriesId,
        comments: &[NoteRecord],
    ) -> GatewayResult<()> {
        self.enter(Operation::InsertComments).await?;
        self.tables()
            .comments
            .extend(comments.iter().cloned().map(|c| (series_id, c)));
        Ok(())
    }

    async fn touch_series(
        &mut self,
        series_id: SeriesId,
        updated_at: OffsetDateTime,
    ) -> GatewayResult<()> {
        self.enter(Operation::TouchSeries).await?;
        match self.tables().series.iter_mut().find(|s| s.id == series_id) {
            Some(series) => {
                series.updated_at = updated_at;
                Ok(())
            }
            None => Err(GatewayError::failed(
                Operation::TouchSeries.name(),
                format!("unknown series id {}", series_id),
            )),
        }
    }

    async fn create_series(
        &mut self,
        title: &str,
        added_at: OffsetDateTime,
    ) -> GatewayResult<SeriesId> {
        self.enter(Operation::CreateSeries).await?;
        if self.tables().series.iter().any(|s| s.title == title) {
            return Err(GatewayError::Conflict {
                title: title.to_string(),
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        self.tables().series.push(SeriesRecord {
            id,
            title: title.to_string(),
            added_at,
            updated_at: added_at,
        });
        Ok(id)
    }

    async fn list_series(&mut self) -> GatewayResult<Vec<SeriesRecord>> {
        self.enter(Operation::ListSeries).await?;
        Ok(self.tables().series.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: f64) -> RowRecord {
        RowRecord {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            value,
            object_id: 1,
            amount: 1,
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_rows() {
        let mut gateway = MockGateway::new();
        let id = gateway
            .create_series("cpu", OffsetDateTime::UNIX_EPOCH)
            .await
            .unwrap();

        gateway.begin_transaction().await.unwrap();
        gateway.insert_rows(id, &[row(1.0), row(2.0)]).await.unwrap();
        assert!(gateway.committed_rows().is_empty());

        gateway.commit().await.unwrap();
        assert_eq!(gateway.committed_rows().len(), 2);
        assert_eq!(gateway.committed_row_batches(), 1);
        assert!(!gateway.in_transaction());
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_rows() {
        let mut gateway = MockGateway::new();
        gateway.begin_transaction().await.unwrap();
        gateway.insert_rows(1, &[row(1.0)]).await.unwrap();
        gateway.rollback().await.unwrap();

        assert!(gateway.committed_rows().is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let mut gateway = MockGateway::new();
        gateway
            .create_series("cpu", OffsetDateTime::UNIX_EPOCH)
            .await
            .unwrap();
        let result = gateway
            .create_series("cpu", OffsetDateTime::UNIX_EPOCH)
            .await;
        assert!(matches!(result, Err(GatewayError::Conflict { title }) if title == "cpu"));
    }

    #[tokio::test]
    async fn test_fail_times_then_recover() {
        let mut gateway = MockGateway::new();
        gateway.fail_times(Operation::ListSeries, 2);

        assert!(gateway.list_series().await.is_err());
        assert!(gateway.list_series().await.is_err());
        assert!(gateway.list_series().await.is_ok());
        assert_eq!(gateway.count(Operation::ListSeries), 3);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let mut gateway = MockGateway::new();
        gateway.fail_always(Operation::Commit);
        gateway.begin_transaction().await.unwrap();
        for _ in 0..3 {
            assert!(gateway.commit().await.is_err());
        }
        gateway.clear_failures();
        assert!(gateway.commit().await.is_ok());
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let mut gateway = MockGateway::new();
        gateway.begin_transaction().await.unwrap();
        assert!(gateway.begin_transaction().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_applied() {
        let mut gateway = MockGateway::new();
        gateway.set_latency(Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        gateway.list_series().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_with_series_continues_ids() {
        let mut gateway = MockGateway::with_series([SeriesRecord {
            id: 9,
            title: "disk".to_string(),
            added_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }]);
        let id = gateway.insert_external_series("net", OffsetDateTime::UNIX_EPOCH);
        assert_eq!(id, 10);
        assert_eq!(gateway.committed_series().len(), 2);
    }
}
