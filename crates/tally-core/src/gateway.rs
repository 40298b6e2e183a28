//! Persistence contract consumed by the registry.
//!
//! This module provides the [`PersistenceGateway`] trait that abstracts over
//! the durable store (SQLite in `tally-store`) and the in-memory
//! [`MockGateway`](crate::mock::MockGateway) used in tests.
//!
//! # Transactions
//!
//! The flush phase of a sync cycle opens one transaction with
//! [`begin_transaction`](PersistenceGateway::begin_transaction), issues the
//! batch inserts and touches for every dirty series, then either commits or
//! rolls back. Each batch insert is all-or-nothing on its own; the enclosing
//! transaction makes the whole cycle all-or-nothing across series.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::GatewayResult;

/// Store-assigned series identifier.
pub type SeriesId = i64;

/// One aggregated measurement row as sent to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
    pub object_id: i64,
    pub amount: u32,
}

/// A meta or comment entry as sent to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: String,
    pub object_id: i64,
}

/// A series row as listed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Trait abstracting the durable store.
///
/// Every call is a bounded, fallible operation. Implementations must not
/// panic on store failures; they report them as [`GatewayError`](crate::GatewayError)
/// so the sync cycle can roll back and retry later.
///
/// # Example
///
/// ```ignore
/// use tally_core::{PersistenceGateway, GatewayResult};
///
/// async fn known_titles<G: PersistenceGateway>(gateway: &mut G) -> GatewayResult<Vec<String>> {
///     let series = gateway.list_series().await?;
///     Ok(series.into_iter().map(|s| s.title).collect())
/// }
/// ```
#[async_trait]
pub trait PersistenceGateway: Send {
    // --- Transactions ---

    /// Open the transaction that spans one flush phase.
    async fn begin_transaction(&mut self) -> GatewayResult<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> GatewayResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> GatewayResult<()>;

    // --- Batched inserts ---

    /// Insert a batch of measurement rows for one series.
    async fn insert_rows(&mut self, series_id: SeriesId, rows: &[RowRecord]) -> GatewayResult<()>;

    /// Insert a batch of meta entries for one series.
    async fn insert_meta(&mut self, series_id: SeriesId, meta: &[NoteRecord])
    -> GatewayResult<()>;

    /// Insert a batch of comments for one series.
    async fn insert_comments(
        &mut self,
        series_id: SeriesId,
        comments: &[NoteRecord],
    ) -> GatewayResult<()>;

    // --- Series ---

    /// Update the last-modified timestamp of a series.
    async fn touch_series(
        &mut self,
        series_id: SeriesId,
        updated_at: OffsetDateTime,
    ) -> GatewayResult<()>;

    /// Insert a new series and return its generated id.
    ///
    /// Returns [`GatewayError::Conflict`](crate::GatewayError::Conflict) if
    /// the title is already stored.
    async fn create_series(
        &mut self,
        title: &str,
        added_at: OffsetDateTime,
    ) -> GatewayResult<SeriesId>;

    /// List every stored series.
    async fn list_series(&mut self) -> GatewayResult<Vec<SeriesRecord>>;
}
