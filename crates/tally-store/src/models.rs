//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use tally_core::SeriesId;

/// An aggregated row read back from the `data` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Database row ID.
    pub id: i64,
    pub series_id: SeriesId,
    /// Start of the bucket this row aggregates.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Sum of the aggregated event values.
    pub value: f64,
    pub object_id: i64,
    /// Number of events aggregated into this row.
    pub amount: u32,
}

/// Totals over the rows of one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RowTotals {
    /// Number of stored rows.
    pub rows: u64,
    /// Sum of `value` across rows.
    pub value: f64,
    /// Sum of `amount` across rows, i.e. number of events.
    pub amount: u64,
}
