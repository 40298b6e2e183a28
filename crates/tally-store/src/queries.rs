//! Query builder for stored rows.
//!
//! # Example
//!
//! ```
//! use tally_store::{Store, RowQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = RowQuery::new()
//!     .series(1)
//!     .since(yesterday)
//!     .limit(50);
//!
//! let rows = store.query_rows(&query)?;
//! # Ok::<(), tally_store::Error>(())
//! ```

use time::OffsetDateTime;

use tally_core::SeriesId;

/// Fluent query builder for [`Store::query_rows`](crate::Store::query_rows).
///
/// By default, queries return rows ordered by bucket time descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct RowQuery {
    pub series_id: Option<SeriesId>,
    pub object_id: Option<i64>,
    /// Include only rows at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only rows at or before this time.
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl RowQuery {
    /// Create a query over all rows, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn series(mut self, series_id: SeriesId) -> Self {
        self.series_id = Some(series_id);
        self
    }

    pub fn object(mut self, object_id: i64) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(series_id) = self.series_id {
            conditions.push("series_id = ?");
            params.push(Box::new(series_id));
        }

        if let Some(object_id) = self.object_id {
            conditions.push("object_id = ?");
            params.push(Box::new(object_id));
        }

        if let Some(since) = self.since {
            conditions.push("ts >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("ts <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, series_id, ts, value, object_id, amount \
             FROM data {} ORDER BY ts {}, id {}",
            where_clause, order, order
        );

        // SQLite requires a LIMIT before OFFSET.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
