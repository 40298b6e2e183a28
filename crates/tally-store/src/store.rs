//! Main store implementation.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use tally_core::{
    GatewayResult, NoteRecord, PersistenceGateway, RowRecord, SeriesId, SeriesRecord,
};

use crate::error::{Error, Result};
use crate::models::{RowTotals, StoredRow};
use crate::queries::RowQuery;
use crate::schema;

/// SQLite-based store for series and their rows.
///
/// The synchronous methods are the store's own API; the
/// [`PersistenceGateway`] implementation wraps them for the sync cycle.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Whether a write transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn timestamp(secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|_| Error::InvalidTimestamp(secs))
}

// Transactions
impl Store {
    /// Open a write transaction.
    ///
    /// `IMMEDIATE` takes the write lock up front so a cycle never fails
    /// halfway through on a busy database.
    pub fn begin_write(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::Transaction("transaction already open"));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        debug!("Transaction opened");
        Ok(())
    }

    pub fn commit_write(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Err(Error::Transaction("no transaction open"));
        }
        self.conn.execute_batch("COMMIT")?;
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction, if any.
    pub fn rollback_write(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

// Series operations
impl Store {
    /// Insert a new series and return its id.
    pub fn add_series(&mut self, title: &str, added_at: OffsetDateTime) -> Result<SeriesId> {
        let ts = added_at.unix_timestamp();
        let inserted = self
            .conn
            .prepare_cached("INSERT INTO series (title, added_at, updated_at) VALUES (?1, ?2, ?2)")?
            .execute(params![title, ts]);

        match inserted.map_err(Error::from) {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) if e.is_unique_violation() => Err(Error::DuplicateTitle(title.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Set a series' `updated_at`.
    pub fn touch(&mut self, series_id: SeriesId, updated_at: OffsetDateTime) -> Result<()> {
        let changed = self
            .conn
            .prepare_cached("UPDATE series SET updated_at = ?2 WHERE id = ?1")?
            .execute(params![series_id, updated_at.unix_timestamp()])?;

        if changed == 0 {
            return Err(Error::SeriesNotFound(series_id));
        }
        Ok(())
    }

    /// List all series, oldest id first.
    pub fn all_series(&self) -> Result<Vec<SeriesRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, title, added_at, updated_at FROM series ORDER BY id")?;

        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, title, added_at, updated_at)| -> Result<SeriesRecord> {
                Ok(SeriesRecord {
                    id,
                    title,
                    added_at: timestamp(added_at)?,
                    updated_at: timestamp(updated_at)?,
                })
            })
            .collect()
    }

    /// Get a series by id.
    pub fn get_series(&self, series_id: SeriesId) -> Result<Option<SeriesRecord>> {
        let raw = self
            .conn
            .prepare_cached("SELECT title, added_at, updated_at FROM series WHERE id = ?")?
            .query_row([series_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;

        raw.map(|(title, added_at, updated_at)| -> Result<SeriesRecord> {
            Ok(SeriesRecord {
                id: series_id,
                title,
                added_at: timestamp(added_at)?,
                updated_at: timestamp(updated_at)?,
            })
        })
        .transpose()
    }

    /// Get a series by title.
    pub fn find_series(&self, title: &str) -> Result<Option<SeriesRecord>> {
        let id: Option<i64> = self
            .conn
            .prepare_cached("SELECT id FROM series WHERE title = ?")?
            .query_row([title], |row| row.get(0))
            .optional()?;

        match id {
            Some(id) => self.get_series(id),
            None => Ok(None),
        }
    }
}

// Batch inserts
impl Store {
    /// Insert a batch of rows. The batch is all-or-nothing.
    pub fn insert_row_batch(&mut self, series_id: SeriesId, rows: &[RowRecord]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sp = self.conn.savepoint()?;
        {
            let mut stmt = sp.prepare_cached(
                "INSERT INTO data (series_id, ts, value, object_id, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                stmt.execute(params![
                    series_id,
                    row.timestamp.unix_timestamp(),
                    row.value,
                    row.object_id,
                    row.amount,
                ])?;
            }
        }
        sp.commit()?;

        debug!("Inserted {} rows for series {}", rows.len(), series_id);
        Ok(rows.len())
    }

    /// Insert a batch of meta entries. The batch is all-or-nothing.
    pub fn insert_meta_batch(
        &mut self,
        series_id: SeriesId,
        notes: &[NoteRecord],
    ) -> Result<usize> {
        self.insert_notes(
            "INSERT INTO meta (series_id, ts, value, object_id) VALUES (?1, ?2, ?3, ?4)",
            series_id,
            notes,
        )
    }

    /// Insert a batch of comments. The batch is all-or-nothing.
    pub fn insert_comment_batch(
        &mut self,
        series_id: SeriesId,
        notes: &[NoteRecord],
    ) -> Result<usize> {
        self.insert_notes(
            "INSERT INTO comment (series_id, ts, value, object_id) VALUES (?1, ?2, ?3, ?4)",
            series_id,
            notes,
        )
    }

    fn insert_notes(
        &mut self,
        sql: &str,
        series_id: SeriesId,
        notes: &[NoteRecord],
    ) -> Result<usize> {
        if notes.is_empty() {
            return Ok(0);
        }

        let sp = self.conn.savepoint()?;
        {
            let mut stmt = sp.prepare_cached(sql)?;
            for note in notes {
                stmt.execute(params![
                    series_id,
                    note.timestamp.unix_timestamp(),
                    note.value,
                    note.object_id,
                ])?;
            }
        }
        sp.commit()?;
        Ok(notes.len())
    }
}

// Reads
impl Store {
    /// Query stored rows with filters.
    pub fn query_rows(&self, query: &RowQuery) -> Result<Vec<StoredRow>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, series_id, ts, value, object_id, amount)| -> Result<StoredRow> {
                Ok(StoredRow {
                    id,
                    series_id,
                    timestamp: timestamp(ts)?,
                    value,
                    object_id,
                    amount,
                })
            })
            .collect()
    }

    /// Count rows, optionally for one series.
    pub fn count_rows(&self, series_id: Option<SeriesId>) -> Result<u64> {
        self.count("data", series_id)
    }

    pub fn count_meta(&self, series_id: Option<SeriesId>) -> Result<u64> {
        self.count("meta", series_id)
    }

    pub fn count_comments(&self, series_id: Option<SeriesId>) -> Result<u64> {
        self.count("comment", series_id)
    }

    pub fn count_series(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM series", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count(&self, table: &str, series_id: Option<SeriesId>) -> Result<u64> {
        let count: i64 = match series_id {
            Some(id) => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE series_id = ?", table),
                [id],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?,
        };

        Ok(count as u64)
    }

    /// Totals over every row of a series.
    pub fn sum_rows(&self, series_id: SeriesId) -> Result<RowTotals> {
        let (rows, value, amount): (i64, f64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(value), 0.0), COALESCE(SUM(amount), 0)
             FROM data WHERE series_id = ?",
            [series_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(RowTotals {
            rows: rows as u64,
            value,
            amount: amount as u64,
        })
    }
}

#[async_trait]
impl PersistenceGateway for Store {
    async fn begin_transaction(&mut self) -> GatewayResult<()> {
        self.begin_write()
            .map_err(|e| e.into_gateway("begin_transaction"))
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        self.commit_write().map_err(|e| e.into_gateway("commit"))
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        self.rollback_write().map_err(|e| {
            warn!("Rollback failed: {}", e);
            e.into_gateway("rollback")
        })
    }

    async fn insert_rows(&mut self, series_id: SeriesId, rows: &[RowRecord]) -> GatewayResult<()> {
        self.insert_row_batch(series_id, rows)
            .map(|_| ())
            .map_err(|e| e.into_gateway("insert_rows"))
    }

    async fn insert_meta(&mut self, series_id: SeriesId, meta: &[NoteRecord]) -> GatewayResult<()> {
        self.insert_meta_batch(series_id, meta)
            .map(|_| ())
            .map_err(|e| e.into_gateway("insert_meta"))
    }

    async fn insert_comments(
        &mut self,
        series_id: SeriesId,
        comments: &[NoteRecord],
    ) -> GatewayResult<()> {
        self.insert_comment_batch(series_id, comments)
            .map(|_| ())
            .map_err(|e| e.into_gateway("insert_comments"))
    }

    async fn touch_series(
        &mut self,
        series_id: SeriesId,
        updated_at: OffsetDateTime,
    ) -> GatewayResult<()> {
        self.touch(series_id, updated_at)
            .map_err(|e| e.into_gateway("touch_series"))
    }

    async fn create_series(
        &mut self,
        title: &str,
        added_at: OffsetDateTime,
    ) -> GatewayResult<SeriesId> {
        self.add_series(title, added_at)
            .map_err(|e| e.into_gateway("create_series"))
    }

    async fn list_series(&mut self) -> GatewayResult<Vec<SeriesRecord>> {
        self.all_series().map_err(|e| e.into_gateway("list_series"))
    }
}
