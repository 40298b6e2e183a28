//! SQLite persistence for tally series.
//!
//! This crate provides [`Store`], the SQLite implementation of
//! [`tally_core::PersistenceGateway`], plus read helpers used by tests and
//! the service's status endpoints.
//!
//! # Features
//!
//! - One `series` row per title, with `added_at`/`updated_at`
//! - Aggregated rows in `data`, notes in `meta` and `comment`
//! - Batch inserts through cached prepared statements, each batch inside a
//!   savepoint so it is all-or-nothing
//! - Explicit write transactions spanning a whole sync cycle
//!
//! # Example
//!
//! ```no_run
//! use tally_core::{RegistryOptions, SeriesRegistry};
//! use tally_store::Store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open_default()?;
//! let registry = SeriesRegistry::load(store, RegistryOptions::default()).await?;
//! println!("{} series", registry.len().await);
//! # Ok(())
//! # }
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{RowTotals, StoredRow};
pub use queries::RowQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/tally/data.db`
/// - macOS: `~/Library/Application Support/tally/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\tally\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("tally")
        .join("data.db")
}
