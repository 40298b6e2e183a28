//! HTTP ingestion service for tally time series.
//!
//! This crate provides a service that:
//! - Accepts events over HTTP and buffers them in a [`tally_core::SeriesRegistry`]
//! - Periodically syncs buffered rows to a SQLite store
//! - Exposes status and manual sync control endpoints
//!
//! See [`api`] for the endpoint list.
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/tally/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/tally/data.db"
//!
//! [sync]
//! interval_secs = 10
//! vacuum_every = 5
//! bucket_secs = 3600
//! flush_on_shutdown = true
//! ```

pub mod api;
pub mod config;
pub mod state;

pub use config::{Config, ConfigError, ServerConfig, StorageConfig, SyncConfig, ValidationError};
pub use state::{AppState, SchedulerControl};
