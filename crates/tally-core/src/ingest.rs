//! Ingestion contract used by request handlers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::gateway::{PersistenceGateway, SeriesId};
use crate::registry::SeriesRegistry;
use crate::series::{AppendOutcome, SeriesInfo};

/// One incoming event, already parsed and validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Series title; an empty title makes the push a no-op.
    #[serde(default)]
    pub title: String,
    /// Sub-entity the value belongs to (0 when absent).
    #[serde(default)]
    pub object_id: Option<i64>,
    /// Value to add (1 when absent, so a bare push counts an event).
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub meta: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl PushEvent {
    /// Event that adds `value` to `title`.
    pub fn new(title: impl Into<String>, value: f64) -> Self {
        Self {
            title: title.into(),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn object_id(mut self, object_id: i64) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushOutcome {
    /// Empty title; nothing was recorded.
    Ignored,
    /// The event was buffered.
    Accepted {
        series_id: SeriesId,
        row: AppendOutcome,
    },
}

impl PushOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl<G: PersistenceGateway + 'static> SeriesRegistry<G> {
    /// Buffer one event, creating its series on first use.
    ///
    /// The row is bucketed at arrival time. Meta and comment text, when
    /// present and non-empty, are stored alongside with the same object id.
    /// A non-finite value is refused before the series is created.
    pub async fn push(&self, event: PushEvent) -> Result<PushOutcome> {
        if event.title.is_empty() {
            return Ok(PushOutcome::Ignored);
        }
        let value = event.value.unwrap_or(1.0);
        if !value.is_finite() {
            return Err(Error::NonFinite {
                title: event.title,
                value,
            });
        }

        let series = match self.get(&event.title).await {
            Some(series) => series,
            None => self.create(&event.title).await?,
        };

        let now = OffsetDateTime::now_utc();
        let bucket = self.options().bucketing.bucket_start(now);
        let object_id = event.object_id.unwrap_or(0);

        let mut series = series.lock().await;
        let row = series.append_row(object_id, bucket, value)?;
        if let Some(meta) = event.meta.filter(|m| !m.is_empty()) {
            series.append_meta(meta, object_id, now);
        }
        if let Some(comment) = event.comment.filter(|c| !c.is_empty()) {
            series.append_comment(comment, object_id, now);
        }

        Ok(PushOutcome::Accepted {
            series_id: series.id(),
            row,
        })
    }

    /// Snapshot of a series, without creating it.
    pub async fn info(&self, title: &str) -> Option<SeriesInfo> {
        let series = self.get(title).await?;
        let guard = series.lock().await;
        Some(guard.info())
    }
}
