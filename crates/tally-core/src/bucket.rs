//! Time bucketing for aggregation.
//!
//! Events are stamped with their arrival time and truncated to the start of
//! a fixed-size UTC bucket. Two events aggregate into the same row only if
//! their bucket starts are equal, so the bucket size must stay the same for
//! the lifetime of a database.

use std::time::Duration;

use time::OffsetDateTime;

/// Default bucket size (one hour).
pub const DEFAULT_BUCKET: Duration = Duration::from_secs(3600);

/// Fixed-size time buckets aligned to the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucketing {
    secs: i64,
}

impl Bucketing {
    /// Create bucketing with the given bucket size.
    ///
    /// Sizes below one second are clamped to one second.
    pub fn new(size: Duration) -> Self {
        Self {
            secs: (size.as_secs() as i64).max(1),
        }
    }

    /// Bucket size.
    pub fn size(&self) -> Duration {
        Duration::from_secs(self.secs as u64)
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: OffsetDateTime) -> OffsetDateTime {
        let unix = ts.unix_timestamp();
        let start = unix - unix.rem_euclid(self.secs);
        // `start` is never later than `unix`, which is already representable.
        OffsetDateTime::from_unix_timestamp(start).unwrap_or(ts)
    }

    /// Start of the current bucket.
    pub fn current(&self) -> OffsetDateTime {
        self.bucket_start(OffsetDateTime::now_utc())
    }
}

impl Default for Bucketing {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET)
    }
}
