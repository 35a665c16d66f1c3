//! crates/visualize_core/src/expiry.rs
//!
//! Sliding-window expiration for session records.

use chrono::{DateTime, Duration, Utc};

/// Default time-to-live of an unaccessed session (1 hour).
pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Default interval of the background expiry sweep (10 minutes).
pub const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 10;

/// Computes and checks absolute expiration timestamps from a fixed TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl: Duration,
}

impl ExpiryPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn ttl_minutes(&self) -> f64 {
        self.ttl.num_seconds() as f64 / 60.0
    }

    /// A record is live strictly before its expiry instant.
    pub fn is_live(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < expires_at
    }

    /// The expiry of a record created, read or updated at `now`.
    pub fn extend(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_TTL_MINUTES)
    }
}
