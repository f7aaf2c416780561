// src/sync/policy.rs
use chrono::{DateTime, Duration, Utc};

pub const REFRESH_WINDOW_DAYS: i64 = 7;
pub const MAX_AGE_DAYS: i64 = 60;
pub const HARD_DELETE_GRACE_DAYS: i64 = 30;

/// Lifecycle constants for pipeline-managed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub refresh_window: Duration,
    pub max_age: Duration,
    pub hard_delete_grace: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            refresh_window: Duration::days(REFRESH_WINDOW_DAYS),
            max_age: Duration::days(MAX_AGE_DAYS),
            hard_delete_grace: Duration::days(HARD_DELETE_GRACE_DAYS),
        }
    }
}

impl ExpirationPolicy {
    /// `min(now + refresh_window, posted + max_age)`. A listing seen on every
    /// run slides forward a week at a time, never past its max age.
    pub fn expiration_for(&self, posted: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        (now + self.refresh_window).min(posted + self.max_age)
    }

    pub fn is_expired(&self, expiration: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expiration < now
    }

    pub fn is_deletable(&self, expiration: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expiration < now - self.hard_delete_grace
    }
}
