//! Quota Keeper (C3): per-user rate limiting ahead of admission.
//!
//! The mandatory bucket is a rolling daily counter. An optional,
//! independently-reset hourly bucket can be layered on top (disabled by
//! default) via `QuotaKeeper::hourly_limit`, for deployments that want a
//! finer-grained throttle alongside the daily one.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Bucket {
    used: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaVerdict {
    Allow,
    Exceeded { retry_after_secs: u64 },
}

pub struct QuotaKeeper {
    daily_limit: u32,
    hourly_limit: Option<u32>,
    daily: DashMap<String, Bucket>,
    hourly: DashMap<String, Bucket>,
}

impl QuotaKeeper {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            hourly_limit: None,
            daily: DashMap::new(),
            hourly: DashMap::new(),
        }
    }

    pub fn with_hourly_limit(mut self, hourly_limit: u32) -> Self {
        self.hourly_limit = Some(hourly_limit);
        self
    }

    /// Checks and, if allowed, consumes one unit of quota for `user_id`.
    /// The daily bucket is always checked; the hourly bucket is checked
    /// only when configured. Whichever bucket is exhausted first
    /// determines `retry_after_secs`.
    pub fn check_and_consume(&self, user_id: &str) -> QuotaVerdict {
        let now = Utc::now();

        if let Some(hourly_limit) = self.hourly_limit {
            if let Some(verdict) =
                check_bucket(&self.hourly, user_id, hourly_limit, ChronoDuration::hours(1), now)
            {
                if let QuotaVerdict::Exceeded { .. } = verdict {
                    return verdict;
                }
            }
        }

        check_bucket(&self.daily, user_id, self.daily_limit, ChronoDuration::days(1), now)
            .unwrap_or(QuotaVerdict::Allow)
    }
}

/// Evaluates and consumes quota for one bucket kind. Returns `None` only
/// when called with a non-exceeding hourly check that should fall
/// through to the daily check as well (both are consumed together on an
/// `Allow`).
fn check_bucket(
    map: &DashMap<String, Bucket>,
    user_id: &str,
    limit: u32,
    period: ChronoDuration,
    now: DateTime<Utc>,
) -> Option<QuotaVerdict> {
    let mut entry = map.entry(user_id.to_string()).or_insert_with(|| Bucket {
        used: 0,
        reset_at: now + period,
    });

    if now >= entry.reset_at {
        entry.used = 0;
        entry.reset_at = now + period;
    }

    if entry.used >= limit {
        let retry_after_secs = (entry.reset_at - now).num_seconds().max(1) as u64;
        return Some(QuotaVerdict::Exceeded { retry_after_secs });
    }

    entry.used += 1;
    Some(QuotaVerdict::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_daily_limit_then_exceeds() {
        let keeper = QuotaKeeper::new(2);
        assert_eq!(keeper.check_and_consume("u1"), QuotaVerdict::Allow);
        assert_eq!(keeper.check_and_consume("u1"), QuotaVerdict::Allow);
        match keeper.check_and_consume("u1") {
            QuotaVerdict::Exceeded { retry_after_secs } => assert!(retry_after_secs >= 1),
            QuotaVerdict::Allow => panic!("expected exceeded"),
        }
    }

    #[test]
    fn separate_users_have_separate_buckets() {
        let keeper = QuotaKeeper::new(1);
        assert_eq!(keeper.check_and_consume("u1"), QuotaVerdict::Allow);
        assert_eq!(keeper.check_and_consume("u2"), QuotaVerdict::Allow);
    }

    #[test]
    fn hourly_bucket_can_exhaust_before_daily() {
        let keeper = QuotaKeeper::new(100).with_hourly_limit(1);
        assert_eq!(keeper.check_and_consume("u1"), QuotaVerdict::Allow);
        assert!(matches!(keeper.check_and_consume("u1"), QuotaVerdict::Exceeded { .. }));
    }

    #[test]
    fn hourly_disabled_by_default() {
        let keeper = QuotaKeeper::new(5);
        for _ in 0..5 {
            assert_eq!(keeper.check_and_consume("u1"), QuotaVerdict::Allow);
        }
    }
}
