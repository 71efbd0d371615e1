//! Retention policy and retry backoff
//!
//! Retention is tiered by tag: every scheduled backup is tagged with the
//! tier it was created for, and pruning keeps the newest N usable backups
//! of each tier regardless of wall-clock gaps. A quiet week therefore
//! never erodes coverage; the tiers count backups, not days.

use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Which tier a scheduled backup belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Daily,
    Weekly,
}

impl Tier {
    /// Tag stored on the backup record for this tier.
    pub fn tag(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
        }
    }

    /// Tier for a backup taken at `when`. Sunday runs count as the weekly
    /// backup; every other day is daily.
    pub fn for_timestamp(when: DateTime<Utc>) -> Tier {
        if when.weekday() == Weekday::Sun {
            Tier::Weekly
        } else {
            Tier::Daily
        }
    }
}

/// How many backups each tier keeps, and how long a backup lives before
/// it becomes a pruning candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Newest daily-tagged backups that are never pruned.
    pub keep_daily: usize,
    /// Newest weekly-tagged backups that are never pruned.
    pub keep_weekly: usize,
    /// Days before a daily backup's expiry deadline.
    pub daily_window_days: i64,
    /// Days before a weekly backup's expiry deadline.
    pub weekly_window_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_daily: 7,
            keep_weekly: 4,
            daily_window_days: 7,
            weekly_window_days: 28,
        }
    }
}

impl RetentionPolicy {
    /// Expiry deadline for a backup of `tier` taken at `when`.
    pub fn expiry_for(&self, tier: Tier, when: DateTime<Utc>) -> DateTime<Utc> {
        let days = match tier {
            Tier::Daily => self.daily_window_days,
            Tier::Weekly => self.weekly_window_days,
        };
        when + chrono::Duration::days(days)
    }
}

/// Exponential backoff for retrying transient backup failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }
}
