//! Refresh filter.
//!
//! Decides which URLs a round validates: coupons due for refresh always,
//! discovered coupons unless recently confirmed dead, and nothing else.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{AppError, Result};
use crate::models::RefreshConfig;

/// Cut-off instants for one round, computed from [`RefreshConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshThresholds {
    /// Active coupons expiring at or before this are due
    pub expiry_threshold: DateTime<Utc>,
    /// Active coupons with fewer uses left are due
    pub min_uses_remaining: i64,
    /// Active coupons last updated at or before this are due
    pub stale_before: DateTime<Utc>,
    /// Expired URLs confirmed after this are skipped
    pub expired_since: DateTime<Utc>,
}

impl RefreshThresholds {
    /// Thresholds relative to `now`. Fails if an hour setting is out of range.
    pub fn at(config: &RefreshConfig, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            expiry_threshold: shift(now, config.expiring_hours, "refresh.expiring_hours")?,
            min_uses_remaining: config.min_uses_remaining,
            stale_before: shift(now, -config.stale_hours, "refresh.stale_hours")?,
            expired_since: shift(
                now,
                -config.expired_recheck_hours,
                "refresh.expired_recheck_hours",
            )?,
        })
    }
}

fn shift(now: DateTime<Utc>, hours: i64, field: &str) -> Result<DateTime<Utc>> {
    TimeDelta::try_hours(hours)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| AppError::validation(format!("{field} out of range: {hours}")))
}

/// Store lookups the filter decides against.
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    /// Active coupons due for re-validation
    pub needs_refresh: HashSet<String>,
    /// Expired URLs confirmed within the lookback window
    pub recently_expired: HashSet<String>,
    /// Every URL currently in the catalog
    pub known_active: HashSet<String>,
}

impl RefreshPlan {
    fn include(&self, url: &str, discovered: &HashSet<&str>) -> bool {
        if self.needs_refresh.contains(url) {
            return true;
        }
        if discovered.contains(url) {
            return !self.recently_expired.contains(url);
        }
        !self.known_active.contains(url)
    }
}

/// Select the URLs to validate this round.
///
/// Candidates are the discovered URLs followed by the refresh-due ones.
/// Blank URLs and duplicates are dropped; first-seen order is kept.
pub fn select_candidates(discovered: &[String], plan: &RefreshPlan) -> Vec<String> {
    let discovered_set: HashSet<&str> = discovered.iter().map(String::as_str).collect();

    let mut refresh: Vec<&String> = plan.needs_refresh.iter().collect();
    refresh.sort();

    let mut seen = HashSet::new();
    discovered
        .iter()
        .chain(refresh)
        .filter(|url| !url.trim().is_empty())
        .filter(|url| seen.insert(url.as_str()))
        .filter(|url| plan.include(url, &discovered_set))
        .cloned()
        .collect()
}

/// Discovered URLs without any filtering, deduplicated.
pub fn dedup_discovered(discovered: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    discovered
        .iter()
        .filter(|url| !url.trim().is_empty())
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_recently_expired_discovered_url_is_skipped() {
        let plan = RefreshPlan {
            recently_expired: set(&["A"]),
            ..RefreshPlan::default()
        };
        assert_eq!(select_candidates(&urls(&["A", "B"]), &plan), urls(&["B"]));
    }

    #[test]
    fn test_refresh_due_always_included() {
        let plan = RefreshPlan {
            needs_refresh: set(&["A", "C"]),
            recently_expired: set(&["A", "C"]),
            known_active: set(&["A", "C"]),
        };
        let selected = select_candidates(&urls(&["A", "B"]), &plan);
        assert_eq!(selected, urls(&["A", "B", "C"]));
    }

    #[test]
    fn test_discovered_known_active_url_is_rechecked() {
        let plan = RefreshPlan {
            known_active: set(&["A"]),
            ..RefreshPlan::default()
        };
        assert_eq!(select_candidates(&urls(&["A"]), &plan), urls(&["A"]));
    }

    #[test]
    fn test_blank_and_duplicate_urls_dropped() {
        let plan = RefreshPlan {
            needs_refresh: set(&["B"]),
            ..RefreshPlan::default()
        };
        let selected = select_candidates(&urls(&["B", "", "  ", "A", "B", "A"]), &plan);
        assert_eq!(selected, urls(&["B", "A"]));
    }

    #[test]
    fn test_thresholds() {
        let now = Utc::now();
        let config = RefreshConfig {
            expiring_hours: 2,
            min_uses_remaining: 50,
            stale_hours: 1,
            expired_recheck_hours: 12,
        };
        let t = RefreshThresholds::at(&config, now).unwrap();
        assert_eq!(t.expiry_threshold, now + TimeDelta::hours(2));
        assert_eq!(t.stale_before, now - TimeDelta::hours(1));
        assert_eq!(t.expired_since, now - TimeDelta::hours(12));
        assert_eq!(t.min_uses_remaining, 50);
    }

    #[test]
    fn test_out_of_range_hours_are_errors() {
        let now = Utc::now();
        let config = RefreshConfig {
            expiring_hours: 3_000_000_000,
            ..RefreshConfig::default()
        };
        assert!(matches!(
            RefreshThresholds::at(&config, now),
            Err(AppError::Validation(_))
        ));

        let config = RefreshConfig {
            expired_recheck_hours: i64::MAX,
            ..RefreshConfig::default()
        };
        assert!(RefreshThresholds::at(&config, now).is_err());
    }

    #[test]
    fn test_dedup_discovered() {
        assert_eq!(
            dedup_discovered(&urls(&["A", "", "B", "A"])),
            urls(&["A", "B"])
        );
    }
}
