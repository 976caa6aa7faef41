//! Validated course + coupon record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a coupon URL currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseState {
    /// Never seen before
    New,
    /// Stored in the catalog
    Active,
    /// Stored in the expired set
    Expired,
}

/// A course with a currently free coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// Marketplace course id (stable across coupon URL changes)
    pub course_id: i64,

    pub category: String,
    pub subcategory: String,
    pub title: String,
    pub level: String,
    pub author: String,

    /// Estimated content length in minutes
    pub content_length: i64,
    pub rating: f64,
    pub reviews: i64,
    pub students: i64,

    pub coupon_code: String,
    pub coupon_url: String,

    /// Campaign end time
    pub expires_at: DateTime<Utc>,
    pub uses_remaining: i64,

    pub preview_image: String,
    pub preview_video: String,
    pub heading: String,
    pub description: String,
    pub language: String,

    /// True when the coupon was seen for the first time in the last round
    #[serde(default)]
    pub is_new: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseRecord {
    /// Whether a stored coupon is due for re-validation.
    pub fn needs_refresh(
        &self,
        expiry_threshold: DateTime<Utc>,
        min_uses_remaining: i64,
        stale_before: DateTime<Utc>,
    ) -> bool {
        self.expires_at <= expiry_threshold
            || self.uses_remaining < min_uses_remaining
            || self.updated_at <= stale_before
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::fixtures::record;

    #[test]
    fn test_needs_refresh_by_expiry() {
        let now = chrono::Utc::now();
        let mut course = record(1, "https://www.udemy.com/course/a/?couponCode=A");
        course.expires_at = now + Duration::minutes(30);

        assert!(course.needs_refresh(now + Duration::hours(2), 50, now - Duration::hours(1)));
    }

    #[test]
    fn test_needs_refresh_by_uses_and_staleness() {
        let now = chrono::Utc::now();
        let mut course = record(1, "https://www.udemy.com/course/a/?couponCode=A");
        let threshold = now + Duration::hours(2);
        let stale_before = now - Duration::hours(1);

        assert!(!course.needs_refresh(threshold, 50, stale_before));

        course.uses_remaining = 10;
        assert!(course.needs_refresh(threshold, 50, stale_before));

        course.uses_remaining = 500;
        course.updated_at = now - Duration::hours(3);
        assert!(course.needs_refresh(threshold, 50, stale_before));
    }
}
