//! Coupons confirmed invalid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A coupon URL that failed validation, keyed by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredRecord {
    pub coupon_url: String,

    /// Course id, reused on recheck to skip the landing page fetch
    #[serde(default)]
    pub course_id: Option<i64>,

    #[serde(default)]
    pub title: Option<String>,

    /// When the URL was first marked expired
    pub created_at: DateTime<Utc>,

    /// When the URL was last confirmed expired
    pub updated_at: DateTime<Utc>,
}

impl ExpiredRecord {
    pub fn new(
        coupon_url: impl Into<String>,
        course_id: Option<i64>,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            coupon_url: coupon_url.into(),
            course_id,
            title,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill in course id and title if they were unknown. Returns true if anything changed.
    pub fn backfill(&mut self, course_id: Option<i64>, title: Option<&str>) -> bool {
        let mut changed = false;
        if self.course_id.is_none() && course_id.is_some() {
            self.course_id = course_id;
            changed = true;
        }
        if self.title.is_none() {
            if let Some(title) = title {
                self.title = Some(title.to_string());
                changed = true;
            }
        }
        changed
    }
}
