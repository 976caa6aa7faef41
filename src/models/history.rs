//! Append-only validation history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CourseState;

/// Outcome tag of one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    New,
    Reactivated,
    Refreshed,
    Expired,
}

impl HistoryStatus {
    /// Status of a successful validation given the state before it.
    pub fn for_valid(previous: CourseState) -> Self {
        match previous {
            CourseState::New => Self::New,
            CourseState::Expired => Self::Reactivated,
            CourseState::Active => Self::Refreshed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reactivated => "reactivated",
            Self::Refreshed => "refreshed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub course_id: Option<i64>,
    pub title: Option<String>,
    pub coupon_url: String,
    pub status: HistoryStatus,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        coupon_url: impl Into<String>,
        course_id: Option<i64>,
        title: Option<String>,
        status: HistoryStatus,
    ) -> Self {
        Self {
            course_id,
            title,
            coupon_url: coupon_url.into(),
            status,
            created_at: Utc::now(),
        }
    }
}
