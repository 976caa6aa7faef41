//! Detail page → coupon URL resolution cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A third-party detail page resolved to its marketplace coupon URL.
///
/// Written once per detail page and never expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedUrlMapping {
    pub scraped_url: String,
    pub coupon_url: String,
    /// Discovery source that produced the mapping
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl ScrapedUrlMapping {
    pub fn new(
        scraped_url: impl Into<String>,
        coupon_url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            scraped_url: scraped_url.into(),
            coupon_url: coupon_url.into(),
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}
