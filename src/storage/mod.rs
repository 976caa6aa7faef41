//! Storage abstractions for coupon persistence.
//!
//! The crawl core only talks to these traits. [`LocalStorage`] implements all
//! of them, either purely in memory or backed by JSON files:
//!
//! ```text
//! storage/
//! ├── config.toml           # Crawler configuration
//! ├── catalog.json          # Active coupons, keyed by course id
//! ├── expired.json          # Coupons confirmed invalid, keyed by URL
//! ├── mappings.json         # Detail page → coupon URL cache
//! ├── history.jsonl         # Append-only validation log (JSON lines)
//! └── round_state.json      # Last completed round (epoch millis)
//! ```

pub mod local;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CourseRecord, ExpiredRecord, HistoryEntry, ScrapedUrlMapping};

// Re-export for convenience
pub use local::LocalStorage;

/// Store of currently valid coupons.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_id(&self, course_id: i64) -> Result<Option<CourseRecord>>;

    async fn find_by_url(&self, coupon_url: &str) -> Result<Option<CourseRecord>>;

    /// Insert or replace by course id, keeping the original `created_at`.
    async fn upsert(&self, record: CourseRecord) -> Result<()>;

    async fn delete_by_url(&self, coupon_url: &str) -> Result<()>;

    async fn all_urls(&self) -> Result<HashSet<String>>;

    /// URLs expiring by `expiry_threshold`, with fewer than `min_uses_remaining`
    /// uses left, or last updated at or before `stale_before`.
    async fn urls_needing_refresh(
        &self,
        expiry_threshold: DateTime<Utc>,
        min_uses_remaining: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<HashSet<String>>;
}

/// Store of coupon URLs confirmed invalid.
#[async_trait]
pub trait ExpiredStore: Send + Sync {
    async fn find_by_url(&self, coupon_url: &str) -> Result<Option<ExpiredRecord>>;

    async fn upsert(&self, record: ExpiredRecord) -> Result<()>;

    async fn delete_by_url(&self, coupon_url: &str) -> Result<()>;

    /// URLs confirmed expired strictly after `since`.
    async fn recently_confirmed_expired_urls(&self, since: DateTime<Utc>)
    -> Result<HashSet<String>>;

    /// Mark the given URLs as re-confirmed now.
    async fn touch_updated_at(&self, coupon_urls: &HashSet<String>) -> Result<()>;
}

/// Detail page resolution cache.
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    async fn find_by_scraped_url(&self, scraped_url: &str) -> Result<Option<ScrapedUrlMapping>>;

    async fn save(&self, mapping: ScrapedUrlMapping) -> Result<()>;
}

/// Append-only validation log.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append_all(&self, entries: Vec<HistoryEntry>) -> Result<()>;
}

/// Single durable cell holding the last round time.
#[async_trait]
pub trait RoundStateStore: Send + Sync {
    /// Epoch milliseconds of the last completed round, if any.
    async fn load_last_round(&self) -> Result<Option<i64>>;

    async fn save_last_round(&self, epoch_millis: i64) -> Result<()>;
}

/// The set of stores a crawl round reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub expired: Arc<dyn ExpiredStore>,
    pub cache: Arc<dyn ResolutionCache>,
    pub history: Arc<dyn HistoryLog>,
    pub round_state: Arc<dyn RoundStateStore>,
}

impl Stores {
    /// Back every store with the same [`LocalStorage`].
    pub fn local(storage: Arc<LocalStorage>) -> Self {
        Self {
            catalog: storage.clone(),
            expired: storage.clone(),
            cache: storage.clone(),
            history: storage.clone(),
            round_state: storage,
        }
    }
}
