//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Upper bound for the refresh hour windows (about a century).
const MAX_REFRESH_HOURS: i64 = 876_000;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Discovery source limits and worker pools
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Round loop and batch validation
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Smart refresh thresholds
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Where persisted state lives
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.sources.page_workers == 0 || self.sources.detail_workers == 0 {
            return Err(AppError::validation(
                "sources.page_workers and sources.detail_workers must be > 0",
            ));
        }
        if self.sources.queue_capacity == 0 {
            return Err(AppError::validation("sources.queue_capacity must be > 0"));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(AppError::validation("scheduler.interval_secs must be > 0"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(AppError::validation("scheduler.batch_size must be > 0"));
        }
        if self.scheduler.validation_workers == 0 {
            return Err(AppError::validation(
                "scheduler.validation_workers must be > 0",
            ));
        }
        for (name, hours) in [
            ("refresh.expiring_hours", self.refresh.expiring_hours),
            ("refresh.stale_hours", self.refresh.stale_hours),
            ("refresh.expired_recheck_hours", self.refresh.expired_recheck_hours),
        ] {
            if !(0..=MAX_REFRESH_HOURS).contains(&hours) {
                return Err(AppError::validation(format!(
                    "{name} must be between 0 and {MAX_REFRESH_HOURS}, got {hours}"
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Discovery source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Page size requested from the real.discount API
    #[serde(default = "defaults::real_discount_limit")]
    pub real_discount_limit: usize,

    /// Number of coupon URLs to collect from e-next
    #[serde(default = "defaults::enext_limit")]
    pub enext_limit: usize,

    /// Concurrent list-page fetches
    #[serde(default = "defaults::workers")]
    pub page_workers: usize,

    /// Concurrent detail-page resolvers
    #[serde(default = "defaults::workers")]
    pub detail_workers: usize,

    /// Capacity of the detail-link queue
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,

    /// How long a detail worker waits on an empty queue before re-checking
    #[serde(default = "defaults::queue_poll_ms")]
    pub queue_poll_ms: u64,

    /// Grace period for list-page workers once scheduling stops
    #[serde(default = "defaults::producer_grace")]
    pub producer_grace_secs: u64,

    /// Grace period for detail workers once production is done
    #[serde(default = "defaults::consumer_grace")]
    pub consumer_grace_secs: u64,
}

impl SourcesConfig {
    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn producer_grace(&self) -> Duration {
        Duration::from_secs(self.producer_grace_secs)
    }

    pub fn consumer_grace(&self) -> Duration {
        Duration::from_secs(self.consumer_grace_secs)
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            real_discount_limit: defaults::real_discount_limit(),
            enext_limit: defaults::enext_limit(),
            page_workers: defaults::workers(),
            detail_workers: defaults::workers(),
            queue_capacity: defaults::queue_capacity(),
            queue_poll_ms: defaults::queue_poll_ms(),
            producer_grace_secs: defaults::producer_grace(),
            consumer_grace_secs: defaults::consumer_grace(),
        }
    }
}

/// Round loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Target time between round starts
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// URLs validated per batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Concurrent validations within a batch
    #[serde(default = "defaults::workers")]
    pub validation_workers: usize,

    /// Skip known-good coupons and recently confirmed dead links
    #[serde(default = "defaults::smart_refresh")]
    pub smart_refresh: bool,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            batch_size: defaults::batch_size(),
            validation_workers: defaults::workers(),
            smart_refresh: defaults::smart_refresh(),
        }
    }
}

/// Thresholds deciding which stored coupons are due for re-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Coupons expiring within this many hours are refreshed
    #[serde(default = "defaults::expiring_hours")]
    pub expiring_hours: i64,

    /// Coupons with fewer remaining uses are refreshed
    #[serde(default = "defaults::min_uses_remaining")]
    pub min_uses_remaining: i64,

    /// Coupons not updated for this many hours are refreshed
    #[serde(default = "defaults::stale_hours")]
    pub stale_hours: i64,

    /// Expired links confirmed within this many hours are not re-checked
    #[serde(default = "defaults::expired_recheck_hours")]
    pub expired_recheck_hours: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            expiring_hours: defaults::expiring_hours(),
            min_uses_remaining: defaults::min_uses_remaining(),
            stale_hours: defaults::stale_hours(),
            expired_recheck_hours: defaults::expired_recheck_hours(),
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
        }
    }
}

mod defaults {
    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; coupon-crawler/0.1)".into()
    }
    pub fn timeout() -> u64 {
        10
    }

    // Source defaults
    pub fn real_discount_limit() -> usize {
        500
    }
    pub fn enext_limit() -> usize {
        300
    }
    pub fn workers() -> usize {
        8
    }
    pub fn queue_capacity() -> usize {
        256
    }
    pub fn queue_poll_ms() -> u64 {
        1000
    }
    pub fn producer_grace() -> u64 {
        60
    }
    pub fn consumer_grace() -> u64 {
        30
    }

    // Scheduler defaults
    pub fn interval() -> u64 {
        900
    }
    pub fn batch_size() -> usize {
        100
    }
    pub fn smart_refresh() -> bool {
        true
    }

    // Refresh defaults
    pub fn expiring_hours() -> i64 {
        2
    }
    pub fn min_uses_remaining() -> i64 {
        50
    }
    pub fn stale_hours() -> i64 {
        1
    }
    pub fn expired_recheck_hours() -> i64 {
        12
    }

    pub fn storage_dir() -> String {
        "storage".into()
    }
}
