//! Crawl scheduler.
//!
//! One round is `discover → refresh set → filter → batch validate`. The
//! scheduler runs rounds forever, starting each one `interval` after the
//! previous one started, until the shutdown signal flips to `true`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Config, RefreshConfig, SchedulerConfig};
use crate::pipeline::batch::BatchValidator;
use crate::pipeline::filter::{
    RefreshPlan, RefreshThresholds, dedup_discovered, select_candidates,
};
use crate::services::CouponValidator;
use crate::services::sources::{self, CouponSource};
use crate::storage::Stores;
use crate::utils::http::Fetcher;

/// Counters for one completed round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// URLs returned by all sources, duplicates included
    pub discovered: usize,
    /// Active coupons due for refresh
    pub refresh_due: usize,
    /// URLs selected for validation
    pub candidates: usize,
    pub batches: usize,
    pub processed: usize,
    pub valid: usize,
    pub expired: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discovered, {} due for refresh, {} validated in {} batches: \
             {} valid, {} expired, {} failed ({:.1}s)",
            self.discovered,
            self.refresh_due,
            self.processed,
            self.batches,
            self.valid,
            self.expired,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Time left to wait before the next round.
pub fn delay_until_next_round(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Perpetual discovery + validation loop.
pub struct Scheduler {
    sources: Vec<Arc<dyn CouponSource>>,
    batch: BatchValidator,
    stores: Stores,
    config: SchedulerConfig,
    refresh: RefreshConfig,
}

impl Scheduler {
    pub fn new(
        sources: Vec<Arc<dyn CouponSource>>,
        validator: CouponValidator,
        stores: Stores,
        config: SchedulerConfig,
        refresh: RefreshConfig,
    ) -> Self {
        let batch = BatchValidator::new(
            validator,
            stores.clone(),
            config.batch_size,
            config.validation_workers,
        );
        Self {
            sources,
            batch,
            stores,
            config,
            refresh,
        }
    }

    /// Build a scheduler with the default sources.
    pub fn from_config(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        stores: Stores,
    ) -> Result<Self> {
        let sources =
            sources::default_sources(&config.sources, fetcher.clone(), stores.cache.clone())?;
        let validator = CouponValidator::new(fetcher)?;
        Ok(Self::new(
            sources,
            validator,
            stores,
            config.scheduler.clone(),
            config.refresh.clone(),
        ))
    }

    /// Run discovery only.
    pub async fn discover(&self) -> Vec<String> {
        sources::discover_all(&self.sources).await
    }

    /// Run one full round.
    pub async fn run_round(&self) -> Result<RoundSummary> {
        let started = Instant::now();

        let discovered = self.discover().await;
        log::info!("Discovered {} coupon URLs", discovered.len());

        let (candidates, refresh_due) = if self.config.smart_refresh {
            self.smart_candidates(&discovered).await?
        } else {
            (dedup_discovered(&discovered), 0)
        };
        log::info!("{} URLs selected for validation", candidates.len());

        let stats = self.batch.validate_all(&candidates).await?;
        self.stores
            .round_state
            .save_last_round(Utc::now().timestamp_millis())
            .await?;

        Ok(RoundSummary {
            discovered: discovered.len(),
            refresh_due,
            candidates: candidates.len(),
            batches: stats.batches,
            processed: stats.processed,
            valid: stats.valid,
            expired: stats.expired,
            failed: stats.failed,
            elapsed: started.elapsed(),
        })
    }

    async fn smart_candidates(&self, discovered: &[String]) -> Result<(Vec<String>, usize)> {
        let thresholds = RefreshThresholds::at(&self.refresh, Utc::now())?;

        let needs_refresh = self
            .stores
            .catalog
            .urls_needing_refresh(
                thresholds.expiry_threshold,
                thresholds.min_uses_remaining,
                thresholds.stale_before,
            )
            .await?;
        log::info!(
            "Found {} coupons needing refresh (expiring within {}h, uses remaining < {}, not updated in {}h)",
            needs_refresh.len(),
            self.refresh.expiring_hours,
            self.refresh.min_uses_remaining,
            self.refresh.stale_hours
        );

        let plan = RefreshPlan {
            recently_expired: self
                .stores
                .expired
                .recently_confirmed_expired_urls(thresholds.expired_since)
                .await?,
            known_active: self.stores.catalog.all_urls().await?,
            needs_refresh,
        };
        let refresh_due = plan.needs_refresh.len();
        Ok((select_candidates(discovered, &plan), refresh_due))
    }

    /// Delay before the first round, based on the stored last round time.
    pub async fn initial_delay(&self) -> Result<Duration> {
        let Some(last) = self.stores.round_state.load_last_round().await? else {
            return Ok(Duration::ZERO);
        };
        let since_last = (Utc::now().timestamp_millis() - last).max(0);
        Ok(delay_until_next_round(
            self.config.interval(),
            Duration::from_millis(since_last.unsigned_abs()),
        ))
    }

    /// Run rounds until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.initial_delay().await.unwrap_or_else(|e| {
            log::warn!("Could not read last round time: {}", e);
            Duration::ZERO
        });
        if !delay.is_zero() {
            log::info!("Waiting {:?} until the first round", delay);
        }

        if wait_or_shutdown(delay, &mut shutdown).await {
            loop {
                let started = Instant::now();
                match self.run_round().await {
                    Ok(summary) => log::info!("Round complete: {}", summary),
                    Err(e) => log::error!("Round failed: {}", e),
                }

                let delay = delay_until_next_round(self.config.interval(), started.elapsed());
                log::info!("Waiting {:?} until the next round", delay);
                if !wait_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
            }
        }

        log::info!("Shutdown requested, scheduler stopped");
    }
}

/// Sleep for `delay`. Returns false as soon as a shutdown is requested.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
