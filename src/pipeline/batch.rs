//! Batch validation.
//!
//! Candidate URLs are split into fixed-size batches. Batches run one after
//! another; URLs inside a batch are validated concurrently by a bounded pool
//! of tasks. Each batch is persisted before the next one starts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, stream};

use crate::error::Result;
use crate::models::{CourseRecord, CourseState, ExpiredRecord, HistoryEntry, HistoryStatus};
use crate::services::{CouponValidator, Validation};
use crate::storage::Stores;

/// What the stores knew about a URL before the batch started.
#[derive(Debug, Clone)]
struct Known {
    state: CourseState,
    course_id: Option<i64>,
    title: Option<String>,
}

/// Result of validating one URL.
#[derive(Debug)]
enum Outcome {
    Valid {
        record: CourseRecord,
        previous: CourseState,
    },
    Expired {
        coupon_url: String,
        course_id: Option<i64>,
        title: Option<String>,
    },
    Failed {
        coupon_url: String,
        message: String,
    },
}

/// Counters accumulated over the batches of a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub processed: usize,
    pub valid: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Validates candidate URLs batch by batch and persists the outcomes.
pub struct BatchValidator {
    validator: CouponValidator,
    stores: Stores,
    batch_size: usize,
    workers: usize,
}

impl BatchValidator {
    pub fn new(
        validator: CouponValidator,
        stores: Stores,
        batch_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            validator,
            stores,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    /// Validate and persist every URL in `urls`.
    pub async fn validate_all(&self, urls: &[String]) -> Result<BatchStats> {
        let mut stats = BatchStats::default();
        let total_batches = urls.len().div_ceil(self.batch_size);

        for (index, batch) in urls.chunks(self.batch_size).enumerate() {
            let start = index * self.batch_size;
            log::info!(
                "Processing batch {}/{} (URLs {}-{} of {})",
                index + 1,
                total_batches,
                start + 1,
                start + batch.len(),
                urls.len()
            );

            let outcomes = self.validate_batch(batch).await?;
            stats.batches += 1;
            stats.processed += outcomes.len();
            self.persist(outcomes, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Read-only view of what the stores know about each URL of the batch.
    async fn snapshot(&self, batch: &[String]) -> Result<HashMap<String, Known>> {
        let mut known = HashMap::with_capacity(batch.len());
        for url in batch {
            if let Some(record) = self.stores.catalog.find_by_url(url).await? {
                known.insert(
                    url.clone(),
                    Known {
                        state: CourseState::Active,
                        course_id: Some(record.course_id),
                        title: Some(record.title),
                    },
                );
            } else if let Some(record) = self.stores.expired.find_by_url(url).await? {
                known.insert(
                    url.clone(),
                    Known {
                        state: CourseState::Expired,
                        course_id: record.course_id,
                        title: record.title,
                    },
                );
            }
        }
        Ok(known)
    }

    async fn validate_batch(&self, batch: &[String]) -> Result<Vec<Outcome>> {
        let snapshot = Arc::new(self.snapshot(batch).await?);

        let outcomes = stream::iter(batch.iter().cloned())
            .map(|coupon_url| {
                let validator = self.validator.clone();
                let known = snapshot.get(&coupon_url).cloned();
                let task = tokio::spawn(check(validator, coupon_url.clone(), known));
                async move {
                    task.await.unwrap_or_else(|e| Outcome::Failed {
                        coupon_url,
                        message: format!("validation task failed: {e}"),
                    })
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes)
    }

    async fn persist(&self, outcomes: Vec<Outcome>, stats: &mut BatchStats) -> Result<()> {
        let mut history = Vec::with_capacity(outcomes.len());
        let mut reconfirmed = HashSet::new();
        let (mut valid, mut created, mut failed) = (0, 0, 0);

        for outcome in outcomes {
            match outcome {
                Outcome::Valid { record, previous } => {
                    history.push(HistoryEntry::new(
                        record.coupon_url.as_str(),
                        Some(record.course_id),
                        Some(record.title.clone()),
                        HistoryStatus::for_valid(previous),
                    ));
                    let coupon_url = record.coupon_url.clone();
                    self.stores.catalog.upsert(record).await?;
                    self.stores.expired.delete_by_url(&coupon_url).await?;
                    valid += 1;
                }
                Outcome::Expired {
                    coupon_url,
                    course_id,
                    title,
                } => {
                    history.push(HistoryEntry::new(
                        coupon_url.as_str(),
                        course_id,
                        title.clone(),
                        HistoryStatus::Expired,
                    ));
                    match self.stores.expired.find_by_url(&coupon_url).await? {
                        Some(mut existing) => {
                            if existing.backfill(course_id, title.as_deref()) {
                                self.stores.expired.upsert(existing).await?;
                            }
                            reconfirmed.insert(coupon_url.clone());
                        }
                        None => {
                            self.stores
                                .expired
                                .upsert(ExpiredRecord::new(coupon_url.as_str(), course_id, title))
                                .await?;
                            created += 1;
                        }
                    }
                    self.stores.catalog.delete_by_url(&coupon_url).await?;
                }
                Outcome::Failed {
                    coupon_url,
                    message,
                } => {
                    log::warn!("Failed to validate {}: {}", coupon_url, message);
                    failed += 1;
                }
            }
        }

        self.stores.expired.touch_updated_at(&reconfirmed).await?;
        self.stores.history.append_all(history).await?;
        self.stores
            .round_state
            .save_last_round(Utc::now().timestamp_millis())
            .await?;

        let expired = created + reconfirmed.len();
        log::info!("Saved {} valid coupons", valid);
        log::info!(
            "Saved {} expired coupons ({} new, {} re-confirmed)",
            expired,
            created,
            reconfirmed.len()
        );
        if failed > 0 {
            log::warn!("{} coupons failed validation", failed);
        }

        stats.valid += valid;
        stats.expired += expired;
        stats.failed += failed;
        Ok(())
    }
}

/// Validate one URL. Runs inside its own task.
async fn check(validator: CouponValidator, coupon_url: String, known: Option<Known>) -> Outcome {
    let previous = known.as_ref().map_or(CourseState::New, |k| k.state);
    let known_id = known.as_ref().and_then(|k| k.course_id);

    match validator.validate(&coupon_url, known_id).await {
        Ok(Validation::Valid(mut record)) => {
            record.is_new = previous == CourseState::New;
            Outcome::Valid { record, previous }
        }
        Ok(Validation::Expired { course_id, title }) => {
            let (known_id, known_title) = known
                .map(|k| (k.course_id, k.title))
                .unwrap_or((None, None));
            Outcome::Expired {
                coupon_url,
                course_id: Some(course_id).filter(|id| *id > 0).or(known_id),
                title: title.or(known_title),
            }
        }
        Err(e) => Outcome::Failed {
            coupon_url,
            message: e.to_string(),
        },
    }
}
