//! Coupon URL discovery sources.

mod enext;
mod real_discount;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future;

use crate::error::Result;
use crate::models::SourcesConfig;
use crate::storage::ResolutionCache;
use crate::utils::http::Fetcher;

pub use enext::EnextSource;
pub use real_discount::RealDiscountSource;

/// A site that lists coupon URLs.
#[async_trait]
pub trait CouponSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Collect candidate coupon URLs. Failures yield fewer (or no) URLs.
    async fn discover(&self) -> Vec<String>;
}

/// Build every configured source.
pub fn default_sources(
    config: &SourcesConfig,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn ResolutionCache>,
) -> Result<Vec<Arc<dyn CouponSource>>> {
    Ok(vec![
        Arc::new(EnextSource::new(fetcher.clone(), cache, config.clone())?),
        Arc::new(RealDiscountSource::new(fetcher, config.real_discount_limit)),
    ])
}

/// Run all sources concurrently and concatenate their output.
pub async fn discover_all(sources: &[Arc<dyn CouponSource>]) -> Vec<String> {
    let results = future::join_all(sources.iter().map(|source| async move {
        let urls = source.discover().await;
        log::info!("{}: discovered {} coupon URLs", source.name(), urls.len());
        urls
    }))
    .await;

    results.into_iter().flatten().collect()
}
