//! e-next: paginated listing pages linking to per-course detail pages.
//!
//! List pages are fetched by a bounded pool of producers that push detail
//! links onto a bounded queue. A pool of consumers resolves each link to a
//! marketplace coupon URL, going through the resolution cache before
//! fetching the detail page. Everything stops once `limit` URLs are
//! collected or pagination runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::CouponSource;
use crate::error::{AppError, Result};
use crate::models::{ScrapedUrlMapping, SourcesConfig};
use crate::storage::ResolutionCache;
use crate::utils::http::Fetcher;
use crate::utils::resolve;
use crate::utils::url::is_marketplace_url;

const LIST_URL: &str = "https://jobs.e-next.in/course/udemy";
const COUPONS_PER_PAGE: usize = 12;
const CACHE_SOURCE: &str = "enext";

const LIST_SELECTOR: &str = "div.portfolio-item a[href]";
const DETAIL_SELECTOR: &str = "a.btn.btn-primary[href*='udemy.com']";
const DETAIL_FALLBACK_SELECTOR: &str = "a[href*='udemy.com/?couponCode=']";

/// Paginated producer/consumer source backed by jobs.e-next.in.
pub struct EnextSource {
    inner: Arc<Inner>,
    config: SourcesConfig,
}

/// Immutable parts shared with every worker task.
struct Inner {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn ResolutionCache>,
    list_url: String,
    list_selector: Selector,
    detail_selectors: [Selector; 2],
}

/// Per-run progress shared between producers and consumers.
struct Progress {
    target: usize,
    enough: AtomicBool,
    end_of_pages: AtomicBool,
    collected: Mutex<Vec<String>>,
}

impl Progress {
    fn new(target: usize) -> Self {
        Self {
            target,
            enough: AtomicBool::new(false),
            end_of_pages: AtomicBool::new(false),
            collected: Mutex::new(Vec::with_capacity(target)),
        }
    }

    fn enough(&self) -> bool {
        self.enough.load(Ordering::SeqCst)
    }

    fn stop_paging(&self) -> bool {
        self.enough() || self.end_of_pages.load(Ordering::SeqCst)
    }

    fn push(&self, coupon_url: String) {
        let mut collected = self.collected.lock().unwrap_or_else(PoisonError::into_inner);
        if collected.len() < self.target {
            collected.push(coupon_url);
        }
        if collected.len() >= self.target {
            self.enough.store(true, Ordering::SeqCst);
        }
    }

    fn into_urls(self) -> Vec<String> {
        self.collected
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EnextSource {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn ResolutionCache>,
        config: SourcesConfig,
    ) -> Result<Self> {
        Self::with_list_url(fetcher, cache, config, LIST_URL)
    }

    /// Same as [`EnextSource::new`] but reading list pages from `list_url/{page}`.
    pub fn with_list_url(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn ResolutionCache>,
        config: SourcesConfig,
        list_url: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                fetcher,
                cache,
                list_url: list_url.into(),
                list_selector: parse_selector(LIST_SELECTOR)?,
                detail_selectors: [
                    parse_selector(DETAIL_SELECTOR)?,
                    parse_selector(DETAIL_FALLBACK_SELECTOR)?,
                ],
            }),
            config,
        })
    }

    /// Number of list pages worth trying for the configured limit.
    fn page_budget(&self) -> usize {
        self.config.enext_limit.div_ceil(COUPONS_PER_PAGE) + 2
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::selector(selector, e.to_string()))
}

impl Inner {
    fn page_url(&self, page: usize) -> String {
        format!("{}/{}", self.list_url, page)
    }

    fn extract_detail_links(&self, html: &str, page_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.list_selector)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .filter_map(|href| resolve(page_url, href))
            .collect()
    }

    fn extract_coupon_link(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        self.detail_selectors.iter().find_map(|selector| {
            document
                .select(selector)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .find(|href| !href.is_empty())
                .map(str::to_string)
        })
    }

    /// Resolve one detail link to a coupon URL.
    async fn resolve_link(&self, link: &str) -> Option<String> {
        if is_marketplace_url(link) {
            return Some(link.to_string());
        }

        match self.cache.find_by_scraped_url(link).await {
            Ok(Some(mapping)) => return Some(mapping.coupon_url),
            Ok(None) => {}
            Err(e) => log::warn!("Resolution cache lookup failed for {}: {}", link, e),
        }

        let html = self.fetcher.fetch_text(link).await?;
        let Some(coupon_url) = self.extract_coupon_link(&html) else {
            log::debug!("No coupon link on {}", link);
            return None;
        };

        let mapping = ScrapedUrlMapping::new(link, coupon_url.as_str(), CACHE_SOURCE);
        if let Err(e) = self.cache.save(mapping).await {
            log::warn!("Failed to cache mapping for {}: {}", link, e);
        }
        Some(coupon_url)
    }
}

/// Fetch one list page and queue its detail links.
async fn produce_page(
    inner: Arc<Inner>,
    progress: Arc<Progress>,
    page: usize,
    tx: mpsc::Sender<String>,
    poll: Duration,
) {
    if progress.stop_paging() {
        return;
    }

    let page_url = inner.page_url(page);
    let links = match inner.fetcher.fetch_text(&page_url).await {
        Some(html) => inner.extract_detail_links(&html, &page_url),
        None => {
            if page == 1 {
                progress.end_of_pages.store(true, Ordering::SeqCst);
            }
            return;
        }
    };

    if links.is_empty() {
        log::debug!("e-next page {} is empty, end of pagination", page);
        progress.end_of_pages.store(true, Ordering::SeqCst);
        return;
    }

    for link in links {
        loop {
            if progress.enough() {
                return;
            }
            match timeout(poll, tx.reserve()).await {
                Ok(Ok(permit)) => {
                    permit.send(link);
                    break;
                }
                // Consumers are gone
                Ok(Err(_)) => return,
                Err(_) => continue,
            }
        }
    }
}

/// Resolve queued detail links until enough are collected or the queue is closed and drained.
async fn consume_links(
    inner: Arc<Inner>,
    progress: Arc<Progress>,
    rx: Arc<AsyncMutex<mpsc::Receiver<String>>>,
    poll: Duration,
) {
    loop {
        if progress.enough() {
            return;
        }

        let next = {
            let mut rx = rx.lock().await;
            timeout(poll, rx.recv()).await
        };

        match next {
            Ok(Some(link)) => {
                if progress.enough() {
                    return;
                }
                if let Some(coupon_url) = inner.resolve_link(&link).await {
                    progress.push(coupon_url);
                }
            }
            Ok(None) => return,
            Err(_) => continue,
        }
    }
}

/// Wait for every task in `tasks`, aborting the rest after `grace`.
async fn join_with_grace(tasks: &mut JoinSet<()>, grace: Duration, what: &str) {
    let finished = timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        log::warn!(
            "e-next {} still running after {:?}, aborting {} tasks",
            what,
            grace,
            tasks.len()
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

#[async_trait]
impl CouponSource for EnextSource {
    fn name(&self) -> &str {
        "e-next"
    }

    async fn discover(&self) -> Vec<String> {
        let target = self.config.enext_limit;
        if target == 0 {
            return Vec::new();
        }

        let poll = self.config.queue_poll();
        let progress = Arc::new(Progress::new(target));
        let (tx, rx) = mpsc::channel::<String>(self.config.queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut consumers = JoinSet::new();
        for _ in 0..self.config.detail_workers.max(1) {
            consumers.spawn(consume_links(
                self.inner.clone(),
                progress.clone(),
                rx.clone(),
                poll,
            ));
        }

        let pages = Arc::new(Semaphore::new(self.config.page_workers.max(1)));
        let mut producers = JoinSet::new();
        for page in 1..=self.page_budget() {
            if progress.stop_paging() {
                break;
            }
            let Ok(permit) = pages.clone().acquire_owned().await else {
                break;
            };
            // Re-check after waiting for a free slot
            if progress.stop_paging() {
                break;
            }

            let inner = self.inner.clone();
            let progress = progress.clone();
            let tx = tx.clone();
            producers.spawn(async move {
                let _permit = permit;
                produce_page(inner, progress, page, tx, poll).await;
            });
        }

        join_with_grace(&mut producers, self.config.producer_grace(), "list pages").await;
        // Closing the queue lets consumers finish once it is drained.
        drop(tx);
        join_with_grace(&mut consumers, self.config.consumer_grace(), "detail pages").await;

        // All tasks are joined, so this is the last reference.
        let mut urls = match Arc::try_unwrap(progress) {
            Ok(progress) => progress.into_urls(),
            Err(progress) => progress
                .collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        urls.truncate(target);
        urls
    }
}
