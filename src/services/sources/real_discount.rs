//! real.discount: one JSON API call returning the latest coupons.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::CouponSource;
use crate::utils::http::Fetcher;

const API_URL: &str = "https://cdn.real.discount/api/courses";

/// Single-call source backed by the real.discount API.
pub struct RealDiscountSource {
    fetcher: Arc<dyn Fetcher>,
    limit: usize,
}

impl RealDiscountSource {
    pub fn new(fetcher: Arc<dyn Fetcher>, limit: usize) -> Self {
        Self { fetcher, limit }
    }

    pub fn api_url(&self) -> String {
        format!("{API_URL}?page=1&limit={}&sortBy=sale_start", self.limit)
    }
}

#[async_trait]
impl CouponSource for RealDiscountSource {
    fn name(&self) -> &str {
        "real.discount"
    }

    async fn discover(&self) -> Vec<String> {
        let Some(json) = self.fetcher.fetch_json(&self.api_url()).await else {
            return Vec::new();
        };

        let Some(items) = json.get("items").and_then(Value::as_array) else {
            log::warn!("real.discount response has no items array");
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| item.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .take(self.limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::utils::http::stub::StubFetcher;

    #[tokio::test]
    async fn test_discover_flattens_and_caps() {
        let body = json!({
            "items": [
                { "url": "https://www.udemy.com/course/a/?couponCode=A" },
                { "name": "no url" },
                { "url": "https://www.udemy.com/course/b/?couponCode=B" },
                { "url": "https://www.udemy.com/course/c/?couponCode=C" }
            ]
        });
        let fetcher = StubFetcher::new().with(
            "https://cdn.real.discount/api/courses?page=1&limit=2&sortBy=sale_start",
            body.to_string(),
        );
        let source = RealDiscountSource::new(Arc::new(fetcher), 2);

        let urls = source.discover().await;
        assert_eq!(
            urls,
            vec![
                "https://www.udemy.com/course/a/?couponCode=A",
                "https://www.udemy.com/course/b/?couponCode=B",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_is_empty() {
        let source = RealDiscountSource::new(Arc::new(StubFetcher::new()), 10);
        assert!(source.discover().await.is_empty());
    }
}
