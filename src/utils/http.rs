// src/utils/http.rs

//! HTTP client utilities.
//!
//! Everything that talks to the network goes through [`Fetcher`]. Fetch
//! failures never surface as errors: they are logged and turned into `None`,
//! and callers treat `None` as "expired" or "skip".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde_json::Value;

use crate::error::Result;
use crate::models::HttpConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fail-soft content fetcher.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the raw body of `url`.
    async fn fetch_text(&self, url: &str) -> Option<String>;

    /// Fetch `url` and parse the body as JSON.
    async fn fetch_json(&self, url: &str) -> Option<Value> {
        let text = self.fetch_text(url).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Invalid JSON from {}: {}", url, e);
                None
            }
        }
    }

    /// Fetch `url` and parse the body as an HTML document.
    async fn fetch_html(&self, url: &str) -> Option<Html> {
        self.fetch_text(url)
            .await
            .map(|text| Html::parse_document(&text))
    }
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Option<String> {
        match self.get_text(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("Failed to fetch {}: {}", url, e);
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::stub::StubFetcher;
    use super::*;

    #[test]
    fn test_create_client() {
        assert!(create_client(&HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_json_invalid_body_is_none() {
        let fetcher = StubFetcher::new().with("https://api.test/bad", "<html>nope</html>");
        assert!(fetcher.fetch_json("https://api.test/bad").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_json_missing_is_none() {
        let fetcher = StubFetcher::new();
        assert!(fetcher.fetch_json("https://api.test/missing").await.is_none());
        assert_eq!(fetcher.request_count("https://api.test/missing"), 1);
    }

    #[tokio::test]
    async fn test_fetch_html_parses_document() {
        let fetcher = StubFetcher::new().with(
            "https://site.test/page",
            r#"<html><body data-clp-course-id="99"></body></html>"#,
        );
        let document = fetcher.fetch_html("https://site.test/page").await.unwrap();
        let body = scraper::Selector::parse("body").unwrap();
        let id = document
            .select(&body)
            .next()
            .and_then(|b| b.value().attr("data-clp-course-id"));
        assert_eq!(id, Some("99"));
    }

    #[tokio::test]
    async fn test_http_fetcher_unreachable_host_is_none() {
        let config = HttpConfig {
            timeout_secs: 1,
            ..HttpConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert!(fetcher.fetch_text("http://127.0.0.1:9/").await.is_none());
    }
}
