use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::FetchError;

/// Per-request options handed to the fetcher.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

/// Rendered page as returned by a fetcher.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// Final URL after redirects
    pub url: Url,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl PageContent {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Fetches rendered pages. How pages are rendered (plain HTTP, headless
/// browser, proxies) is entirely up to the implementation.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<PageContent, FetchError>;
}
