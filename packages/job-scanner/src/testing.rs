//! Testing utilities: a scripted page fetcher, a fixed-output adapter and
//! HTML fixtures for a small fake job board.
//!
//! Useful for exercising the scanner without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::adapters::{DetailSelectors, ListingSelectors, SelectorSpec, SiteRegistry};
use crate::error::{FetchError, ParseError, ScanError};
use crate::traits::{FetchOptions, PageContent, PageFetcher, SiteAdapter};
use crate::types::{JobCandidate, SiteId};

/// Site id of the fixture board.
pub const TEST_SITE: &str = "testboard";

/// Scripted reply for one fetch.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Page(String),
    /// Page served after `delay`
    Delayed { delay: Duration, html: String },
    Fail(FetchError),
    /// Never completes; only the scanner's deadline ends it
    Hang,
    /// Panics inside the fetch, as an unclassified worker crash
    Panic(String),
}

/// A page fetcher that replays scripted responses per URL.
///
/// One-shot responses queued with [`then`](MockPageFetcher::then) are used
/// first, in order; after that the persistent route for the URL answers.
/// Unknown URLs fail with a network error.
#[derive(Default, Clone)]
pub struct MockPageFetcher {
    routes: Arc<RwLock<HashMap<String, MockResponse>>>,
    queued: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

fn route_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.respond(url, MockResponse::Page(html.into()));
        self
    }

    pub fn with_response(self, url: &str, response: MockResponse) -> Self {
        self.respond(url, response);
        self
    }

    /// Queue a one-shot response ahead of the persistent route.
    pub fn then(self, url: &str, response: MockResponse) -> Self {
        self.queued
            .write()
            .unwrap()
            .entry(route_key(url))
            .or_default()
            .push_back(response);
        self
    }

    /// Replace the persistent route for `url`.
    pub fn respond(&self, url: &str, response: MockResponse) {
        self.routes.write().unwrap().insert(route_key(url), response);
    }

    /// Every URL fetched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let key = route_key(url);
        self.calls.read().unwrap().iter().filter(|c| **c == key).count()
    }

    fn next_response(&self, key: &str) -> Option<MockResponse> {
        let queued = self
            .queued
            .write()
            .unwrap()
            .get_mut(key)
            .and_then(|queue| queue.pop_front());
        queued.or_else(|| self.routes.read().unwrap().get(key).cloned())
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<PageContent, FetchError> {
        let key = url.to_string();
        self.calls.write().unwrap().push(key.clone());

        match self.next_response(&key) {
            Some(MockResponse::Page(html)) => Ok(PageContent::new(url.clone(), html)),
            Some(MockResponse::Delayed { delay, html }) => {
                tokio::time::sleep(delay).await;
                Ok(PageContent::new(url.clone(), html))
            }
            Some(MockResponse::Fail(error)) => Err(error),
            Some(MockResponse::Hang) => std::future::pending().await,
            Some(MockResponse::Panic(message)) => panic!("{message}"),
            None => Err(FetchError::Network {
                url: key,
                message: "no mock route".to_string(),
            }),
        }
    }
}

/// Adapter returning fixed candidates regardless of page content.
pub struct StaticAdapter {
    site: SiteId,
    listing: Vec<JobCandidate>,
    detail: Option<JobCandidate>,
    panics: bool,
}

impl StaticAdapter {
    pub fn new(site: impl Into<SiteId>) -> Self {
        Self {
            site: site.into(),
            listing: Vec::new(),
            detail: None,
            panics: false,
        }
    }

    pub fn with_listing(mut self, candidates: Vec<JobCandidate>) -> Self {
        self.listing = candidates;
        self
    }

    pub fn with_detail(mut self, detail: JobCandidate) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Every extraction panics.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl SiteAdapter for StaticAdapter {
    fn site(&self) -> &SiteId {
        &self.site
    }

    fn extract_listing(&self, _page: &PageContent) -> Result<Vec<JobCandidate>, ParseError> {
        if self.panics {
            panic!("static adapter for {} panicked", self.site);
        }
        Ok(self.listing.clone())
    }

    fn extract_detail(&self, page: &PageContent) -> Result<JobCandidate, ParseError> {
        if self.panics {
            panic!("static adapter for {} panicked", self.site);
        }
        self.detail
            .clone()
            .ok_or_else(|| ParseError::new(&self.site, page.url.as_str(), "no detail configured"))
    }
}

// ============================================================================
// FIXTURE BOARD
// ============================================================================

/// Selectors for the fixture HTML produced by [`listing_page`] and
/// [`detail_page`].
pub fn testboard_spec() -> SelectorSpec {
    SelectorSpec {
        listing: ListingSelectors {
            card: "li.job".into(),
            link: Some("a.job-link".into()),
            title: Some(".title".into()),
            company: Some(".company".into()),
            location: Some(".location".into()),
            salary: Some(".salary".into()),
            job_type: None,
            no_results: Some(".no-results".into()),
        },
        detail: DetailSelectors {
            title: Some("h1.job-title".into()),
            company: Some(".company".into()),
            location: Some(".location".into()),
            salary: Some(".salary".into()),
            job_type: Some(".job-type".into()),
            description: Some("div.description".into()),
        },
    }
}

/// Registry holding only the fixture board.
pub fn testboard_registry() -> Result<SiteRegistry, ScanError> {
    Ok(SiteRegistry::builder()
        .selector(TEST_SITE, testboard_spec())?
        .build())
}

/// One card on a fixture listing page.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub href: String,
    pub title: String,
    pub company: String,
}

impl ListingEntry {
    pub fn new(href: impl Into<String>, title: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: title.into(),
            company: company.into(),
        }
    }
}

pub fn listing_page(entries: &[ListingEntry]) -> String {
    if entries.is_empty() {
        return "<html><body><p class=\"no-results\">No jobs match your search</p></body></html>"
            .to_string();
    }

    let cards: String = entries
        .iter()
        .map(|e| {
            format!(
                r#"<li class="job"><a class="job-link" href="{}"><span class="title">{}</span></a><span class="company">{}</span><span class="location">Remote</span></li>"#,
                e.href, e.title, e.company
            )
        })
        .collect();
    format!("<html><body><ul class=\"results\">{cards}</ul></body></html>")
}

pub fn detail_page(title: &str, company: &str, description: &str) -> String {
    format!(
        r#"<html><body><h1 class="job-title">{title}</h1><span class="company">{company}</span><span class="job-type">Full time</span><div class="description"><p>{description}</p></div></body></html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn queued_responses_precede_the_route() {
        let fetcher = MockPageFetcher::new()
            .with_page("https://board.test/a", "steady")
            .then(
                "https://board.test/a",
                MockResponse::Fail(FetchError::Network {
                    url: "https://board.test/a".into(),
                    message: "reset".into(),
                }),
            );
        let options = FetchOptions::default();

        assert!(fetcher.fetch(&url("https://board.test/a"), &options).await.is_err());
        let page = fetcher.fetch(&url("https://board.test/a"), &options).await.unwrap();
        assert_eq!(page.html, "steady");
        assert_eq!(fetcher.call_count("https://board.test/a"), 2);
    }

    #[tokio::test]
    async fn unknown_url_is_a_network_error() {
        let fetcher = MockPageFetcher::new();
        let err = fetcher
            .fetch(&url("https://board.test/missing"), &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }

    #[test]
    fn fixture_pages_match_the_fixture_selectors() {
        let registry = testboard_registry().unwrap();
        let adapter = registry.resolve(&SiteId::from(TEST_SITE)).unwrap();

        let html = listing_page(&[ListingEntry::new("/jobs/1", "Rust Engineer", "Ferris Inc")]);
        let page = PageContent::new(url("https://board.test/search"), html);
        let cards = adapter.extract_listing(&page).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].external_url, "https://board.test/jobs/1");
        assert_eq!(cards[0].title.as_deref(), Some("Rust Engineer"));

        let page = PageContent::new(
            url("https://board.test/jobs/1"),
            detail_page("Rust Engineer", "Ferris Inc", "Write async code."),
        );
        let detail = adapter.extract_detail(&page).unwrap();
        assert_eq!(detail.description.as_deref(), Some("Write async code."));
        assert_eq!(detail.job_type.as_deref(), Some("Full time"));
    }
}
