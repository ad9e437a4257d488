//! Links and listing pages on the fixture board.

use chrono::Utc;
use job_scanner::testing::{listing_page, ListingEntry, TEST_SITE};
use job_scanner::{Link, MemoryStore, NewLink, ScanStore, SiteId};
use url::Url;

pub const BOARD: &str = "https://board.test";

pub fn search_url(query: &str) -> String {
    format!("{BOARD}/search?q={query}")
}

pub fn job_url(id: u32) -> String {
    format!("{BOARD}/jobs/{id}")
}

fn fixture_link(url: &str) -> Link {
    NewLink {
        site: SiteId::from(TEST_SITE),
        title: format!("Search {url}"),
        url: Url::parse(url).expect("valid link url"),
    }
    .into_link(Utc::now())
}

/// Store an enabled link for the fixture board.
pub async fn create_link(store: &MemoryStore, url: &str) -> Link {
    store
        .insert_link(fixture_link(url))
        .await
        .expect("Failed to create link")
}

pub async fn create_disabled_link(store: &MemoryStore, url: &str) -> Link {
    let link = Link {
        enabled: false,
        ..fixture_link(url)
    };
    store.insert_link(link).await.expect("Failed to create link")
}

/// Listing page with one card per job id, titled "Job {id}".
pub fn listing_for(ids: &[u32]) -> String {
    let entries: Vec<ListingEntry> = ids
        .iter()
        .map(|id| ListingEntry::new(format!("/jobs/{id}"), format!("Job {id}"), "Ferris Inc"))
        .collect();
    listing_page(&entries)
}
