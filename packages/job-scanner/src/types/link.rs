use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::SiteId;

/// A user-configured job-board search monitored by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: Uuid,
    pub site: SiteId,
    pub title: String,
    pub url: Url,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Consecutive failed scans; reset on the next successful scan
    pub scan_error_count: u32,
    pub last_error: Option<String>,
}

impl Link {
    /// Whether repeated failures warrant the user's attention.
    ///
    /// The engine only surfaces the condition, it never disables the link.
    pub fn needs_attention(&self, threshold: u32) -> bool {
        threshold > 0 && self.scan_error_count >= threshold
    }
}

/// Input for creating a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLink {
    pub site: SiteId,
    pub title: String,
    pub url: Url,
}

impl NewLink {
    pub fn into_link(self, now: DateTime<Utc>) -> Link {
        Link {
            id: Uuid::new_v4(),
            site: self.site,
            title: self.title,
            url: self.url,
            enabled: true,
            created_at: now,
            last_scanned_at: None,
            scan_error_count: 0,
            last_error: None,
        }
    }
}

/// Partial update of a link's user-editable fields; `None` keeps the value.
///
/// Scan bookkeeping is not editable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdate {
    pub title: Option<String>,
    pub url: Option<Url>,
    pub enabled: Option<bool>,
}

impl LinkUpdate {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn apply(&self, link: &mut Link) {
        if let Some(title) = &self.title {
            link.title = title.clone();
        }
        if let Some(url) = &self.url {
            link.url = url.clone();
        }
        if let Some(enabled) = self.enabled {
            link.enabled = enabled;
        }
    }
}
