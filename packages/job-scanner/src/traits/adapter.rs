use crate::error::ParseError;
use crate::traits::PageContent;
use crate::types::{JobCandidate, SiteId};

/// Extraction strategy pair for one job board.
///
/// Both operations are pure: no I/O, no state beyond what was configured at
/// construction. A [`ParseError`] means the page layout was not recognised,
/// which is distinct from the page failing to load.
pub trait SiteAdapter: Send + Sync {
    fn site(&self) -> &SiteId;

    /// Turn a search-results page into candidate postings.
    fn extract_listing(&self, page: &PageContent) -> Result<Vec<JobCandidate>, ParseError>;

    /// Turn a single posting page into a normalized job record.
    fn extract_detail(&self, page: &PageContent) -> Result<JobCandidate, ParseError>;
}
