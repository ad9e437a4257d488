//! CSS-selector driven site adapter.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::json_ld;
use crate::dedup::clean_text;
use crate::error::{ParseError, ScanError};
use crate::traits::{PageContent, SiteAdapter};
use crate::types::{JobCandidate, SiteId};

/// Selectors for a search-results page. Field selectors are evaluated
/// relative to each card.
#[derive(Debug, Clone, Default)]
pub struct ListingSelectors {
    pub card: String,
    /// Anchor carrying the posting URL; the card itself is used when unset
    pub link: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    /// Present on a legitimately empty search ("no jobs match")
    pub no_results: Option<String>,
}

/// Selectors for a single posting page, used when no JSON-LD is embedded
/// or to fill the fields it lacks.
#[derive(Debug, Clone, Default)]
pub struct DetailSelectors {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectorSpec {
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
}

fn sel(s: &str) -> Option<String> {
    Some(s.to_string())
}

impl SelectorSpec {
    pub fn linkedin() -> Self {
        Self {
            listing: ListingSelectors {
                card: "ul.jobs-search__results-list > li".into(),
                link: sel("a.base-card__full-link"),
                title: sel("h3.base-search-card__title"),
                company: sel("h4.base-search-card__subtitle"),
                location: sel("span.job-search-card__location"),
                salary: sel("span.job-search-card__salary-info"),
                job_type: None,
                no_results: sel("section.two-pane-serp-page__no-results, div.no-results"),
            },
            detail: DetailSelectors {
                title: sel("h1.top-card-layout__title, h1.topcard__title"),
                company: sel("a.topcard__org-name-link, span.topcard__flavor"),
                location: sel("span.topcard__flavor--bullet"),
                salary: sel("div.salary.compensation__salary"),
                job_type: sel("span.description__job-criteria-text"),
                description: sel("div.show-more-less-html__markup, div.description__text"),
            },
        }
    }

    pub fn indeed() -> Self {
        Self {
            listing: ListingSelectors {
                card: "div.job_seen_beacon".into(),
                link: sel("h2.jobTitle a"),
                title: sel("h2.jobTitle span[title], h2.jobTitle span"),
                company: sel(r#"[data-testid="company-name"], span.companyName"#),
                location: sel(r#"[data-testid="text-location"], div.companyLocation"#),
                salary: sel("div.salary-snippet-container, div.metadata.salary-snippet-container"),
                job_type: sel(r#"[data-testid="attribute_snippet_testid"]"#),
                no_results: sel("div.jobsearch-NoResult-messageContainer"),
            },
            detail: DetailSelectors {
                title: sel("h1.jobsearch-JobInfoHeader-title"),
                company: sel(r#"[data-testid="inlineHeader-companyName"]"#),
                location: sel(r#"[data-testid="inlineHeader-companyLocation"]"#),
                salary: sel("#salaryInfoAndJobType span"),
                job_type: sel("#salaryInfoAndJobType span + span"),
                description: sel("#jobDescriptionText"),
            },
        }
    }

    pub fn remoteok() -> Self {
        Self {
            listing: ListingSelectors {
                card: "tr.job".into(),
                link: sel("a.preventLink"),
                title: sel(r#"h2[itemprop="title"]"#),
                company: sel(r#"h3[itemprop="name"]"#),
                location: sel("div.location"),
                salary: sel("div.salary"),
                job_type: None,
                no_results: sel("div.no-jobs"),
            },
            detail: DetailSelectors {
                title: sel(r#"h2[itemprop="title"], h1"#),
                company: sel(r#"h3[itemprop="name"]"#),
                location: sel("div.location"),
                salary: sel("div.salary"),
                job_type: None,
                description: sel(r#"div.description, div[itemprop="description"]"#),
            },
        }
    }

    pub fn weworkremotely() -> Self {
        Self {
            listing: ListingSelectors {
                card: "li.feature, li.new-listing-container".into(),
                link: sel(r#"a[href*="/remote-jobs/"]"#),
                title: sel(".new-listing__header__title, span.title"),
                company: sel(".new-listing__company-name, span.company"),
                location: sel(".new-listing__company-headquarters, span.region"),
                salary: None,
                job_type: sel(".new-listing__categories__category"),
                no_results: sel("div.no-results, p.no-jobs"),
            },
            detail: DetailSelectors {
                title: sel(".lis-container__header__hero__company-info__title, h1"),
                company: sel(".lis-container__job__sidebar__companyDetails__info__title h3"),
                location: sel(".lis-container__job__sidebar__job-about__list__item--full span"),
                salary: None,
                job_type: None,
                description: sel(".lis-container__job__content__description, div.listing-container"),
            },
        }
    }
}

// ============================================================================
// COMPILED ADAPTER
// ============================================================================

struct CompiledListing {
    card: Selector,
    card_source: String,
    link: Option<Selector>,
    title: Option<Selector>,
    company: Option<Selector>,
    location: Option<Selector>,
    salary: Option<Selector>,
    job_type: Option<Selector>,
    no_results: Option<Selector>,
}

struct CompiledDetail {
    title: Option<Selector>,
    company: Option<Selector>,
    location: Option<Selector>,
    salary: Option<Selector>,
    job_type: Option<Selector>,
    description: Option<Selector>,
}

/// [`SiteAdapter`] backed by a [`SelectorSpec`].
///
/// Selectors are compiled once at construction; a bad selector fails
/// registry construction rather than every scan.
pub struct SelectorAdapter {
    site: SiteId,
    listing: CompiledListing,
    detail: CompiledDetail,
}

impl SelectorAdapter {
    pub fn new(site: impl Into<SiteId>, spec: SelectorSpec) -> Result<Self, ScanError> {
        let site = site.into();
        let compile = |raw: &str| -> Result<Selector, ScanError> {
            Selector::parse(raw).map_err(|e| ScanError::AdapterConfig {
                site: site.clone(),
                reason: format!("invalid selector `{raw}`: {e:?}"),
            })
        };
        let compile_opt = |raw: &Option<String>| raw.as_deref().map(&compile).transpose();

        let listing = CompiledListing {
            card: compile(&spec.listing.card)?,
            card_source: spec.listing.card.clone(),
            link: compile_opt(&spec.listing.link)?,
            title: compile_opt(&spec.listing.title)?,
            company: compile_opt(&spec.listing.company)?,
            location: compile_opt(&spec.listing.location)?,
            salary: compile_opt(&spec.listing.salary)?,
            job_type: compile_opt(&spec.listing.job_type)?,
            no_results: compile_opt(&spec.listing.no_results)?,
        };
        let detail = CompiledDetail {
            title: compile_opt(&spec.detail.title)?,
            company: compile_opt(&spec.detail.company)?,
            location: compile_opt(&spec.detail.location)?,
            salary: compile_opt(&spec.detail.salary)?,
            job_type: compile_opt(&spec.detail.job_type)?,
            description: compile_opt(&spec.detail.description)?,
        };

        Ok(Self {
            site,
            listing,
            detail,
        })
    }

    fn card_candidate(&self, card: ElementRef<'_>, page: &PageContent) -> Option<JobCandidate> {
        let anchor = match &self.listing.link {
            Some(link) => card.select(link).next()?,
            None => card,
        };
        let href = anchor.value().attr("href")?.trim();
        let url = page.url.join(href).ok()?;

        Some(JobCandidate {
            external_url: url.to_string(),
            title: first_text(card, self.listing.title.as_ref()),
            company_name: first_text(card, self.listing.company.as_ref()),
            location: first_text(card, self.listing.location.as_ref()),
            salary: first_text(card, self.listing.salary.as_ref()),
            job_type: first_text(card, self.listing.job_type.as_ref()),
            description: None,
        })
    }
}

fn first_text(scope: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let element = scope.select(selector?).next()?;
    Some(clean_text(&element.text().collect::<String>())).filter(|t| !t.is_empty())
}

fn doc_text(document: &Html, selector: Option<&Selector>) -> Option<String> {
    first_text(document.root_element(), selector)
}

/// Block text with line structure kept.
fn doc_block_text(document: &Html, selector: Option<&Selector>) -> Option<String> {
    let element = document.select(selector?).next()?;
    Some(json_ld::html_to_text(&element.inner_html())).filter(|t| !t.is_empty())
}

impl SiteAdapter for SelectorAdapter {
    fn site(&self) -> &SiteId {
        &self.site
    }

    fn extract_listing(&self, page: &PageContent) -> Result<Vec<JobCandidate>, ParseError> {
        let document = Html::parse_document(&page.html);
        let mut cards = 0usize;
        let mut candidates = Vec::new();

        for card in document.select(&self.listing.card) {
            cards += 1;
            match self.card_candidate(card, page) {
                Some(candidate) => candidates.push(candidate),
                None => debug!(site = %self.site, "Skipping job card without a link"),
            }
        }

        if !candidates.is_empty() {
            debug!(site = %self.site, cards, found = candidates.len(), "Extracted listing");
            return Ok(candidates);
        }

        let empty_search = self
            .listing
            .no_results
            .as_ref()
            .is_some_and(|marker| document.select(marker).next().is_some());
        if empty_search {
            debug!(site = %self.site, url = %page.url, "Search returned no results");
            return Ok(Vec::new());
        }

        let reason = if cards == 0 {
            format!("no job cards matched `{}`", self.listing.card_source)
        } else {
            format!("{cards} job cards matched but none carried a link")
        };
        Err(ParseError::new(&self.site, page.url.as_str(), reason))
    }

    fn extract_detail(&self, page: &PageContent) -> Result<JobCandidate, ParseError> {
        let document = Html::parse_document(&page.html);

        let mut candidate = JobCandidate {
            external_url: page.url.to_string(),
            title: doc_text(&document, self.detail.title.as_ref()),
            company_name: doc_text(&document, self.detail.company.as_ref()),
            location: doc_text(&document, self.detail.location.as_ref()),
            salary: doc_text(&document, self.detail.salary.as_ref()),
            job_type: doc_text(&document, self.detail.job_type.as_ref()),
            description: doc_block_text(&document, self.detail.description.as_ref()),
        };

        // JSON-LD wins where present; the URL stays the one that was fetched
        if let Some(structured) = json_ld::find_job_posting(&document, &page.url) {
            candidate.absorb(structured);
        }

        if candidate.title.is_none() && candidate.description.is_none() {
            return Err(ParseError::new(
                &self.site,
                page.url.as_str(),
                "no job title or description found",
            ));
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn page(url: &str, html: &str) -> PageContent {
        PageContent::new(Url::parse(url).unwrap(), html)
    }

    fn wwr() -> SelectorAdapter {
        SelectorAdapter::new("weworkremotely", SelectorSpec::weworkremotely()).unwrap()
    }

    #[test]
    fn extracts_cards_and_resolves_relative_links() {
        let html = r#"
            <ul>
              <li class="feature">
                <a href="/remote-jobs/acme-rust-engineer">
                  <span class="new-listing__header__title">Rust Engineer</span>
                  <span class="new-listing__company-name">Acme</span>
                  <span class="new-listing__company-headquarters">Anywhere</span>
                </a>
              </li>
              <li class="new-listing-container">
                <a href="https://weworkremotely.com/remote-jobs/globex-designer">
                  <span class="new-listing__header__title">Designer</span>
                </a>
              </li>
            </ul>"#;
        let jobs = wwr()
            .extract_listing(&page("https://weworkremotely.com/categories/remote-programming-jobs", html))
            .unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].external_url, "https://weworkremotely.com/remote-jobs/acme-rust-engineer");
        assert_eq!(jobs[0].title.as_deref(), Some("Rust Engineer"));
        assert_eq!(jobs[0].company_name.as_deref(), Some("Acme"));
        assert_eq!(jobs[1].company_name, None);
    }

    #[test]
    fn layout_change_is_a_parse_error() {
        let err = wwr()
            .extract_listing(&page("https://weworkremotely.com/", "<div class=\"redesign\"></div>"))
            .unwrap_err();
        assert!(err.reason.contains("no job cards matched"));
        assert_eq!(err.site.as_str(), "weworkremotely");
    }

    #[test]
    fn no_results_marker_means_empty_listing() {
        let jobs = wwr()
            .extract_listing(&page("https://weworkremotely.com/", "<div class=\"no-results\">Nothing</div>"))
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn detail_prefers_json_ld_and_keeps_page_url() {
        let html = r#"
            <html><head><script type="application/ld+json">
              {"@type": "JobPosting", "title": "Staff Engineer", "url": "https://elsewhere.example/1",
               "hiringOrganization": {"name": "Initech"}}
            </script></head>
            <body>
              <h1>Old Title</h1>
              <div class="lis-container__job__content__description"><p>Line one</p><p>Line two</p></div>
            </body></html>"#;
        let job = wwr()
            .extract_detail(&page("https://weworkremotely.com/remote-jobs/initech-staff", html))
            .unwrap();

        assert_eq!(job.external_url, "https://weworkremotely.com/remote-jobs/initech-staff");
        assert_eq!(job.title.as_deref(), Some("Staff Engineer"));
        assert_eq!(job.company_name.as_deref(), Some("Initech"));
        assert_eq!(job.description.as_deref(), Some("Line one\nLine two"));
    }

    #[test]
    fn empty_detail_page_is_a_parse_error() {
        let err = wwr()
            .extract_detail(&page("https://weworkremotely.com/remote-jobs/gone", "<html></html>"))
            .unwrap_err();
        assert!(err.reason.contains("no job title"));
    }

    #[test]
    fn bad_selector_fails_construction() {
        let spec = SelectorSpec {
            listing: ListingSelectors {
                card: "li[[".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            SelectorAdapter::new("broken", spec),
            Err(ScanError::AdapterConfig { .. })
        ));
    }

    #[test]
    fn presets_compile() {
        for (site, spec) in [
            ("linkedin", SelectorSpec::linkedin()),
            ("indeed", SelectorSpec::indeed()),
            ("remoteok", SelectorSpec::remoteok()),
            ("weworkremotely", SelectorSpec::weworkremotely()),
        ] {
            assert!(SelectorAdapter::new(site, spec).is_ok(), "{site} preset failed");
        }
    }
}
