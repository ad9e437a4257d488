//! Plain HTTP fetcher built on reqwest.
//!
//! No JavaScript rendering: boards that only render client-side need a
//! browser-backed [`PageFetcher`] instead.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpFetcherConfig;
use crate::error::{ConfigResult, FetchError};
use crate::traits::{FetchOptions, PageContent, PageFetcher};

/// Lowercased markers of bot-challenge interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-challenge",
    "challenge-platform",
    "cf-browser-verification",
    "verify you are human",
    "are you a robot",
    "g-recaptcha",
    "h-captcha",
    "px-captcha",
    "unusual traffic from your computer",
];

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(config: &HttpFetcherConfig) -> ConfigResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client })
    }

    fn network(url: &Url, message: impl Into<String>) -> FetchError {
        FetchError::Network {
            url: url.to_string(),
            message: message.into(),
        }
    }

    fn classify_request_error(url: &Url, options: &FetchOptions, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: options.timeout,
            }
        } else {
            Self::network(url, err.to_string())
        }
    }
}

/// Map a response status and body onto a fetch outcome.
///
/// 403 and 429 are always treated as blocks. 503 is a block only when the
/// body is a challenge page; a 2xx challenge page is a block too.
pub(crate) fn classify_response(
    url: &Url,
    status: StatusCode,
    body: &str,
) -> std::result::Result<(), FetchError> {
    let challenge = find_challenge_marker(body);

    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Err(FetchError::Blocked {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!("HTTP {status}"),
        }),
        StatusCode::SERVICE_UNAVAILABLE if challenge.is_some() => Err(FetchError::Blocked {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!("HTTP {status} challenge ({})", challenge.unwrap_or_default()),
        }),
        s if !s.is_success() => Err(FetchError::Network {
            url: url.to_string(),
            message: format!("HTTP {s}"),
        }),
        _ => match challenge {
            Some(marker) => Err(FetchError::Blocked {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("bot challenge page ({marker})"),
            }),
            None => Ok(()),
        },
    }
}

fn find_challenge_marker(body: &str) -> Option<&'static str> {
    let lowered = body.to_ascii_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
    ) -> std::result::Result<PageContent, FetchError> {
        debug!(url = %url, "Fetching page");

        let response = self
            .client
            .get(url.clone())
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| Self::classify_request_error(url, options, e))?;

        let status = response.status();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_request_error(url, options, e))?;

        if let Err(e) = classify_response(url, status, &body) {
            warn!(url = %url, status = %status, error = %e, "Fetch rejected");
            return Err(e);
        }

        debug!(url = %final_url, bytes = body.len(), "Fetched page");
        Ok(PageContent::new(final_url, body))
    }
}
