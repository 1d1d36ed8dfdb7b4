//! GitHub REST client
//!
//! Every response is classified here, once, into success or a [`ClassifiedError`]. Successful
//! responses feed their rate-limit headers to the [`RateGovernor`] before the caller sees
//! the data.

use super::models::{ErrorBody, RateLimitEntry, RateLimitResponse};
use crate::engine::{BudgetSource, ClassifiedError, RateBudget, RateGovernor, Surface};
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::app_err;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "    github";

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "org-survey";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: u8 = 100;
const DEFAULT_MAX_PAGES: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One decoded response body plus the URL of the following page, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub value: T,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
#[expect(clippy::struct_field_names, reason = "client field stores the underlying HTTP client")]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
    governor: Arc<RateGovernor>,
    max_pages: u32,
}

impl Client {
    /// Create a client for the API at `base_url`, authenticating with `token` when given.
    pub fn new(token: Option<&str>, base_url: impl Into<String>, governor: Arc<RateGovernor>) -> crate::Result<Self> {
        use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};

        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
            auth_val.set_sensitive(true);
            let _ = headers.insert(AUTHORIZATION, auth_val);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            governor,
            max_pages: DEFAULT_MAX_PAGES,
        })
    }

    /// Limit how many pages [`get_all`](Self::get_all) follows.
    #[must_use]
    pub fn with_max_pages(self, max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.max(1),
            ..self
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub const fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Fetch and decode a single resource.
    pub async fn get<T: DeserializeOwned>(&self, cancel: &CancellationToken, path: &str) -> Result<T, ClassifiedError> {
        let url = self.url(path);
        Ok(self.get_page(cancel, &url, true).await?.value)
    }

    /// Fetch every page of a list resource, following `Link: rel="next"`.
    pub async fn get_all<T: DeserializeOwned>(&self, cancel: &CancellationToken, path: &str) -> Result<Vec<T>, ClassifiedError> {
        let mut url = with_page_size(&self.url(path));
        let mut all = Vec::new();

        for page in 1..=self.max_pages {
            let Page { value, next } = self.get_page::<Vec<T>>(cancel, &url, true).await?;
            all.extend(value);

            match next {
                Some(next) => url = next,
                None => return Ok(all),
            }

            if page == self.max_pages {
                log::warn!(
                    target: LOG_TARGET,
                    "Page limit ({}) reached for '{path}', results are truncated",
                    self.max_pages
                );
            }
        }

        Ok(all)
    }

    /// Issue one GET and classify the response.
    ///
    /// When `gated` is set, a successful response is held by the governor if its budget
    /// is low.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
        gated: bool,
    ) -> Result<Page<T>, ClassifiedError> {
        log::trace!(target: LOG_TARGET, "GET {url}");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClassifiedError::canceled()),
            r = self.client.get(url).send() => r,
        }
        .map_err(|e| ClassifiedError::transient(e.into()).context(format!("requesting '{url}'")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let budget = budget_from_headers(&headers);

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClassifiedError::canceled()),
            b = response.bytes() => b,
        }
        .map_err(|e| ClassifiedError::transient(e.into()).context(format!("reading response from '{url}'")))?;

        if let Some(error) = classify(status, &headers, budget.as_ref(), &body, Utc::now()) {
            if let Some(budget) = budget {
                self.governor.record(budget);
            }
            return Err(error.context(format!("GET '{url}'")));
        }

        let value = serde_json::from_slice::<T>(&body)
            .map_err(|e| ClassifiedError::fatal(e.into()).context(format!("decoding response from '{url}'")))?;

        if let Some(budget) = budget {
            if gated {
                let _ = self
                    .governor
                    .check_and_wait(budget.surface, budget.remaining, budget.limit, budget.reset_at, cancel)
                    .await?;
            } else {
                self.governor.record(budget);
            }
        }

        Ok(Page {
            value,
            next: next_link(&headers),
        })
    }
}

impl BudgetSource for Client {
    async fn fetch_budgets(&self, cancel: &CancellationToken) -> Result<Vec<RateBudget>, ClassifiedError> {
        let url = self.url("/rate_limit");
        let response: RateLimitResponse = self.get_page(cancel, &url, false).await?.value;
        let resources = response.resources;

        Ok([
            (Surface::Core, Some(resources.core)),
            (Surface::GraphQl, resources.graphql),
            (Surface::AuditLog, resources.audit_log),
        ]
        .into_iter()
        .filter_map(|(surface, entry)| entry.and_then(|e| budget_from_entry(surface, e)))
        .collect())
    }
}

fn budget_from_entry(surface: Surface, entry: RateLimitEntry) -> Option<RateBudget> {
    Some(RateBudget {
        surface,
        remaining: entry.remaining,
        limit: entry.limit,
        reset_at: DateTime::from_timestamp(entry.reset, 0)?,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

/// Read the `x-ratelimit-*` headers of a response.
///
/// Returns `None` when the headers are missing or name a resource that isn't tracked.
fn budget_from_headers(headers: &HeaderMap) -> Option<RateBudget> {
    let remaining = header_str(headers, "x-ratelimit-remaining")?.parse::<u64>().ok()?;
    let limit = header_str(headers, "x-ratelimit-limit")?.parse::<u64>().ok()?;
    let reset = header_str(headers, "x-ratelimit-reset")?.parse::<i64>().ok()?;
    let surface = Surface::from_resource(header_str(headers, "x-ratelimit-resource").unwrap_or("core"))?;

    Some(RateBudget {
        surface,
        remaining,
        limit,
        reset_at: DateTime::from_timestamp(reset, 0)?,
    })
}

/// Parse the `Retry-After` header value as seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extract the `rel="next"` target of a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    header_str(headers, LINK.as_str())?.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

fn with_page_size(url: &str) -> String {
    if url.contains("per_page=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&per_page={PAGE_SIZE}")
    } else {
        format!("{url}?per_page={PAGE_SIZE}")
    }
}

fn describe(status: StatusCode, body: &[u8]) -> ohno::AppError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(e) => app_err!("HTTP {status}: {}", e.message),
        Err(_) => app_err!("HTTP {status}"),
    }
}

/// Decide what a response means for the caller. `None` means success.
fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    budget: Option<&RateBudget>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Option<ClassifiedError> {
    if status.is_success() {
        return None;
    }

    let cause = describe(status, body);

    Some(match status.as_u16() {
        401 => ClassifiedError::auth(cause),

        // Secondary rate limits send Retry-After; primary ones exhaust the budget.
        403 | 429 => {
            if let Some(delay) = parse_retry_after(headers) {
                ClassifiedError::rate_limited(cause, Some(delay))
            } else if let Some(budget) = budget.filter(|b| b.remaining == 0) {
                // a reset already past leaves the delay to the backoff schedule
                let until_reset = (budget.reset_at - now).to_std().ok().filter(|d| !d.is_zero());
                ClassifiedError::rate_limited(cause, until_reset)
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                ClassifiedError::rate_limited(cause, None)
            } else {
                // no access to this particular entity
                ClassifiedError::fatal(cause)
            }
        }

        404 => ClassifiedError::fatal(cause),

        _ if status.is_server_error() => ClassifiedError::transient(cause),

        _ => ClassifiedError::fatal(cause),
    })
}
