use std::fmt;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, SearchConfig};

static ABS_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[A-Za-z0-9.-]+(?::\d+)?/abs/\d+\.\d+(?:v\d+)?").unwrap()
});
static RESULT_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".list-title > a").unwrap());

const NO_RESULTS_MARKERS: &[&str] = &["No results found", "produced no results"];

const NOT_FOUND_TEXT: &str = "arXiv link not found";
const EMPTY_TITLE_TEXT: &str = "empty title";
const STATUS_PREFIX: &str = "request failed with status ";
const NETWORK_TEXT: &str = "network error while searching arXiv";

/// Result of resolving one title. `Display` is the text stored in the
/// `arxiv_link` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Found(String),
    NotFound,
    EmptyTitle,
    Status(u16),
    Network,
}

impl LinkOutcome {
    /// Recover the outcome class from stored column text.
    pub fn parse(stored: &str) -> Self {
        let s = stored.trim();
        match s {
            NOT_FOUND_TEXT => LinkOutcome::NotFound,
            EMPTY_TITLE_TEXT => LinkOutcome::EmptyTitle,
            NETWORK_TEXT => LinkOutcome::Network,
            _ => {
                if let Some(code) = s.strip_prefix(STATUS_PREFIX).and_then(|c| c.parse().ok()) {
                    LinkOutcome::Status(code)
                } else if s.starts_with("http://") || s.starts_with("https://") {
                    LinkOutcome::Found(s.to_string())
                } else {
                    LinkOutcome::NotFound
                }
            }
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LinkOutcome::Found(_))
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkOutcome::Found(url) => f.write_str(url),
            LinkOutcome::NotFound => f.write_str(NOT_FOUND_TEXT),
            LinkOutcome::EmptyTitle => f.write_str(EMPTY_TITLE_TEXT),
            LinkOutcome::Status(code) => write!(f, "{}{}", STATUS_PREFIX, code),
            LinkOutcome::Network => f.write_str(NETWORK_TEXT),
        }
    }
}

// ── Search endpoint ──

pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// GET against the search endpoint. `Err` means the request never produced
/// a response (connect failure, timeout).
pub trait SearchBackend {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpReply>>;
}

pub struct HttpSearch {
    client: reqwest::Client,
}

impl HttpSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self { client })
    }
}

impl SearchBackend for HttpSearch {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

/// Anything that can turn a clean title into a link outcome. `Err` is an
/// unexpected failure for that one row.
pub trait TitleLookup {
    fn lookup(&self, clean_title: &str) -> impl Future<Output = Result<LinkOutcome>>;
}

// ── Resolver ──

pub struct Resolver<B> {
    backend: B,
    search_url: Url,
    query_prefix: usize,
    retry: RetryPolicy,
}

impl<B: SearchBackend> Resolver<B> {
    pub fn new(backend: B, search: &SearchConfig, retry: RetryPolicy) -> Result<Self> {
        let base = search.endpoint.trim_end_matches('/');
        let search_url = Url::parse(&format!("{}/search/", base))
            .with_context(|| format!("Invalid search endpoint: {}", search.endpoint))?;
        Ok(Self {
            backend,
            search_url,
            query_prefix: search.query_prefix,
            retry,
        })
    }

    fn query_url(&self, title: &str) -> Url {
        let query: String = title.chars().take(self.query_prefix).collect();
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("query", query.trim())
            .append_pair("searchtype", "title");
        url
    }

    /// Resolve a title to an abstract-page link. Never fails: transport and
    /// status failures are retried within the policy, then reported as
    /// sentinel outcomes.
    pub async fn resolve(&self, title: &str) -> LinkOutcome {
        if title.trim().is_empty() {
            return LinkOutcome::EmptyTitle;
        }

        let url = self.query_url(title);
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt == attempts;
            match self.backend.get(url.as_str()).await {
                Ok(reply) if (200..300).contains(&reply.status) => {
                    return read_results(&reply.body, &self.search_url);
                }
                Ok(reply) => {
                    warn!(
                        "Search returned status {} (attempt {}/{})",
                        reply.status, attempt, attempts
                    );
                    if last {
                        return LinkOutcome::Status(reply.status);
                    }
                    self.backoff(&self.retry.status_jitter).await;
                }
                Err(e) => {
                    warn!("Search request failed (attempt {}/{}): {:#}", attempt, attempts, e);
                    if last {
                        return LinkOutcome::Network;
                    }
                    self.backoff(&self.retry.transport_jitter).await;
                }
            }
        }
    }

    async fn backoff(&self, jitter: &RangeInclusive<f64>) {
        let delay = jittered(self.retry.base_delay, jitter);
        info!("Retrying search in {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

impl<B: SearchBackend> TitleLookup for Resolver<B> {
    async fn lookup(&self, clean_title: &str) -> Result<LinkOutcome> {
        Ok(self.resolve(clean_title).await)
    }
}

/// `base` plus a uniform draw from `jitter` seconds.
pub fn jittered(base: Duration, jitter: &RangeInclusive<f64>) -> Duration {
    let (lo, hi) = (*jitter.start(), *jitter.end());
    let extra = if lo < hi {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    base + Duration::from_secs_f64(extra.max(0.0))
}

/// Cheap pattern scan first; the result page is only parsed when the body
/// has no direct link and no "no results" marker.
fn read_results(body: &str, base: &Url) -> LinkOutcome {
    if let Some(m) = ABS_LINK_RE.find(body) {
        return LinkOutcome::Found(m.as_str().to_string());
    }
    if NO_RESULTS_MARKERS.iter().any(|marker| body.contains(marker)) {
        return LinkOutcome::NotFound;
    }

    let document = Html::parse_document(body);
    let href = document
        .select(&RESULT_LINK_SEL)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty());
    match href {
        Some(href) => match result_link(href, base) {
            Ok(link) => LinkOutcome::Found(link.to_string()),
            Err(e) => {
                debug!("Unusable result link {:?}: {}", href, e);
                LinkOutcome::NotFound
            }
        },
        None => LinkOutcome::NotFound,
    }
}

/// Absolute and protocol-relative hrefs are kept; anything else hangs off
/// the endpoint origin, whatever path the search page lives under.
fn result_link(href: &str, base: &Url) -> Result<Url, impl fmt::Display> {
    if href.starts_with("//") {
        return base.join(href);
    }
    Url::parse(href).or_else(|_| base.join(&format!("/{}", href.trim_start_matches('/'))))
}
