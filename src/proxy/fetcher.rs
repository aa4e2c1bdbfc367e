//! Listing fetcher for downloading single pages of the proxy listing
//!
//! One GET per call, no retries: the harvester decides what a failure means.

use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default listing site root; pages live under `<base>/<CODE>/socks5/uptime/all[/<n>]`
pub const DEFAULT_BASE_URL: &str = "https://free-proxy.cz/en/proxylist/country";

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// A source of raw listing pages
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch page `page` (1-based) of the listing for `country`.
    ///
    /// Any HTTP response yields its body; only transport failures are errors.
    async fn fetch_page(&self, country: &str, page: u32) -> Result<String>;
}

/// Configuration for the listing fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Listing site root
    pub base_url: String,
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Protocol family segment
    pub protocol: String,
    /// Sort key segment
    pub sort: String,
    /// Anonymity filter segment
    pub filter: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            protocol: "socks5".to_string(),
            sort: "uptime".to_string(),
            filter: "all".to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Fetches listing pages over HTTP
pub struct ListingFetcher {
    config: FetcherConfig,
    client: Client,
}

impl ListingFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self { config, client })
    }

    /// Build the URL of a listing page. Page 1 has no page segment.
    pub fn page_url(&self, country: &str, page: u32) -> String {
        let base = format!(
            "{}/{}/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            country,
            self.config.protocol,
            self.config.sort,
            self.config.filter
        );
        if page <= 1 {
            base
        } else {
            format!("{}/{}", base, page)
        }
    }
}

#[async_trait]
impl ListingSource for ListingFetcher {
    async fn fetch_page(&self, country: &str, page: u32) -> Result<String> {
        let url = self.page_url(country, page);
        debug!(%url, "Fetching listing page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HarvestError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        debug!(%url, status = status.as_u16(), bytes = body.len(), "Fetched listing page");
        Ok(body)
    }
}
