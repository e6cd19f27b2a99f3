//! Jikan (unofficial MyAnimeList API) adapter.
//!
//! Lists are paged: a page holding exactly `page_size` entries means there may
//! be more, so the next page is requested after `page_delay`. Rate limiting and
//! network failures are retried with a linearly growing delay; everything else
//! fails the fetch at once.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::FetchError;
use super::{ItemSource, SourceItem};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.jikan.moe/v3";

/// Entries per page returned by the API.
pub const DEFAULT_PAGE_SIZE: usize = 300;

/// MyAnimeList usernames: 2 to 16 letters, digits, `_` or `-`.
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,16}$").expect("valid username regex"));

#[derive(Debug, Clone)]
pub struct JikanConfig {
    pub base_url: String,
    pub page_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub page_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for JikanConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: 5,
            retry_base_delay: Duration::from_secs(2),
            page_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl JikanConfig {
    /// Defaults overridden by `ANIMESORT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url =
            std::env::var("ANIMESORT_JIKAN_BASE_URL").unwrap_or(defaults.base_url);

        let max_retries = std::env::var("ANIMESORT_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_base_delay = std::env::var("ANIMESORT_RETRY_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_base_delay);

        let request_timeout = std::env::var("ANIMESORT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Self {
            base_url,
            max_retries,
            retry_base_delay,
            // Pages share the retry pacing.
            page_delay: retry_base_delay,
            request_timeout,
            ..defaults
        }
    }
}

#[derive(Debug, Clone)]
pub struct JikanSource {
    client: reqwest::Client,
    config: JikanConfig,
}

#[derive(Deserialize)]
struct AnimeListPage {
    #[serde(default)]
    anime: Option<Vec<SourceItem>>,
}

impl JikanSource {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(JikanConfig::default())
    }

    pub fn from_env() -> Result<Self, FetchError> {
        Self::with_config(JikanConfig::from_env())
    }

    pub fn with_config(config: JikanConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .gzip(true)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &JikanConfig {
        &self.config
    }

    fn page_url(&self, username: &str, page: u32) -> String {
        format!(
            "{}/user/{username}/animelist/all/{page}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn fetch_page(&self, username: &str, page: u32) -> Result<Vec<SourceItem>, FetchError> {
        let response = self.client.get(self.page_url(username, page)).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let parsed: AnimeListPage = serde_json::from_str(&body)
            .map_err(|e| FetchError::Parse(format!("page {page}: {e}")))?;
        parsed
            .anime
            .ok_or_else(|| FetchError::MissingData(format!("page {page} has no anime list")))
    }

    async fn fetch_page_with_retry(
        &self,
        username: &str,
        page: u32,
    ) -> Result<Vec<SourceItem>, FetchError> {
        let mut retry = 0;
        loop {
            match self.fetch_page(username, page).await {
                Ok(items) => return Ok(items),
                Err(err) if err.is_retryable() => {
                    if retry >= self.config.max_retries {
                        return Err(FetchError::RetriesExhausted {
                            attempts: retry + 1,
                            last: err.to_string(),
                        });
                    }
                    retry += 1;
                    let delay = match &err {
                        FetchError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).max(retry_delay(self.config.retry_base_delay, retry)),
                        _ => retry_delay(self.config.retry_base_delay, retry),
                    };
                    warn!(
                        page,
                        retry,
                        code = err.code(),
                        delay_ms = delay.as_millis() as u64,
                        "list fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl ItemSource for JikanSource {
    async fn fetch_items(&self, source_id: &str) -> Result<Vec<SourceItem>, FetchError> {
        let username = source_id.trim();
        if !USERNAME_RE.is_match(username) {
            return Err(FetchError::InvalidSource(format!(
                "{username:?} is not a valid username"
            )));
        }

        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_page_with_retry(username, page).await?;
            let len = batch.len();
            debug!(page, len, "fetched list page");

            if len == 0 {
                if page == 1 {
                    return Err(FetchError::MissingData(format!(
                        "list of {username} is empty"
                    )));
                }
                break;
            }
            items.extend(batch);
            if len < self.config.page_size {
                break;
            }
            page += 1;
            sleep(self.config.page_delay).await;
        }
        Ok(items)
    }
}

/// Delay before retry number `retry` (1-based): `retry * base`.
fn retry_delay(base: Duration, retry: u32) -> Duration {
    base * retry.max(1)
}
