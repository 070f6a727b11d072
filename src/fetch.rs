use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;

use crate::cache::RawCache;

/// A response as seen by the fetcher: status code plus decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

impl Page {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rate limiting and server errors are retried like transport failures.
    pub fn is_throttled(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// One HTTP GET. Implementations return the status and decoded body, or a
/// transport-level error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, user_agent: &str) -> anyhow::Result<Page>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, user_agent: &str) -> anyhow::Result<Page> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("read body: {url}"))?;
        Ok(Page { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Slept before every network attempt.
    pub delay: Duration,
    /// Slept after each failed attempt.
    pub cooldown: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
            attempts: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport exhausted after {attempts} attempts: {url}")]
    TransportExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

pub struct Fetcher<T> {
    transport: T,
    cache: Option<RawCache>,
    populate_cache: bool,
    policy: RetryPolicy,
    user_agent: String,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy, user_agent: impl Into<String>) -> Self {
        Self {
            transport,
            cache: None,
            populate_cache: false,
            policy,
            user_agent: user_agent.into(),
        }
    }

    pub fn with_cache(mut self, cache: RawCache, populate: bool) -> Self {
        self.cache = Some(cache);
        self.populate_cache = populate;
        self
    }

    /// Cached body, else the first non-throttled response. Only 2xx bodies
    /// are written to the cache.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(cache) = &self.cache
            && let Some(body) = cache.load_quietly(url).await
        {
            tracing::debug!(%url, "cache hit");
            return Ok(body);
        }

        let mut remaining = self.policy.attempts;
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            tokio::time::sleep(self.policy.delay).await;

            let err = match self.transport.get(url, &self.user_agent).await {
                Ok(page) if page.is_throttled() => {
                    anyhow::anyhow!("server answered HTTP {}", page.status)
                }
                Ok(page) => {
                    if !page.is_success() {
                        tracing::warn!(%url, status = page.status, "unexpected status; not caching");
                    } else if self.populate_cache
                        && let Some(cache) = &self.cache
                    {
                        cache.store_quietly(url, &page.body).await;
                    }
                    return Ok(page.body);
                }
                Err(err) => err,
            };

            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                return Err(FetchError::TransportExhausted {
                    url: url.to_owned(),
                    attempts: attempt,
                    source: err,
                });
            }
            tracing::warn!(
                %url,
                attempt,
                remaining,
                cooldown_ms = self.policy.cooldown.as_millis() as u64,
                "request failed: {err:#}"
            );
            tokio::time::sleep(self.policy.cooldown).await;
        }
    }
}
