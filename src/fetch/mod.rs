//! Provider transport: rate-limited, retrying HTTP plumbing plus the
//! capability traits the orchestrator composes providers through.
//!
//! Retries and rate limiting live entirely at this boundary; callers see a
//! request that either eventually returns data or fails after exhausting
//! retries.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{MatchRecord, OddsRecord, PlayerRecord, PlayerStatRecord, TeamRecord};

pub mod abios;
pub mod oddspapi;
pub mod pandascore;

pub use abios::Abios;
pub use oddspapi::OddsPapi;
pub use pandascore::PandaScore;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error (status {status}): {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// One transport per provider: the rate limiter serializes requests with a
/// minimum inter-request delay, and failed calls are retried with
/// exponential backoff up to a small fixed bound.
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    backoff: BackoffPolicy,
}

impl Transport {
    pub fn new(
        base_url: impl Into<String>,
        min_request_interval: Duration,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let interval = min_request_interval.max(Duration::from_millis(1));
        let limiter = RateLimiter::direct(Quota::with_period(interval).unwrap());

        Ok(Self {
            client,
            base_url: base_url.into(),
            limiter,
            backoff: BackoffPolicy::default(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<T, FetchError> {
        self.request_json(Method::GET, path, query, None, headers)
            .await
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&'static str, String)],
        headers: &[(&'static str, String)],
    ) -> Result<T, FetchError> {
        self.request_json(Method::POST, path, &[], Some(form), headers)
            .await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: Option<&[(&'static str, String)]>,
        headers: &[(&'static str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            // Wait for rate limit
            self.limiter.until_ready().await;

            let mut request = self.client.request(method.clone(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(form) = form {
                request = request.form(form);
            }
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await?;

                    if status.is_success() {
                        return Ok(serde_json::from_str(&body)?);
                    }
                    if retryable_status(status) && attempt < self.backoff.max_retries {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if retryable_error(&err) && attempt < self.backoff.max_retries {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

/// Which slice of a provider's match feed to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchWindow {
    Upcoming,
    Live,
    Past { page: u32 },
}

/// Match-data provider capability, injected into the orchestrator. Each
/// implementation authenticates itself and builds its own auth headers.
#[async_trait::async_trait]
pub trait MatchDataProvider: Send + Sync {
    fn source(&self) -> &'static str;

    /// Providers with a token-exchange step override this.
    async fn authenticate(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)>;

    async fn fetch_teams(&self) -> Result<Vec<TeamRecord>, FetchError>;
    async fn fetch_players(&self) -> Result<Vec<PlayerRecord>, FetchError>;
    async fn fetch_matches(&self, window: MatchWindow) -> Result<Vec<MatchRecord>, FetchError>;
    async fn fetch_match_stats(
        &self,
        match_external_id: &str,
    ) -> Result<Vec<PlayerStatRecord>, FetchError>;

    /// How many pages of match history a full sync should walk.
    fn history_pages(&self) -> u32 {
        0
    }
}

/// Odds provider capability.
#[async_trait::async_trait]
pub trait OddsProvider: Send + Sync {
    fn source(&self) -> &'static str;

    fn auth_headers(&self) -> Vec<(&'static str, String)>;

    async fn fetch_odds(&self, live: bool) -> Result<Vec<OddsRecord>, FetchError>;

    /// Sharp reference lines (Pinnacle).
    async fn fetch_sharp_odds(&self) -> Result<Vec<OddsRecord>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(31), Duration::from_secs(10));
    }

    #[test]
    fn only_server_side_failures_are_retryable() {
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!retryable_status(StatusCode::NOT_FOUND));
    }
}
