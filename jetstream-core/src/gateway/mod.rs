//! Catalog gateway client.
//!
//! Talks to a pool of equivalent catalog endpoints with round-robin
//! fallback. A rate-limited endpoint is put on a 30-minute cooldown;
//! transport errors and 5xx responses rotate without the extended
//! cooldown. 4xx and decode errors are not recoverable by rotation and
//! surface immediately.

mod metadata;
mod search;

pub use metadata::TrackInfo;

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::Cache;

/// Some catalog endpoints return 403 to non-browser user agents.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:83.0) Gecko/20100101 Firefox/83.0";

/// Provider segment used in every identifier this client mints.
pub const PROVIDER: &str = "squidwtf";

const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Whether rotating to another endpoint can help.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::RateLimited | GatewayError::Transport(_) => true,
            GatewayError::HttpStatus(code) => *code >= 500,
            GatewayError::Decode(_) | GatewayError::NotFound(_) => false,
        }
    }
}

/// Endpoint rotation state. Guarded by a single reader/writer lock so the
/// cooldown stamp and the index advance are one atomic step.
struct Endpoints {
    urls: Vec<String>,
    available_at: Vec<Option<Instant>>,
    current: usize,
}

impl Endpoints {
    fn new(urls: Vec<String>) -> Self {
        let n = urls.len();
        Self {
            urls,
            available_at: vec![None; n],
            current: 0,
        }
    }

    /// Pick the endpoint to try: the current one if available, otherwise
    /// the next available in round-robin order. When every endpoint is on
    /// cooldown the current one is returned anyway, flagged as such.
    fn pick(&self, now: Instant) -> (usize, String, bool) {
        for offset in 0..self.urls.len() {
            let idx = (self.current + offset) % self.urls.len();
            let available = match self.available_at[idx] {
                None => true,
                Some(at) => at <= now,
            };
            if available {
                return (idx, self.urls[idx].clone(), false);
            }
        }
        (self.current, self.urls[self.current].clone(), true)
    }

    /// Record a failure on `idx`: stamp the cooldown (rate limits only) and
    /// advance past the failed endpoint in the same critical section.
    fn mark_failure(&mut self, idx: usize, cooldown: Option<Duration>, now: Instant) {
        if let Some(cooldown) = cooldown {
            self.available_at[idx] = Some(now + cooldown);
        }
        self.current = (idx + 1) % self.urls.len();
    }
}

pub struct GatewayClient {
    http: reqwest::Client,
    cache: Cache,
    endpoints: RwLock<Endpoints>,
    search_limit: usize,
}

impl GatewayClient {
    pub fn new(urls: Vec<String>, search_limit: usize, cache: Cache) -> Result<Self, GatewayError> {
        if urls.is_empty() {
            return Err(GatewayError::Transport(
                "no catalog endpoints configured".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            cache,
            endpoints: RwLock::new(Endpoints::new(urls)),
            search_limit,
        })
    }

    pub fn search_limit(&self) -> usize {
        self.search_limit
    }

    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The endpoint the next request will go to.
    async fn current_endpoint(&self) -> (usize, String) {
        let endpoints = self.endpoints.read().await;
        let (idx, url, all_cooling) = endpoints.pick(Instant::now());
        if all_cooling {
            debug!("all catalog endpoints are cooling down, using current anyway");
        }
        (idx, url)
    }

    /// Run `action` against endpoints in fallback order.
    ///
    /// Each endpoint is tried at most once. Recoverable failures rotate;
    /// everything else surfaces immediately; when the pool is exhausted the
    /// last error is returned.
    pub(crate) async fn try_with_fallback<T, Fut>(
        &self,
        op: &'static str,
        mut action: impl FnMut(String) -> Fut,
    ) -> Result<T, GatewayError>
    where
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let attempts = self.endpoints.read().await.urls.len().max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            let (idx, base) = self.current_endpoint().await;
            match action(base.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() => {
                    warn!("gateway {op} failed on {base} (attempt {attempt}/{attempts}): {e}");
                    let cooldown = matches!(e, GatewayError::RateLimited)
                        .then_some(RATE_LIMIT_COOLDOWN);
                    self.endpoints
                        .write()
                        .await
                        .mark_failure(idx, cooldown, Instant::now());
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        error!("gateway {op}: all endpoints failed");
        Err(last_err.unwrap_or_else(|| GatewayError::Transport("no endpoints".to_string())))
    }

    /// GET a JSON document, mapping status codes onto error kinds.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        debug!("gateway GET {url}");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(GatewayError::RateLimited),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(url.to_string())),
            status if !status.is_success() => Err(GatewayError::HttpStatus(status.as_u16())),
            _ => resp
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string())),
        }
    }

    /// Fetch raw bytes (cover art) with the browser user agent.
    pub async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), GatewayError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "image/*,*/*")
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::HttpStatus(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok((bytes.to_vec(), content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Endpoints {
        Endpoints::new((0..n).map(|i| format!("https://e{i}")).collect())
    }

    #[test]
    fn pick_prefers_current() {
        let eps = endpoints(3);
        let (idx, url, all_cooling) = eps.pick(Instant::now());
        assert_eq!((idx, url.as_str(), all_cooling), (0, "https://e0", false));
    }

    #[test]
    fn rate_limit_cools_and_advances() {
        let mut eps = endpoints(3);
        let now = Instant::now();
        eps.mark_failure(0, Some(RATE_LIMIT_COOLDOWN), now);

        let (idx, _, all_cooling) = eps.pick(now);
        assert_eq!(idx, 1);
        assert!(!all_cooling);

        // e0 becomes available again after the cooldown elapses.
        let later = now + RATE_LIMIT_COOLDOWN + Duration::from_secs(1);
        eps.current = 0;
        let (idx, _, _) = eps.pick(later);
        assert_eq!(idx, 0);
    }

    #[test]
    fn transport_failure_rotates_without_cooldown() {
        let mut eps = endpoints(2);
        let now = Instant::now();
        eps.mark_failure(0, None, now);
        assert_eq!(eps.current, 1);
        // No cooldown stamp: e0 is immediately selectable again.
        eps.current = 0;
        let (idx, _, _) = eps.pick(now);
        assert_eq!(idx, 0);
    }

    #[test]
    fn all_cooling_still_returns_current() {
        let mut eps = endpoints(2);
        let now = Instant::now();
        eps.mark_failure(0, Some(RATE_LIMIT_COOLDOWN), now);
        eps.mark_failure(1, Some(RATE_LIMIT_COOLDOWN), now);

        let (idx, _, all_cooling) = eps.pick(now);
        assert_eq!(idx, eps.current);
        assert!(all_cooling);
    }

    #[test]
    fn cooldown_skips_to_next_available() {
        let mut eps = endpoints(3);
        let now = Instant::now();
        eps.mark_failure(0, Some(RATE_LIMIT_COOLDOWN), now);
        eps.mark_failure(1, Some(RATE_LIMIT_COOLDOWN), now);
        eps.current = 0;
        let (idx, _, all_cooling) = eps.pick(now);
        assert_eq!(idx, 2);
        assert!(!all_cooling);
    }

    #[test]
    fn recoverability() {
        assert!(GatewayError::RateLimited.is_recoverable());
        assert!(GatewayError::Transport("reset".into()).is_recoverable());
        assert!(GatewayError::HttpStatus(502).is_recoverable());
        assert!(!GatewayError::HttpStatus(403).is_recoverable());
        assert!(!GatewayError::Decode("bad json".into()).is_recoverable());
        assert!(!GatewayError::NotFound("x".into()).is_recoverable());
    }
}
