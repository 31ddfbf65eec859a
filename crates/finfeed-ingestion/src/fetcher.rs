//! Bounded-retry HTTP fetching.
//!
//! The [`Fetcher`] performs one logical retrieval of one URL:
//! - sleeps a random polite delay in `[delay_min, delay_max]` before each attempt
//! - retries transport failures (connect errors, timeouts, broken bodies)
//!   with exponential backoff, up to `max_attempts` in total
//! - never retries a received response; a non-200 status is returned as a
//!   failed [`FetchOutcome`] carrying the status code
//! - checksums the body of a 200 response with [`crate::checksum::sha256_hex`]
//!
//! The network sits behind the [`Transport`] trait so tests can script
//! responses with [`crate::mock::MockTransport`].

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use finfeed_common::{FinfeedError, SandboxClient};

use crate::checksum::sha256_hex;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Per-call timeout used when the caller does not pass one.
    pub timeout: Duration,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(5),
        }
    }
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// A response that reached us, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request blocked: {0}")]
    Blocked(String),

    #[error("request error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout | TransportError::Body(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] over the host-capped reqwest client.
pub struct ReqwestTransport {
    client: SandboxClient,
}

impl ReqwestTransport {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        let request = self.client.get(url).map_err(|e| match e {
            FinfeedError::SecurityError(msg) => TransportError::Blocked(msg),
            other => TransportError::Other(other.to_string()),
        })?;

        let resp = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_builder() {
                TransportError::Other(e.to_string())
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        Ok(TransportResponse { status, content_type, body: body.to_vec() })
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Uniform result of a fetch, successful or not.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub success: bool,
    pub url: String,
    pub status_code: Option<u16>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub checksum: Option<String>,
    pub error: Option<String>,
    pub duration: Duration,
    pub attempts: u32,
}

impl FetchOutcome {
    fn failure(url: &str, status_code: Option<u16>, error: String, duration: Duration, attempts: u32) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            status_code,
            body: None,
            content_type: None,
            checksum: None,
            error: Some(error),
            duration,
            attempts,
        }
    }

    /// Short failure description for health records and job errors.
    pub fn failure_reason(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(e), _) => e.clone(),
            (None, Some(code)) => format!("HTTP {code}"),
            (None, None) => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: TransportError,
    },
}

// ── Backoff ───────────────────────────────────────────────────────────────────

/// Exponential backoff before attempt `attempt + 1`: `min * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    min.saturating_mul(factor).min(max).max(min.min(max))
}

/// Adds up to 25% random jitter, never exceeding `cap`.
fn jittered(base: Duration, cap: Duration) -> Duration {
    let spread = (base.as_millis() / 4) as u64;
    let extra = if spread == 0 { 0 } else { rand::thread_rng().gen_range(0..=spread) };
    (base + Duration::from_millis(extra)).min(cap)
}

fn polite_delay(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

/// Retrieves URLs. Holds no shared mutable state; safe to share across workers.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    cfg: FetchConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, cfg: FetchConfig) -> Self {
        Self { transport, cfg }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.cfg
    }

    /// Fetch `url`, retrying transport failures.
    ///
    /// Returns `Err` only when every attempt failed in transit. Received
    /// responses (any status) and non-transient errors come back as `Ok`.
    pub async fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<FetchOutcome, FetchError> {
        let timeout = timeout.unwrap_or(self.cfg.timeout);
        let max_attempts = self.cfg.max_attempts.max(1);
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let delay = polite_delay(self.cfg.delay_min, self.cfg.delay_max);
            debug!(url = %url, delay_ms = delay.as_millis() as u64, "Rate limit delay");
            tokio::time::sleep(delay).await;

            let result = match tokio::time::timeout(timeout, self.transport.get(url, timeout)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout),
            };

            match result {
                Ok(resp) => return Ok(self.outcome_from_response(url, resp, start.elapsed(), attempt)),
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        error!(url = %url, attempts = attempt, error = %e, "Request failed, retries exhausted");
                        return Err(FetchError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            last: e,
                        });
                    }
                    let wait = jittered(
                        backoff_delay(attempt, self.cfg.backoff_min, self.cfg.backoff_max),
                        self.cfg.backoff_max,
                    );
                    warn!(
                        url = %url,
                        attempt,
                        error = %e,
                        retry_in_ms = wait.as_millis() as u64,
                        "Transient fetch failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch failed without retry");
                    return Ok(FetchOutcome::failure(url, None, e.to_string(), start.elapsed(), attempt));
                }
            }
        }
    }

    /// Like [`Fetcher::fetch`] but exhausted retries become a plain failed outcome.
    pub async fn fetch_safe(&self, url: &str, timeout: Option<Duration>) -> FetchOutcome {
        let start = Instant::now();
        match self.fetch(url, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let attempts = match &e {
                    FetchError::RetriesExhausted { attempts, .. } => *attempts,
                };
                FetchOutcome::failure(
                    url,
                    None,
                    format!("All retries exhausted: {e}"),
                    start.elapsed(),
                    attempts,
                )
            }
        }
    }

    fn outcome_from_response(
        &self,
        url: &str,
        resp: TransportResponse,
        duration: Duration,
        attempts: u32,
    ) -> FetchOutcome {
        if resp.status != 200 {
            warn!(
                url = %url,
                status = resp.status,
                duration_ms = duration.as_millis() as u64,
                "Non-200 response"
            );
            return FetchOutcome::failure(
                url,
                Some(resp.status),
                format!("HTTP {}", resp.status),
                duration,
                attempts,
            );
        }

        let checksum = sha256_hex(&resp.body);
        info!(
            url = %url,
            status = resp.status,
            bytes = resp.body.len(),
            duration_ms = duration.as_millis() as u64,
            "Fetched"
        );
        FetchOutcome {
            success: true,
            url: url.to_string(),
            status_code: Some(resp.status),
            body: Some(resp.body),
            content_type: resp.content_type,
            checksum: Some(checksum),
            error: None,
            duration,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn fast_config() -> FetchConfig {
        FetchConfig {
            max_attempts: 3,
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            delay_min: Duration::from_millis(10),
            delay_max: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let min = Duration::from_secs(2);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, min, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, min, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, min, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, min, max), Duration::from_secs(30));
        assert_eq!(backoff_delay(40, min, max), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        for _ in 0..50 {
            let d = jittered(Duration::from_secs(28), Duration::from_secs(30));
            assert!(d >= Duration::from_secs(28) && d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_polite_delay_in_window() {
        for _ in 0..50 {
            let d = polite_delay(Duration::from_millis(100), Duration::from_millis(200));
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
        assert_eq!(
            polite_delay(Duration::from_millis(300), Duration::from_millis(100)),
            Duration::from_millis(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_200_is_success_with_checksum() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("https://x.com/a", 200, Some("text/html"), b"<html>hi</html>");
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch("https://x.com/a", None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.status_code, Some(200));
        assert_eq!(out.checksum.as_deref(), Some(sha256_hex(b"<html>hi</html>").as_str()));
        assert_eq!(out.content_type.as_deref(), Some("text/html"));
        assert_eq!(mock.attempts("https://x.com/a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_200_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("https://x.com/missing", 404, None, b"not found");
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch("https://x.com/missing", None).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.status_code, Some(404));
        assert_eq!(out.error.as_deref(), Some("HTTP 404"));
        assert!(out.checksum.is_none());
        assert_eq!(mock.attempts("https://x.com/missing"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_exactly_max_attempts() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_always("https://x.com/down", TransportError::Connect("refused".into()));
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let err = fetcher.fetch("https://x.com/down", None).await.unwrap_err();
        match err {
            FetchError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        }
        assert_eq!(mock.attempts("https://x.com/down"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_times("https://x.com/flaky", 2, TransportError::Timeout);
        mock.respond("https://x.com/flaky", 200, None, b"ok");
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch("https://x.com/flaky", None).await.unwrap();
        assert!(out.success);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_safe_converts_exhaustion() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_always("https://x.com/down", TransportError::Timeout);
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch_safe("https://x.com/down", None).await;
        assert!(!out.success);
        assert!(out.error.unwrap().starts_with("All retries exhausted:"));
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_request_fails_immediately() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_always("https://evil.example/x", TransportError::Blocked("not allowed".into()));
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch("https://evil.example/x", None).await.unwrap();
        assert!(!out.success);
        assert_eq!(mock.attempts("https://evil.example/x"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_hits_per_call_timeout() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_after("https://x.com/slow", Duration::from_secs(60), 200, b"late");
        let fetcher = Fetcher::new(mock.clone(), fast_config());

        let out = fetcher.fetch_safe("https://x.com/slow", Some(Duration::from_secs(1))).await;
        assert!(!out.success);
        assert_eq!(mock.attempts("https://x.com/slow"), 3);
    }
}
