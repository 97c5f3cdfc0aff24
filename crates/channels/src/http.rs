//! Shared retrying HTTP client for provider APIs.
//!
//! Transient provider failures (connect errors, 408/429/5xx) are retried
//! here with short exponential backoff; a consecutive-failure circuit
//! breaker sheds load from a provider that is down. This layer is
//! independent of the outbox attempt counter: one outbox attempt maps to at
//! most one `execute` call, however many HTTP retries happen inside it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use outflow_core::PROVIDER_HTTP_TIMEOUT_SECS;

use crate::error::ChannelError;

const MAX_RETRIES: usize = 3;
const RETRY_DELAYS_SECS: [u64; 4] = [0, 1, 2, 4];
const BREAKER_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Pooled reqwest client with retry and circuit-breaker behavior.
///
/// One instance per channel, shared across workers.
pub struct RetryClient {
    client: reqwest::Client,
    breaker: Mutex<BreakerState>,
}

impl std::fmt::Debug for RetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryClient").finish_non_exhaustive()
    }
}

impl RetryClient {
    /// Build a client with the provider request timeout applied.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built (TLS backend failure).
    pub fn new() -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChannelError::ClientInit(e.to_string()))?;
        Ok(Self { client, breaker: Mutex::new(BreakerState::default()) })
    }

    /// Execute a request built by `build`, retrying transient failures.
    ///
    /// Returns the first success or non-transient provider status; exhausted
    /// retries surface the last transient error.
    ///
    /// # Errors
    /// `CircuitOpen` when the breaker is shedding, `HttpStatus` for
    /// non-success provider replies, `HttpRequest` for transport failures.
    pub async fn execute(
        &self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, ChannelError> {
        if self.circuit_open() {
            return Err(ChannelError::CircuitOpen);
        }

        let mut last_error: Option<ChannelError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay_secs = RETRY_DELAYS_SECS.get(attempt).copied().unwrap_or(4);
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                tracing::debug!(attempt, "provider retry");
            }

            let response = match build(&self.client).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ChannelError::HttpRequest(e));
                    continue;
                },
            };

            let status = response.status();
            if status.is_success() {
                self.record_success();
                return Ok(response);
            }

            let code = status.as_u16();
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_owned());
            let err = ChannelError::HttpStatus { code, body };
            if err.is_transient() {
                last_error = Some(err);
                continue;
            }
            // Non-transient provider rejection: not the provider being down,
            // so the breaker stays untouched.
            return Err(err);
        }

        self.record_failure();
        Err(last_error.unwrap_or(ChannelError::CircuitOpen))
    }

    fn circuit_open(&self) -> bool {
        let mut state = self.breaker.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // Cooldown elapsed: half-open, allow a probe request.
                state.open_until = None;
                false
            },
            None => false,
        }
    }

    fn record_success(&self) {
        let mut state = self.breaker.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    fn record_failure(&self) {
        let mut state = self.breaker.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.consecutive_failures += 1;
        if state.consecutive_failures >= BREAKER_THRESHOLD {
            state.open_until = Some(Instant::now() + BREAKER_COOLDOWN);
            tracing::warn!(
                failures = state.consecutive_failures,
                cooldown_secs = BREAKER_COOLDOWN.as_secs(),
                "provider circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_after_threshold() {
        let client = RetryClient::new().unwrap();
        for _ in 0..BREAKER_THRESHOLD {
            client.record_failure();
        }
        assert!(client.circuit_open());
    }

    #[test]
    fn test_breaker_resets_on_success() {
        let client = RetryClient::new().unwrap();
        for _ in 0..BREAKER_THRESHOLD - 1 {
            client.record_failure();
        }
        client.record_success();
        client.record_failure();
        assert!(!client.circuit_open());
    }
}
