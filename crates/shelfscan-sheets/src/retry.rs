//! Backoff for retryable Sheets failures.
//!
//! Network errors, 429 and 5xx are retried with exponential backoff and full
//! jitter. A Retry-After hint from a 429 replaces the computed delay.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info_span, warn, Instrument};

use crate::error::SheetsResult;
use crate::metrics::record_retry;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Reads `SHEETS_MAX_RETRIES`, `SHEETS_RETRY_BASE_MS` and `SHEETS_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            max_retries: var("SHEETS_MAX_RETRIES", defaults.max_retries),
            base_delay_ms: var("SHEETS_RETRY_BASE_MS", defaults.base_delay_ms),
            max_delay_ms: var("SHEETS_RETRY_MAX_MS", defaults.max_delay_ms),
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Largest backoff for the given zero-based retry.
    fn ceiling_ms(&self, retry: u32) -> u64 {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    fn delay(&self, retry: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(after) = retry_after_ms {
            return Duration::from_millis(after);
        }
        let ceiling = self.ceiling_ms(retry);
        // Clock sub-second nanos spread concurrent retries apart
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let jittered = (ceiling as f64 * f64::from(nanos % 1000) / 1000.0) as u64;
        Duration::from_millis(jittered.max(self.base_delay_ms.min(ceiling)))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retries are used up.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> SheetsResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = SheetsResult<T>>,
{
    let mut retry = 0;
    loop {
        let span = info_span!("sheets_attempt", operation = %operation, attempt = retry + 1);
        let error = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < config.max_retries => e,
            Err(e) => return Err(e),
        };

        let delay = config.delay(retry, error.retry_after_ms());
        warn!(
            operation = %operation,
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying Sheets request"
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
