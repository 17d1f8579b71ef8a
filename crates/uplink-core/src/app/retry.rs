//! Retry policy and the retry-with-backoff executor.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{ClientError, Idempotency};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// delay = base_delay * attempts
    Linear,
    /// delay = base_delay * multiplier^(attempts - 1)
    #[default]
    Exponential,
}

/// Retry policy for transient (no-response) failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    pub backoff: Backoff,

    /// Fraction (0.0..=1.0) of each delay that is randomized away.
    pub jitter: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            backoff: Backoff::Exponential,
            jitter: 0.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for the next retry based on attempt number.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// Example with base_delay=2s, multiplier=2.0, exponential:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    ///
    /// The result never exceeds `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let attempts = attempts.max(1);
        let delay_secs = match self.backoff {
            Backoff::Linear => base_secs * f64::from(attempts),
            Backoff::Exponential => {
                let exponent = (attempts - 1).min(i32::MAX as u32) as i32;
                base_secs * self.multiplier.powi(exponent)
            }
        };
        let delay_secs = if self.jitter > 0.0 {
            let cut = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay_secs * (1.0 - cut)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs.max(0.0))
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Attempts allowed for a request of the given idempotency.
    pub fn attempts_for(&self, idempotency: Idempotency) -> u32 {
        match idempotency {
            Idempotency::Idempotent => self.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        }
    }
}

/// Run `f`, retrying transient failures with backoff.
///
/// Well-formed error responses come back as `Ok` from the HTTP port and are
/// never retried here; only `ClientError::Network` is. Non-idempotent work
/// gets exactly one attempt. The last error is returned untouched.
pub async fn retry_request<T, F, Fut>(
    policy: &RetryPolicy,
    idempotency: Idempotency,
    mut f: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.attempts_for(idempotency);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.next_delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
