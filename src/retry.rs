//! Bounded retry with exponential backoff.
//!
//! Used by the lazy initializers: a model or store that fails to come up is
//! retried a handful of times and then given up on for good.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// How often and how patiently to retry a failed initialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Pause before the first retry, in milliseconds.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    /// Cap for any single pause, in milliseconds.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive pauses.
    pub multiplier: f64,
    /// Spread pauses by ±25% so parallel processes do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the first pause and the cap together.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts allowed, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause before retry number `retry` (1-based). `0` never waits.
    pub fn backoff(&self, retry: u32) -> Duration {
        let Some(exponent) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let grown_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let capped_ms = grown_ms.min(self.max_backoff.as_millis() as f64);
        let capped = Duration::from_millis(capped_ms as u64);
        if self.jitter { spread(capped) } else { capped }
    }
}

/// Uniformly picks a duration in `[0.75 d, 1.25 d)`.
fn spread(delay: Duration) -> Duration {
    let quarter = delay.as_millis() as u64 / 4;
    if quarter == 0 {
        return delay;
    }
    let offset = fastrand::u64(0..quarter * 2);
    delay - Duration::from_millis(quarter) + Duration::from_millis(offset)
}

/// What a retried operation ended with.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// Last attempt's result.
    pub result: Result<T, E>,
    /// Attempts made; `1` means the first try settled it.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs `operation` until it succeeds, `retryable` rejects the error, or
/// [`RetryConfig::max_attempts`] is spent. `operation` receives the 0-based
/// attempt number.
pub async fn execute_with_retry_async<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    retryable: R,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0;
    let result = loop {
        let result = operation(attempt).await;
        attempt += 1;
        let again =
            matches!(&result, Err(err) if attempt < config.max_attempts() && retryable(err));
        if !again {
            break result;
        }
        let pause = config.backoff(attempt);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    };
    RetryResult {
        result,
        attempts: attempt,
        elapsed: started.elapsed(),
    }
}

/// `Duration` as whole milliseconds in config files.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
