//! Unified retry module for every Gemini call
//!
//! Bounded attempts with exponential backoff and jitter, error classification
//! supplied by the caller, and cancellation through [`CallContext`].
//!
//! ## Usage
//! ```rust,ignore
//! let config = RetryConfig::default();
//! let file = execute_with_retry(&ctx, &config, "get file", || backend.get_file(&name), RetryableError::is_retryable).await?;
//! ```

pub mod classify;

use crate::context::{CallContext, ContextError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use classify::{is_retryable, is_retryable_status, is_transient_message};

/// Lower and upper bound of the jitter factor applied to each backoff.
pub const JITTER_RANGE: (f64, f64) = (0.5, 1.5);

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one; zero is treated as one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the exponential curve, applied before jitter
    pub max_delay: Duration,
    /// Multiply each backoff by a random factor in [0.5, 1.5]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No retries at all, for calls whose failure the caller handles itself.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Trait for errors that can be classified as retryable or non-retryable
pub trait RetryableError {
    /// Returns true if the error is transient
    fn is_retryable(&self) -> bool;

    /// Short label for logs
    fn error_type(&self) -> &'static str;
}

/// Execute an async operation with bounded retries.
///
/// `operation` is invoked at most `config.max_attempts` times. Each attempt
/// is raced against `ctx`; between attempts the executor sleeps for the
/// jittered backoff, returning the context's error as soon as `ctx` is done.
pub async fn execute_with_retry<T, E, F, Fut, C>(
    ctx: &CallContext,
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_retryable: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: From<ContextError> + Display,
{
    let max_attempts = config.effective_max_attempts();
    let start_time = Instant::now();
    let mut attempt = 0_u32;

    loop {
        if attempt > 0 {
            if let Some(reason) = ctx.err() {
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    "context done before retry: {}",
                    reason
                );
                return Err(E::from(reason));
            }
        }

        let error = match ctx.run(operation()).await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        "succeeded after {} retries ({:?})",
                        attempt,
                        start_time.elapsed()
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        if !is_retryable(&error) {
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                "non-retryable failure: {}",
                error
            );
            return Err(error);
        }

        if attempt + 1 >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = max_attempts,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "giving up after {} attempts: {}",
                max_attempts,
                error
            );
            return Err(error);
        }

        let delay = backoff_delay(config, attempt);
        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after transient failure"
        );

        tokio::select! {
            biased;
            reason = ctx.done() => return Err(E::from(reason)),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// `min(max_delay, initial_delay * 2^attempt)` before jitter.
pub fn base_backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(31));
    config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Backoff for the 0-indexed `attempt`, with jitter when enabled.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = base_backoff_delay(config, attempt);
    if !config.jitter || base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range(JITTER_RANGE.0..=JITTER_RANGE.1);
    base.mul_f64(factor)
}
