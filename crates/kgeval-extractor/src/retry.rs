//! Retry with exponential backoff for generation calls

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use kgeval_core::{ExtractionConfig, GenerationOptions, GenerationService, Result};

/// Bounded retry policy.
///
/// The first failure waits `initial_backoff`; every later failure doubles
/// the wait up to `max_backoff`. After `max_attempts` calls the last error
/// is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the attempt following `failures` failed attempts
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let mut backoff = self.initial_backoff;
        for _ in 1..failures {
            backoff = std::cmp::min(backoff.saturating_mul(2), self.max_backoff);
        }
        std::cmp::min(backoff, self.max_backoff)
    }

    /// Run `f` until it succeeds or attempts run out
    pub async fn retry<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return Err(e);
                    }

                    let backoff = self.backoff_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

// ============================================================================
// Retrying Service
// ============================================================================

/// A generation service whose calls go through a [`RetryPolicy`]
pub struct RetryingService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: GenerationService> RetryingService<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: GenerationService> GenerationService for RetryingService<S> {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &serde_json::Value,
        options: &GenerationOptions,
    ) -> Result<serde_json::Value> {
        self.policy
            .retry(self.inner.name(), || {
                self.inner
                    .generate(system_prompt, user_prompt, schema, options)
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
