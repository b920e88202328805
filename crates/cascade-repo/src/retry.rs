//! Retry with exponential backoff for git operations.

use crate::error::RepoError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay")]
    pub delay_seconds: u64,
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_delay() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_max_delay() -> u64 {
    3600
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay(),
            exponential_backoff: true,
            max_delay_seconds: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_seconds: 0,
            exponential_backoff: false,
            max_delay_seconds: 0,
        }
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let seconds = if self.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            self.delay_seconds.saturating_mul(factor)
        } else {
            self.delay_seconds
        };
        Duration::from_secs(seconds.min(self.max_delay_seconds))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RepoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(if max_attempts == 1 {
                        err
                    } else {
                        RepoError::Exhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: Box::new(err),
                        }
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "Retrying git operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
