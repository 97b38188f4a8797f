//! Retry policy for authority calls.
//!
//! Only authentication-class failures are retried, and only a bounded number
//! of times. Timeouts and unavailability are surfaced unchanged: blindly
//! repeating a certify call risks certifying the same donation twice.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::warn;

use crate::authority::{AuthorityError, Result};
use crate::config::AuthorityConfig;

/// Auth-refresh retry shared by every authority call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_auth_retries: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RetryPolicy {
    pub fn new(max_auth_retries: usize) -> Self {
        Self {
            max_auth_retries,
            delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &AuthorityConfig) -> Self {
        Self::new(config.max_auth_retries)
    }

    /// Pause before a retry.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_auth_retries(&self) -> usize {
        self.max_auth_retries
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_auth_retries)
    }

    /// Run `operation`, re-running it after an authentication failure.
    ///
    /// The session is expected to have dropped the refused token already, so
    /// the next attempt authenticates afresh.
    pub async fn run<T, F, Fut>(&self, label: &'static str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        operation
            .retry(self.backoff())
            .when(AuthorityError::is_auth_failure)
            .notify(|err: &AuthorityError, _| {
                warn!(operation = label, error = %err, "Authentication failure, retrying with a fresh session");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_auth_failure_retried_once() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(1)
            .run("sign", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AuthorityError::Unauthorized("401".into()))
            })
            .await;

        assert!(matches!(result, Err(AuthorityError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_then_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(1)
            .run("certify", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AuthorityError::Authentication("expired".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_failures_not_retried() {
        for err in [
            AuthorityError::Timeout("30s".into()),
            AuthorityError::Rejected("schema".into()),
            AuthorityError::Unavailable("503".into()),
        ] {
            let calls = AtomicU32::new(0);
            let result: Result<()> = RetryPolicy::new(1)
                .run("certify", || {
                    let err = err.clone();
                    let calls = &calls;
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                })
                .await;

            assert_eq!(result.unwrap_err(), err);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_zero_retries() {
        let calls = AtomicU32::new(0);
        let _ = RetryPolicy::new(0)
            .run("sign", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AuthorityError::Unauthorized("401".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
