use crate::constants::RETRYABLE_STATUS_CODES;
use crate::types::{CourierError, ObservedError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff with jitter, applied only to the initial
/// upstream call of a request, never to an already-open stream.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) if attempts < self.max_attempts && self.is_retryable(&e) => {
                    let base_delay = self.base_delay_ms * 2u64.pow(attempts - 1);
                    // Jitter of ±25% to avoid thundering retries.
                    let jitter_range = base_delay / 4;
                    let jitter = if jitter_range > 0 {
                        fastrand::i64(-(jitter_range as i64)..jitter_range as i64)
                    } else {
                        0
                    };
                    let delay = Duration::from_millis((base_delay as i64 + jitter).max(1) as u64);

                    tracing::warn!(
                        "Upstream call failed (attempt {}): {}. Retrying in {:?}...",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_retryable(&self, err: &ObservedError) -> bool {
        match &err.inner {
            CourierError::Network(_) | CourierError::Io(_) => true,
            CourierError::Upstream(status, _) => RETRYABLE_STATUS_CODES.contains(&status.as_u16()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn first_success_means_one_attempt() {
        let policy = RetryPolicy::new(3, 1);
        let mut attempts = 0;
        let result: Result<i32> = policy
            .execute_with_retry(|| {
                attempts += 1;
                async move { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_to_success() {
        let policy = RetryPolicy::new(3, 1);
        let mut attempts = 0;
        let result: Result<i32> = policy
            .execute_with_retry(|| {
                attempts += 1;
                let a = attempts;
                async move {
                    if a < 3 {
                        Err(CourierError::Upstream(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "busy".into(),
                        )
                        .into())
                    } else {
                        Ok(9)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let policy = RetryPolicy::new(3, 1);
        let mut attempts = 0;
        let result: Result<i32> = policy
            .execute_with_retry(|| {
                attempts += 1;
                async move { Err(CourierError::InvalidRequest("bad".into()).into()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
