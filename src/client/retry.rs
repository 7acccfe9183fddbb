use super::transport::TransportError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Bounded exponential backoff for batch delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("rejected by server: {0}")]
    Rejected(#[source] TransportError),

    /// The batch never reached the worker because its queue was full.
    #[error("delivery queue full")]
    QueueFull,
}

impl RetryPolicy {
    /// A single attempt with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sleep before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<F, Fut>(&self, mut operation: F) -> Result<(), DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_transient() => return Err(DeliveryError::Rejected(e)),
                Err(e) if attempts >= max_attempts => {
                    return Err(DeliveryError::Exhausted {
                        attempts,
                        source: e,
                    })
                }
                Err(e) => {
                    let backoff = self.backoff_after(attempts);
                    warn!(
                        attempt = attempts,
                        max_attempts = max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Log delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn unavailable() -> TransportError {
        TransportError::Status {
            status: 503,
            body: "busy".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Status {
                    status: 404,
                    body: String::new(),
                })
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
