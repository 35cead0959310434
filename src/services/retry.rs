use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::PackConfig;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again, optionally no sooner than the given delay.
    Retry(Option<Duration>),
    Stop,
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable.
    Stopped(E),
    /// Attempts or the deadline ran out on retryable errors.
    Exhausted { attempts: u32, last: E },
}

/// Exponential backoff with jitter, a fixed attempt count and a wall-clock
/// ceiling for the whole loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PackConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            deadline: config.deadline,
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_backoff);
        let jitter_ms = (capped.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (capped + jitter).min(self.max_backoff)
    }

    pub async fn run<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut attempt_fn: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let hint = match classify(&err) {
                RetryDecision::Stop => return Err(RetryError::Stopped(err)),
                RetryDecision::Retry(hint) => hint,
            };

            if attempt >= self.max_attempts {
                tracing::warn!(operation, attempt, "Giving up after {}", err);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = hint.unwrap_or_else(|| self.backoff(attempt));
            if started.elapsed() + delay > self.deadline {
                tracing::warn!(operation, attempt, ?delay, "Retry deadline reached after {}", err);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            tracing::warn!(operation, attempt, ?delay, "Retrying after {}", err);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            deadline: Duration::from_secs(5),
        }
    }

    fn transient(e: &&str) -> RetryDecision {
        if e.starts_with("busy") {
            RetryDecision::Retry(None)
        } else {
            RetryDecision::Stop
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = policy(5)
            .run(
                "test",
                move |_| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        Err("busy")
                    } else {
                        Ok(n)
                    }
                },
                transient,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_terminal_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run(
                "test",
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("invalid")
                },
                transient,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Stopped("invalid"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy(3)
            .run(
                "test",
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("busy")
                },
                transient,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_bounds_the_loop() {
        let policy = RetryPolicy {
            deadline: Duration::from_millis(50),
            ..policy(10)
        };
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run(
                "test",
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("busy")
                },
                |_: &&str| RetryDecision::Retry(Some(Duration::from_millis(100))),
            )
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn honours_upstream_retry_hint() {
        let started = Instant::now();
        let calls = &AtomicU32::new(0);
        let _ = policy(2)
            .run(
                "test",
                move |_| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("busy")
                    } else {
                        Ok(())
                    }
                },
                |_: &&str| RetryDecision::Retry(Some(Duration::from_millis(30))),
            )
            .await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            deadline: Duration::from_secs(30),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1100));
        let third = policy.backoff(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4400));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }
}
