//! Bounded timeout and exponential backoff around external mutations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ads::AdsError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Fraction of each delay randomized in both directions. 0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            timeout_ms: 10_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting between tries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            jitter_factor: 0.0,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay_ms as f64;
        let mut delay = self.initial_delay_ms as f64;
        for _ in 0..attempt {
            delay *= self.multiplier;
            if delay >= max {
                delay = max;
                break;
            }
        }
        Duration::from_millis(delay.min(max) as u64)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = (base.as_millis() as f64 * self.jitter_factor) as i64;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        if jitter < 0 {
            base.saturating_sub(Duration::from_millis(jitter.unsigned_abs()))
        } else {
            base.saturating_add(Duration::from_millis(jitter as u64))
        }
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. Each attempt is bounded by the policy timeout.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AdsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdsError>>,
    {
        let timeout = self.timeout();
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(AdsError::Timeout(timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "External call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        operation,
                        attempts = attempt + 1,
                        transient = e.is_transient(),
                        error = %e,
                        "External call failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            timeout_ms: 5_000,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let p = fast_policy(5);
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let p = RetryPolicy {
            jitter_factor: 0.5,
            ..fast_policy(3)
        };
        for _ in 0..50 {
            let d = p.delay(1).as_millis();
            assert!((100..=300).contains(&d), "delay={}", d);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = fast_policy(3)
            .run("pause", || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AdsError::RateLimited)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), AdsError> = fast_policy(2)
            .run("pause", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(AdsError::Transport("connection reset".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(AdsError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), AdsError> = fast_policy(5)
            .run("budget", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(AdsError::Api {
                        status: 400,
                        message: "invalid amount".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(AdsError::Api { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            timeout_ms: 50,
            ..fast_policy(1)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), AdsError> = policy
            .run("pause", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(AdsError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
