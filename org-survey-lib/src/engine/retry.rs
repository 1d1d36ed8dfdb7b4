//! Retry of classified remote calls with jittered exponential backoff.
//!
//! Only [`ErrorKind::RateLimit`](super::ErrorKind::RateLimit) and
//! [`ErrorKind::Transient`](super::ErrorKind::Transient) failures are retried. Everything
//! else, including cancellation, is returned on the spot without sleeping.

use super::ClassifiedError;
use core::time::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "     retry";

/// Retries made on top of the original call when none are configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay when none is configured.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for a computed backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound for an upstream retry-after hint.
const MAX_HINTED_DELAY: Duration = Duration::from_secs(3600);

const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.0;

/// Retry settings as they appear in configuration.
///
/// Zero values select the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

/// Executes a fallible operation up to `max_retries + 1` times.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    max_retries: u32,
    initial_backoff: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            max_retries: if config.max_retries == 0 {
                DEFAULT_MAX_RETRIES
            } else {
                config.max_retries
            },
            initial_backoff: if config.initial_backoff.is_zero() {
                DEFAULT_INITIAL_BACKOFF
            } else {
                config.initial_backoff
            },
        }
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Backoff before retry number `attempt + 1`: `initial * 2^attempt * jitter`.
    ///
    /// `jitter` is clamped to `[0.5, 1.0]`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
            .mul_f64(jitter.clamp(JITTER_MIN, JITTER_MAX))
    }

    fn sample_jitter() -> f64 {
        rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
    ///
    /// Once attempts run out, the last error is returned marked as
    /// [exhausted](ClassifiedError::is_exhausted). Cancellation is observed both while the
    /// operation runs and while sleeping between attempts.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, operation: &str, mut op: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ClassifiedError::canceled());
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ClassifiedError::canceled()),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                log::debug!(target: LOG_TARGET, "Not retrying {operation}: {err}");
                return Err(err);
            }

            if attempt >= self.max_retries {
                log::debug!(target: LOG_TARGET, "Giving up on {operation} after {} attempt(s): {err}", attempt + 1);
                return Err(err.exhausted(attempt + 1));
            }

            let delay = err
                .retry_after()
                .filter(|hint| !hint.is_zero())
                .map_or_else(|| self.backoff_delay(attempt, Self::sample_jitter()), |hint| hint.min(MAX_HINTED_DELAY));

            log::debug!(
                target: LOG_TARGET,
                "Retrying {operation} (attempt {}, delay {}ms): {err}",
                attempt + 2,
                delay.as_millis(),
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClassifiedError::canceled()),
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;
    use core::sync::atomic::{AtomicU32, Ordering};
    use ohno::app_err;
    use tokio::time::Instant;

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
        })
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        });
        assert_eq!(executor.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(executor.initial_backoff(), DEFAULT_INITIAL_BACKOFF);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let executor = executor(5);
        assert_eq!(executor.backoff_delay(0, 1.0), Duration::from_millis(100));
        assert_eq!(executor.backoff_delay(1, 1.0), Duration::from_millis(200));
        assert_eq!(executor.backoff_delay(3, 1.0), Duration::from_millis(800));
        assert_eq!(executor.backoff_delay(3, 0.5), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamps_jitter_and_caps_growth() {
        let executor = executor(5);
        assert_eq!(executor.backoff_delay(0, 0.1), Duration::from_millis(50));
        assert_eq!(executor.backoff_delay(0, 3.0), Duration::from_millis(100));
        assert_eq!(executor.backoff_delay(40, 1.0), MAX_BACKOFF);
    }

    #[test]
    fn test_sampled_jitter_in_range() {
        for _ in 0..1000 {
            let jitter = RetryExecutor::sample_jitter();
            assert!((JITTER_MIN..=JITTER_MAX).contains(&jitter), "jitter {jitter} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = executor(3)
            .execute(&cancel, "test", || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ClassifiedError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_makes_one_call_without_sleeping() {
        for make in [ClassifiedError::auth, ClassifiedError::fatal] {
            let calls = AtomicU32::new(0);
            let cancel = CancellationToken::new();
            let start = Instant::now();

            let result = executor(3)
                .execute(&cancel, "test", || {
                    let _ = calls.fetch_add(1, Ordering::SeqCst);
                    let err = make(app_err!("nope"));
                    async move { Err::<(), _>(err) }
                })
                .await;

            let err = result.unwrap_err();
            assert!(!err.is_exhausted());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_kth_attempt() {
        for k in 1..=4 {
            let calls = AtomicU32::new(0);
            let cancel = CancellationToken::new();

            let result = executor(3)
                .execute(&cancel, "test", || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < k {
                            Err(ClassifiedError::transient(app_err!("flaky")))
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await;

            assert_eq!(result.unwrap(), k);
            assert_eq!(calls.load(Ordering::SeqCst), k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_max_plus_one_calls() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = executor(3)
            .execute(&cancel, "test", || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClassifiedError::transient(app_err!("always down"))) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), Some(4));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("max retries reached"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_exponential_with_jitter() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let _ = executor(3)
            .execute(&cancel, "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ClassifiedError::transient(app_err!("flaky")))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        // 100ms + 200ms before jitter, each scaled by [0.5, 1.0]
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(305), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_is_honored() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = executor(3)
            .execute(&cancel, "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err(ClassifiedError::rate_limited(app_err!("secondary limit"), Some(Duration::from_secs(30))))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_hint_falls_back_to_backoff() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let err = executor(2)
            .execute(&cancel, "test", || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClassifiedError::rate_limited(app_err!("budget spent"), Some(Duration::ZERO))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_exhausted());

        // 100ms + 200ms before jitter, each scaled by [0.5, 1.0]
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_short_circuits_without_sleeping() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = executor(3)
            .execute(&cancel, "test", || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                async { Err::<(), _>(ClassifiedError::transient(app_err!("flaky"))) }
            })
            .await;

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_promptly() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        drop(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        }));

        let start = Instant::now();
        let result = executor(3)
            .execute(&cancel, "test", || async {
                Err::<(), _>(ClassifiedError::rate_limited(app_err!("limited"), Some(Duration::from_secs(600))))
            })
            .await;

        assert!(result.unwrap_err().is_canceled());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_canceled_makes_no_calls() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor(3)
            .execute(&cancel, "test", || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ClassifiedError>(()) }
            })
            .await;

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
