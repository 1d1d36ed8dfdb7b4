use super::ClassifiedError;
use core::time::Duration;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Token bucket limiting how fast work is dispatched.
///
/// The bucket holds up to `burst` tokens and refills continuously at `rate_per_sec`. Each
/// [`acquire`](Self::acquire) takes one token, waiting for a refill when the bucket is
/// empty. A non-positive rate disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: Option<f64>,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Arc<Self> {
        let burst = f64::from(burst.max(1));
        Arc::new(Self {
            rate_per_sec: (rate_per_sec.is_finite() && rate_per_sec > 0.0).then_some(rate_per_sec),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        })
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn unlimited() -> Arc<Self> {
        Self::new(0.0, 1)
    }

    #[must_use]
    pub const fn rate_per_sec(&self) -> Option<f64> {
        self.rate_per_sec
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&self, rate: f64) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let refilled = now.duration_since(bucket.last_refill).as_secs_f64() * rate;
        bucket.tokens = (bucket.tokens + refilled).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / rate))
        }
    }

    /// Wait for one token, giving up if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClassifiedError> {
        if cancel.is_cancelled() {
            return Err(ClassifiedError::canceled());
        }

        let Some(rate) = self.rate_per_sec else {
            return Ok(());
        };

        while let Some(wait) = self.try_take(rate) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClassifiedError::canceled()),
                () = tokio::time::sleep(wait) => {}
            }
        }

        Ok(())
    }
}
