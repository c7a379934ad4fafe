//! Token bucket admission control for outbound AI calls.
//!
//! A background task drips one token into a bucket of capacity `burst`
//! every `1/rate` seconds. Tokens that arrive while the bucket is full are
//! discarded, so the generator never blocks.
//!
//! ```text
//! generator --(1 token / period)--> [ bucket: 0..=burst ] --> allow() / wait()
//! ```
//!
//! Consumed tokens are never refunded, even when the downstream call fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::LimiterError;

/// Shared token bucket. Safe to call from any number of tasks at once.
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
    rate: u32,
    burst: usize,
    generator: JoinHandle<()>,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    ///
    /// Must be called from within a Tokio runtime; the refill task is
    /// spawned immediately and lives until the limiter is dropped.
    pub fn new(rate: u32, burst: usize) -> Self {
        let rate = rate.max(1);
        let burst = burst.max(1);
        let tokens = Arc::new(Semaphore::new(burst));
        let period = Duration::from_secs_f64(1.0 / f64::from(rate));

        let generator = tokio::spawn(refill(Arc::clone(&tokens), burst, period));

        tracing::debug!(rate, burst, "Rate limiter started");

        Self {
            tokens,
            rate,
            burst,
            generator,
        }
    }

    /// Take a token if one is immediately available. Never blocks.
    pub fn allow(&self) -> bool {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for a token, or give up when `cancelled` resolves first.
    pub async fn wait<F>(&self, cancelled: F) -> Result<(), LimiterError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancelled => Err(LimiterError::Cancelled),
            permit = self.tokens.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(LimiterError::Cancelled),
            },
        }
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn burst(&self) -> usize {
        self.burst
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.generator.abort();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("available", &self.available())
            .finish()
    }
}

async fn refill(tokens: Arc<Semaphore>, burst: usize, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        // Only this task adds permits, so the check cannot race past `burst`.
        if tokens.available_permits() < burst {
            tokens.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let limiter = RateLimiter::new(10, 20);
        for i in 0..20 {
            assert!(limiter.allow(), "call {} should be admitted", i);
        }
        assert!(!limiter.allow(), "21st immediate call must be rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_token_per_period() {
        let limiter = RateLimiter::new(10, 20);
        while limiter.allow() {}

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_never_exceeds_burst() {
        let limiter = RateLimiter::new(100, 5);
        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert_eq!(limiter.available(), 5);
        let admitted = (0..50).filter(|_| limiter.allow()).count();
        assert_eq!(admitted, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_refill() {
        let limiter = RateLimiter::new(4, 1);
        assert!(limiter.allow());

        let started = Instant::now();
        limiter
            .wait(std::future::pending())
            .await
            .expect("token should arrive");
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.allow());

        let result = limiter
            .wait(tokio::time::sleep(Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(LimiterError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled_does_not_consume() {
        let limiter = RateLimiter::new(1, 3);
        let result = limiter.wait(std::future::ready(())).await;
        assert!(matches!(result, Err(LimiterError::Cancelled)));
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn test_zero_parameters_are_clamped() {
        let limiter = RateLimiter::new(0, 0);
        assert_eq!(limiter.rate(), 1);
        assert_eq!(limiter.burst(), 1);
        assert!(limiter.allow());
    }
}
