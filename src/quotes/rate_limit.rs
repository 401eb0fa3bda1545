//! Minimum-interval rate limiter for outbound provider calls.
//!
//! Callers wait until the interval has elapsed instead of being rejected. The
//! limiter belongs to one client instance; concurrent callers queue on the
//! internal lock, so issue times are always at least `min_interval` apart.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// State for a single limiter
struct RateLimiterState {
    last_request: Option<Instant>,
    request_count: u64,
}

pub struct RateLimiter {
    /// Minimum time between requests
    min_interval: Duration,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(RateLimiterState {
                last_request: None,
                request_count: 0,
            }),
        }
    }

    /// Wait for a slot and claim it. Returns how long the caller waited.
    pub async fn acquire(&self, label: &str) -> Duration {
        let mut state = self.state.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                log::info!(
                    "Rate limit: waiting {:.1}s before request for {}",
                    waited.as_secs_f64(),
                    label
                );
                tokio::time::sleep(waited).await;
            }
        }

        state.last_request = Some(Instant::now());
        state.request_count += 1;
        waited
    }

    /// Number of slots handed out so far
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(12));
        assert_eq!(limiter.acquire("AAPL").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(12));
        let start = Instant::now();

        for symbol in ["AAPL", "MSFT", "JNJ", "KO"] {
            limiter.acquire(symbol).await;
        }

        assert!(start.elapsed() >= Duration::from_secs(36));
        assert_eq!(limiter.request_count().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_passed() {
        let limiter = RateLimiter::new(Duration::from_secs(12));
        limiter.acquire("AAPL").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.acquire("MSFT").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = std::sync::Arc::new(RateLimiter::new(Duration::from_secs(5)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire(&format!("T{}", i)).await;
                    Instant::now()
                })
            })
            .collect();

        let mut issued = Vec::new();
        for h in handles {
            issued.push(h.await.unwrap());
        }
        issued.sort();

        assert!(issued[1] - issued[0] >= Duration::from_secs(5));
        assert!(issued[2] - issued[1] >= Duration::from_secs(5));
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..10 {
            assert_eq!(limiter.acquire("X").await, Duration::ZERO);
        }
    }
}
