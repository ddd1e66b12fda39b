//! Minimum-interval rate limiter shared by the provider clients

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateLimiter {
    name: &'static str,
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(name: &'static str, min_interval_ms: u64) -> Self {
        Self {
            name,
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has passed since the previous call
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("{} rate limiting: waiting {:?}", self.name, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::new("test", 500);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_spaces_requests() {
        let limiter = RateLimiter::new("test", 100);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait().await;
        }

        // two enforced gaps
        assert!(start.elapsed() >= Duration::from_millis(190));
    }
}
