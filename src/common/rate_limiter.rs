//! Request pacing shared by every worker of a scan
//!
//! Each `acquire` reserves the next free slot on a shared timeline, slots
//! spaced `1 / rate` apart, and sleeps until that slot. Clones share the
//! timeline, so concurrent workers never exceed the configured rate.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per second
    pub max_requests_per_second: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: u32) -> Self {
        self.max_requests_per_second = requests_per_second;
        self
    }

    /// Gap between two consecutive requests
    pub fn spacing(&self) -> Duration {
        Duration::from_secs(1) / self.max_requests_per_second.max(1)
    }
}

/// Shared request pacer
///
/// # Example
///
/// ```
/// use signal_scanner::common::RateLimiter;
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = RateLimiter::with_rate(5);
///     limiter.acquire().await;
///     // Make API request...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    next_slot: Arc<Mutex<Instant>>,
    spacing: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            next_slot: Arc::new(Mutex::new(Instant::now())),
            spacing: config.spacing(),
        }
    }

    /// Create a rate limiter with a specific requests-per-second limit
    pub fn with_rate(requests_per_second: u32) -> Self {
        Self::new(RateLimiterConfig::default().with_rate(requests_per_second))
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait for this caller's slot
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.spacing;
            slot
        };
        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing() {
        assert_eq!(RateLimiterConfig::default().spacing(), Duration::from_millis(100));
        assert_eq!(
            RateLimiterConfig::default().with_rate(4).spacing(),
            Duration::from_millis(250)
        );
        // Zero rate is treated as one request per second
        assert_eq!(
            RateLimiterConfig::default().with_rate(0).spacing(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::with_rate(1);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquires_are_spaced() {
        let limiter = RateLimiter::with_rate(20);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Slots at 0, 50, 100 ms
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_clones_share_timeline() {
        let limiter = RateLimiter::with_rate(20);
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let l = limiter.clone();
                tokio::spawn(async move { l.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
