use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Client-side token bucket keeping the DPE API under its request quota.
///
/// Refills continuously at `requests_per_min / 60` tokens per second; a full
/// bucket allows a short burst, after which `acquire` awaits the refill.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    capacity: f64,
    // time of last refill and the current tokens
    tokens: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_min: u64) -> Self {
        let capacity = requests_per_min.max(1) as f64;
        Self {
            inner: Arc::new(Inner {
                capacity,
                tokens: Mutex::new((capacity, Instant::now())),
            }),
        }
    }

    /// Wait until one request token is available, then consume it.
    pub async fn acquire(&self) {
        let refill_rate = self.inner.capacity / 60.0; // tokens per second
        loop {
            let mut guard = self.inner.tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * refill_rate).min(self.inner.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }
            let need = 1.0 - *tokens;
            let secs = need / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_does_not_block() {
        let limiter = RateLimiter::new(6_000);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill() {
        // Capacity 1 token, refilling one token per second.
        let limiter = RateLimiter::new(60);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
