// src/resilience/rate_limiter.rs
//! Sliding-window rate limiter, one instance per external API.
//!
//! The limiter only coordinates callers inside this process. Call
//! [`RateLimiter::acquire`] immediately before the guarded request.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Extra wait added on top of the computed window exit time.
const SAFETY_BUFFER: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    max_requests: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            name,
            max_requests,
            window,
            stamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn per_second(name: &'static str, max_requests: usize) -> Self {
        Self::new(name, max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(name: &'static str, max_requests: usize) -> Self {
        Self::new(name, max_requests, Duration::from_secs(60))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait until a request slot is free inside the window, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = stamps.front() {
                    if now.duration_since(oldest) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }

                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }

                let oldest = stamps.front().copied().unwrap_or(now);
                self.window.saturating_sub(now.duration_since(oldest)) + SAFETY_BUFFER
            };

            tracing::info!(
                limiter = self.name,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of requests recorded inside the current window.
    pub async fn in_window(&self) -> usize {
        let stamps = self.stamps.lock().await;
        let now = Instant::now();
        stamps
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_without_waiting() {
        let rl = RateLimiter::per_second("test", 3);
        let t0 = Instant::now();
        for _ in 0..3 {
            rl.acquire().await;
        }
        assert_eq!(t0.elapsed(), Duration::ZERO);
        assert_eq!(rl.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_oldest_to_leave_window() {
        let rl = RateLimiter::per_second("test", 2);
        let t0 = Instant::now();
        rl.acquire().await;
        rl.acquire().await;
        rl.acquire().await; // third must wait ~1s + buffer
        let waited = t0.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1_200), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn old_stamps_are_discarded() {
        let rl = RateLimiter::new("test", 1, Duration::from_millis(500));
        rl.acquire().await;
        tokio::time::advance(Duration::from_millis(600)).await;
        let t0 = Instant::now();
        rl.acquire().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
