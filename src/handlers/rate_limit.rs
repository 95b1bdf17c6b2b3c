//! Sliding-window request limiter for the AI backend.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::payload::RateLimitStatus;

const WINDOW: Duration = Duration::from_secs(60);

/// Allows at most `limit` requests in any 60 s window. A limit of 0 disables it.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    limit: u32,
    window: Duration,
    granted: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.granted.front() {
            if now.duration_since(oldest) >= self.window {
                self.granted.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset_in(&self, now: Instant) -> Duration {
        self.granted
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or_default()
    }
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self::with_window(limit_per_minute, WINDOW)
    }

    pub(crate) fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            state: Mutex::new(Window {
                limit,
                window,
                granted: VecDeque::new(),
            }),
        }
    }

    /// Wait until a request slot is free, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.limit == 0 {
                    return;
                }
                let now = Instant::now();
                state.evict(now);
                if state.granted.len() < state.limit as usize {
                    state.granted.push_back(now);
                    return;
                }
                state.reset_in(now)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.evict(now);
        let used = state.granted.len() as u32;
        RateLimitStatus {
            limit_per_minute: state.limit,
            used,
            remaining: state.limit.saturating_sub(used),
            reset_in_ms: state.reset_in(now).as_millis() as u64,
        }
    }

    pub async fn set_limit(&self, limit_per_minute: u32) {
        let mut state = self.state.lock().await;
        tracing::info!(
            from = state.limit,
            to = limit_per_minute,
            "AI rate limit updated"
        );
        state.limit = limit_per_minute;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_requests_in_window() {
        let limiter = RateLimiter::new(3);
        limiter.acquire().await;
        limiter.acquire().await;

        let status = limiter.status().await;
        assert_eq!(status.limit_per_minute, 3);
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, 1);
        assert!(status.reset_in_ms <= 60_000);
    }

    #[tokio::test]
    async fn waits_for_a_slot_to_free() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(50));
        limiter.acquire().await;

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), limiter.acquire())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn zero_means_unlimited() {
        let limiter = RateLimiter::new(0);
        for _ in 0..100 {
            limiter.acquire().await;
        }
        let status = limiter.status().await;
        assert_eq!(status.used, 0);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn raising_the_limit_frees_capacity() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;
        assert_eq!(limiter.status().await.remaining, 0);

        limiter.set_limit(5).await;
        tokio::time::timeout(Duration::from_millis(200), limiter.acquire())
            .await
            .unwrap();
        assert_eq!(limiter.status().await.used, 2);
    }
}
