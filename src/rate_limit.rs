//! Per-user throttle for generation requests
//!
//! Sliding window over recent request instants, one window per user.
//! Independent of credits: it bounds how fast anyone can hit the image
//! model, including admins and unlimited plans.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Sliding window rate limiter keyed by user id
pub struct RateLimiter {
    /// user_id -> request instants inside the window
    requests: DashMap<String, Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// `max_requests` per `window_secs`, per user
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Record a request for `user_id` if the window has room.
    ///
    /// On rejection returns how long until the oldest request leaves the
    /// window.
    pub fn check_and_record(&self, user_id: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let window = self.window;

        let mut entry = self.requests.entry(user_id.to_string()).or_default();
        let timestamps = entry.value_mut();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= self.max_requests {
            let retry_after = timestamps
                .first()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            warn!(
                user_id,
                requests = timestamps.len(),
                max = self.max_requests,
                "Generation rate limit exceeded"
            );
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drop users with no request inside the window
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.requests.retain(|_, times| {
            times.retain(|t| now.duration_since(*t) < window);
            !times.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.requests.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10, 60)
    }
}
