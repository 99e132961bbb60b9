//! Backoff and rate limiting

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffConfig, RateLimit};

/// Exponential backoff: `clamp(base * multiplier^(attempt-1), base, max)`
/// with ±20% jitter.
pub fn backoff_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config.base_ms as f64 * config.multiplier.powi(exponent as i32);
    let clamped = raw.clamp(config.base_ms as f64, config.max_ms as f64);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    let with_jitter = (clamped * jitter).clamp(config.base_ms as f64 * 0.8, config.max_ms as f64);
    Duration::from_millis(with_jitter as u64)
}

/// Sliding-window rate limiter: at most `max` acquisitions per `window_ms`.
#[derive(Debug)]
pub struct RateWindow {
    limit: Option<RateLimit>,
    acquired: VecDeque<std::time::Instant>,
}

impl RateWindow {
    pub fn new(limit: Option<RateLimit>) -> Self {
        Self {
            limit,
            acquired: VecDeque::new(),
        }
    }

    /// Try to take a slot now. Returns `true` when under the limit.
    pub fn try_acquire(&mut self) -> bool {
        let Some(limit) = &self.limit else {
            return true;
        };
        let now = std::time::Instant::now();
        let window = Duration::from_millis(limit.window_ms);

        while let Some(front) = self.acquired.front() {
            if now.duration_since(*front) > window {
                self.acquired.pop_front();
            } else {
                break;
            }
        }

        if self.acquired.len() < limit.max as usize {
            self.acquired.push_back(now);
            true
        } else {
            false
        }
    }
}
