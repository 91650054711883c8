//! Per-wedding send budgets.

use crate::core::RateLimit;
use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("per-minute limit reached, retry after {0:?}")]
    RetryAfter(Duration),

    #[error("daily quota exhausted")]
    QuotaExhausted,
}

#[derive(Debug)]
struct WeddingWindow {
    minute_start: Instant,
    minute_count: u32,
    day_sends: VecDeque<Instant>,
}

impl WeddingWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_start: now,
            minute_count: 0,
            day_sends: VecDeque::new(),
        }
    }

    fn try_acquire(&mut self, limit: &RateLimit, now: Instant) -> Result<(), RateLimitError> {
        while let Some(oldest) = self.day_sends.front() {
            if now.duration_since(*oldest) >= DAY {
                self.day_sends.pop_front();
            } else {
                break;
            }
        }
        if limit.per_day > 0 && self.day_sends.len() >= limit.per_day as usize {
            return Err(RateLimitError::QuotaExhausted);
        }

        if now.duration_since(self.minute_start) >= MINUTE {
            self.minute_start = now;
            self.minute_count = 0;
        }
        if limit.per_minute > 0 && self.minute_count >= limit.per_minute {
            let retry_after = (self.minute_start + MINUTE).saturating_duration_since(now);
            return Err(RateLimitError::RetryAfter(retry_after));
        }

        self.minute_count += 1;
        if limit.per_day > 0 {
            self.day_sends.push_back(now);
        }
        Ok(())
    }
}

/// Tracks fixed one-minute windows and a rolling daily quota per wedding.
///
/// Windows of weddings that stop sending are evicted after a day of
/// inactivity, at which point their quota has fully recovered anyway.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Cache<String, Arc<Mutex<WeddingWindow>>>,
}

impl RateLimiter {
    pub fn new(max_weddings: u64) -> Self {
        let windows = Cache::builder()
            .max_capacity(max_weddings)
            .time_to_idle(DAY)
            .build();
        Self { windows }
    }

    /// Consumes one unit of the wedding's budget.
    pub async fn try_acquire(&self, wedding_id: &str, limit: &RateLimit) -> Result<(), RateLimitError> {
        if limit.per_minute == 0 && limit.per_day == 0 {
            return Ok(());
        }
        let window = self
            .windows
            .get_with(wedding_id.to_string(), async {
                Arc::new(Mutex::new(WeddingWindow::new(Instant::now())))
            })
            .await;
        let mut window = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        window.try_acquire(limit, Instant::now())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10_000)
    }
}
