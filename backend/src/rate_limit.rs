//! Process-wide sliding-window limit on generation requests.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

pub struct SlidingWindowLimiter {
    max_requests: u32,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a request if the window has room for it.
    pub async fn check(&self) -> RateLimitResult {
        let now = Instant::now();
        let mut recent = self.recent.lock().await;
        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) >= self.window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() >= self.max_requests as usize {
            let retry_after = recent
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            debug!(retry_after_ms = retry_after.as_millis() as u64, "generation rate limited");
            return RateLimitResult::Limited { retry_after };
        }

        recent.push_back(now);
        RateLimitResult::Allowed {
            remaining: self.max_requests - recent.len() as u32,
        }
    }
}
