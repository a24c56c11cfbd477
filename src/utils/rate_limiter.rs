use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::metrics::Metrics;

/// Sliding-window rate limiter shared by every caller of one upstream endpoint.
///
/// At most `rate_limit` grants are handed out within any trailing `period`, and
/// consecutive grants are spaced by at least `period / rate_limit`.
///
/// The grant queue sits behind a fair (FIFO) async mutex and a waiter keeps the lock
/// while it sleeps towards its own slot. Waiters are therefore served strictly in
/// arrival order: nobody re-checks the same window boundary, and every exit path
/// (immediate grant, spacing wait, full-window wait) is starvation-free.
pub struct RateLimiter {
    rate_limit: usize,
    period: Duration,
    spacing: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(rate_limit: usize, period: Duration) -> Self {
        let rate_limit = rate_limit.max(1);
        Self {
            rate_limit,
            period,
            spacing: period / rate_limit as u32,
            grants: Mutex::new(VecDeque::with_capacity(rate_limit)),
        }
    }

    /// Wait until a call may be made.
    pub async fn acquire(&self) {
        let start = Instant::now();
        let mut grants = self.grants.lock().await;

        loop {
            let now = Instant::now();
            while let Some(oldest) = grants.front() {
                if now.duration_since(*oldest) >= self.period {
                    grants.pop_front();
                } else {
                    break;
                }
            }

            if grants.len() < self.rate_limit {
                if let Some(last) = grants.back() {
                    let next_slot = *last + self.spacing;
                    if next_slot > now {
                        sleep_until(next_slot).await;
                    }
                }
                grants.push_back(Instant::now());
                break;
            }

            // Window is full: wait for the oldest grant to leave it
            if let Some(oldest) = grants.front() {
                sleep_until(*oldest + self.period).await;
            }
        }
        drop(grants);

        if let Some(metrics) = Metrics::global() {
            metrics.record_rate_limiter_wait(start.elapsed().as_secs_f64());
        }
    }

    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
