use anyhow::{anyhow, Error, Result};
use std::fmt::Display;
use std::{future::Future, time::Duration};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::utils::strip_html;

pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential: 2.0,
        }
    }
}

/// Per-operation retry with exponential backoff and full jitter. Used for warehouse
/// inserts, where each batch backs off on its own.
pub async fn retry<F, Fut, T>(operation: F, config: &RetryConfig, context: &str) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, Error>>,
{
    let mut attempt = 1;
    let mut delay = config.base_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempts. Final error: {}",
                        context, attempt, e
                    );
                    return Err(anyhow!(strip_html(&e.to_string()))
                        .context(format!("Failed after {} attempts", attempt)));
                }

                warn!(
                    "Attempt {}/{} for '{}' failed: {}. Retrying in {}ms...",
                    attempt,
                    config.max_attempts,
                    context,
                    strip_html(&e.to_string()),
                    delay
                );

                sleep(Duration::from_millis(delay)).await;

                // Exponential backoff with full jitter
                // https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
                let next_delay = delay as f64 * config.exponential;
                delay = std::cmp::min(
                    config.max_delay_ms,
                    (fastrand::f64() * next_delay) as u64,
                );
                attempt += 1;
            }
        }
    }
}

/// A cool-down gate shared by every caller of one client.
///
/// Callers wait for the gate to be open before each attempt. The first caller to see a
/// failure while the gate is open closes it, sleeps `backoff`, and reopens it; every
/// other caller that fails meanwhile just waits for the reopen. The cool-down is global
/// to the client and deliberately coarser than per-call backoff.
pub struct BackoffGate {
    open: watch::Sender<bool>,
    backoff: Duration,
}

// Reopens the gate even if the cooling task is cancelled mid-sleep.
struct ReopenOnDrop<'a>(&'a watch::Sender<bool>);

impl Drop for ReopenOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl BackoffGate {
    pub fn new(backoff: Duration) -> Self {
        let (open, _) = watch::channel(true);
        Self { open, backoff }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub async fn wait_open(&self) {
        let mut receiver = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = receiver.wait_for(|open| *open).await;
    }

    /// Report a failure. Returns `true` if this caller performed the cool-down.
    pub async fn trip(&self) -> bool {
        let closed_here = self.open.send_if_modified(|open| {
            if *open {
                *open = false;
                true
            } else {
                false
            }
        });

        if closed_here {
            let _reopen = ReopenOnDrop(&self.open);
            warn!("Backing off for {}ms before further attempts", self.backoff.as_millis());
            sleep(self.backoff).await;
        } else {
            self.wait_open().await;
        }
        closed_here
    }
}

/// All attempts of a gated retry failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Bounded retry where every attempt first waits for the shared gate to be open and
/// failures trip the gate instead of sleeping per call.
///
/// `operation` receives the attempt number (1-based). `should_retry` decides whether an
/// error consumes another attempt; errors it rejects are returned immediately.
pub async fn retry_gated<F, Fut, T, E, R>(
    operation: F,
    should_retry: R,
    max_attempts: u32,
    gate: &BackoffGate,
    context: &str,
) -> Result<T, Exhausted<E>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        gate.wait_open().await;

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                if attempt >= max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempts. Final error: {}",
                        context,
                        attempt,
                        strip_html(&e.to_string())
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                warn!(
                    "Attempt {}/{} for '{}' failed: {}",
                    attempt,
                    max_attempts,
                    context,
                    strip_html(&e.to_string())
                );

                gate.trip().await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retry_gated_recovers() {
        let gate = BackoffGate::new(Duration::from_secs(2));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, Exhausted<String>> = retry_gated(
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_| true,
            5,
            &gate,
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failures, two cool-downs
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gated_exhausts() {
        let gate = BackoffGate::new(Duration::from_millis(10));
        let result: Result<(), Exhausted<String>> = retry_gated(
            |_| async { Err("boom".to_string()) },
            |_| true,
            3,
            &gate,
            "test",
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gated_skips_non_retryable() {
        let gate = BackoffGate::new(Duration::from_secs(10));
        let start = Instant::now();
        let result: Result<(), Exhausted<String>> = retry_gated(
            |_| async { Err("reverted".to_string()) },
            |e| !e.contains("reverted"),
            5,
            &gate,
            "test",
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gate_single_cooldown_for_concurrent_failures() {
        let gate = Arc::new(BackoffGate::new(Duration::from_secs(5)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.trip().await }));
        }

        let mut cooled = 0;
        for handle in handles {
            if handle.await.unwrap() {
                cooled += 1;
            }
        }

        assert_eq!(cooled, 1);
        assert!(gate.is_open());
        // One shared sleep, not eight sequential ones
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(gate.backoff(), Duration::from_secs(5));
    }
}
