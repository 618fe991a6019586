//! Lock-contention retry for batch commits
//!
//! A batch that fails with a retryable error ([`Error::is_retryable`]) has
//! been rolled back as a whole and can be run again unchanged.

use crate::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Doubling delay, capped at [`MAX_BACKOFF_MS`]
#[derive(Debug, Clone, Copy)]
struct Backoff {
    next_ms: u64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next_ms: INITIAL_BACKOFF_MS,
        }
    }

    fn step(&mut self) -> Duration {
        let delay = Duration::from_millis(self.next_ms);
        self.next_ms = (self.next_ms * 2).min(MAX_BACKOFF_MS);
        delay
    }
}

/// Run `batch` until it succeeds, fails with a non-retryable error, or
/// `max_wait_ms` has elapsed since the first attempt.
pub async fn retry_on_lock<F, Fut, T>(label: &str, max_wait_ms: u64, mut batch: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(max_wait_ms);
    let mut backoff = Backoff::new();
    let mut attempt = 1u32;

    loop {
        let err: Error = match batch().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(batch = label, attempt, "Batch committed after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            error!(
                batch = label,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                error = %err,
                "Giving up on batch"
            );
            return Err(err);
        }

        let delay = backoff.step();
        warn!(
            batch = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Batch hit lock contention, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
