//! Retry logic for acquisition attempts.
//!
//! BLE connections to battery-powered sensors fail routinely: the device may
//! be asleep, out of range, or busy with another central. Every acquisition
//! error is therefore treated as transient and retried with a fixed delay.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use thermolog_core::{Error, RetryPolicy, with_retry};
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::new(3).delay(Duration::from_secs(5));
//!
//! let value = with_retry(&policy, "read_sensor", || async {
//!     Ok::<_, Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

/// Default number of attempts per acquisition cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` and the default delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1)
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Execute an async operation with retry logic.
///
/// Runs `operation` up to `policy.max_attempts` times, sleeping
/// `policy.delay` between attempts but not after the last one.
///
/// # Returns
///
/// The first successful result, or the error from the final attempt.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name, attempt, attempts, e, policy.delay
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}. Giving up",
                    operation_name, attempt, attempts, e
                );
                return Err(e);
            }
        }
    }
}
