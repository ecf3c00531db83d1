//! Bounded polling with a fixed delay

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::SyncResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

/// Call `attempt` until it yields `Some`, at most `policy.max_attempts` times.
///
/// Returns `Ok(None)` when every attempt came back empty. Errors end the
/// polling immediately.
pub async fn poll_with_retry<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> SyncResult<Option<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<Option<T>>>,
{
    for n in 1..=policy.max_attempts {
        if let Some(value) = attempt(n).await? {
            debug!(attempt = n, "Poll succeeded");
            return Ok(Some(value));
        }
        if n < policy.max_attempts {
            trace!(attempt = n, delay_ms = policy.delay_ms, "Nothing yet, retrying");
            tokio::time::sleep(policy.delay()).await;
        }
    }
    debug!(attempts = policy.max_attempts, "Poll gave up");
    Ok(None)
}
