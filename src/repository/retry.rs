use crate::core::{DocError, Result};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;

/// Retry budget for the read-modify-write protocols.
///
/// `max_retries == 0` means a single attempt. Backoff is off by default;
/// when enabled it doubles per attempt up to `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetryPolicy {
    /// Additional attempts allowed after the first conflict.
    pub max_retries: usize,
    /// Pause before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the pause between retries, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

impl From<usize> for ConflictRetryPolicy {
    fn from(max_retries: usize) -> Self {
        Self::new(max_retries)
    }
}

impl ConflictRetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self.max_backoff_ms = max_backoff_ms.max(initial_backoff_ms);
        self
    }

    /// Pause before retry number `attempt` (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if self.initial_backoff_ms == 0 {
            return 0;
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }

    /// Waits out the backoff for `attempt`, aborting on cancellation.
    pub(crate) async fn pause(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let delay = self.backoff_ms(attempt);
        if delay == 0 {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(DocError::Cancelled),
            _ = sleep(TokioDuration::from_millis(delay)) => Ok(()),
        }
    }
}
