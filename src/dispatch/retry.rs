use std::time::Duration;

use crate::transport::Outcome;

/// Resubmission policy for failed commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Resubmissions allowed per command; `None` means no ceiling
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub retry_soft_failures: bool,
}

impl RetryPolicy {
    /// Every failure is final
    pub fn disabled() -> Self {
        Self {
            max_retries: Some(0),
            base_delay: Duration::from_millis(500),
            retry_soft_failures: true,
        }
    }

    /// Whether a command whose `retries`-th resubmission produced `outcome`
    /// gets another try
    pub fn should_retry(&self, outcome: &Outcome, retries: u32) -> bool {
        if !outcome.is_retryable(self.retry_soft_failures) {
            return false;
        }
        match self.max_retries {
            Some(max) => retries < max,
            None => true,
        }
    }

    /// Delay before resubmission number `attempt` (1-based): `base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}
