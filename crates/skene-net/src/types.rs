#![forbid(unsafe_code)]

use std::time::Duration;

/// Network configuration for segment loading.
#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    /// Retry budget while the device appears online.
    pub max_retries: u32,
    /// Retry budget while the device appears offline; offline failures are
    /// usually transient, so this is more generous.
    pub max_retries_offline: u32,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 4,
            max_retries_offline: 20,
            retry_base_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_secs(3),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_retries_offline: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&NetOptions> for RetryPolicy {
    fn from(opts: &NetOptions) -> Self {
        Self {
            max_retries: opts.max_retries,
            max_retries_offline: opts.max_retries_offline,
            base_delay: opts.retry_base_delay,
            max_delay: opts.max_retry_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NetOptions::default())
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based); attempt 0 runs immediately.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        exponential.min(self.max_delay)
    }

    /// Retry budget under the given connectivity.
    #[must_use]
    pub fn budget(&self, offline: bool) -> u32 {
        if offline {
            self.max_retries_offline
        } else {
            self.max_retries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            max_retries_offline: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn offline_budget_is_larger() {
        let policy = RetryPolicy::default();
        assert!(policy.budget(true) > policy.budget(false));
    }
}
