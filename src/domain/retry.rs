use {super::error::JobError, std::time::Duration};

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    NonRetryable,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail { reason: FailReason },
}

/// Shared retry-vs-fail logic. The worker pool is the only caller; processors
/// never decide to retry themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: Duration) -> Self {
        Self {
            backoff_base,
            ..Self::default()
        }
    }

    /// `attempts` counts the attempt that just failed.
    pub fn decide(&self, attempts: i32, max_attempts: i32, error: &JobError) -> RetryDecision {
        if !error.retryable() {
            return RetryDecision::Fail {
                reason: FailReason::NonRetryable,
            };
        }
        if attempts >= max_attempts {
            return RetryDecision::Fail {
                reason: FailReason::Exhausted,
            };
        }
        RetryDecision::Retry {
            delay: self.backoff(attempts),
        }
    }

    /// base * 2^(attempts - 1): 2s, 4s, 8s, ... capped at `max_backoff`.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(40), DEFAULT_MAX_BACKOFF);
    }

    #[test]
    fn non_retryable_fails_on_first_attempt() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, 5, &JobError::validation("bad email"));
        assert_eq!(
            decision,
            RetryDecision::Fail {
                reason: FailReason::NonRetryable
            }
        );
    }

    #[test]
    fn retryable_until_budget_exhausted() {
        let policy = RetryPolicy::default();
        let err = JobError::network("SMTP down");
        assert!(matches!(policy.decide(1, 3, &err), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(2, 3, &err), RetryDecision::Retry { .. }));
        assert_eq!(
            policy.decide(3, 3, &err),
            RetryDecision::Fail {
                reason: FailReason::Exhausted
            }
        );
    }
}
