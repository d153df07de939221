//! Reconnect and renewal delays.

use std::time::Duration;

/// Initial delay before the second consecutive retry.
pub const DEFAULT_RETRY_INITIAL: Duration = Duration::from_secs(1);
/// Upper bound on the delay between retries.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(15);

/// Exponential backoff bounds for reconnect and renewal retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_RETRY_INITIAL,
            max: DEFAULT_RETRY_MAX,
        }
    }
}

/// Consecutive-failure counter that turns into a delay.
///
/// The first failure retries immediately; later ones wait `initial`, doubling
/// up to `max`, plus up to 25% jitter.
pub(crate) struct Backoff {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    pub(crate) fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failure and return how long to wait before the next attempt.
    #[must_use]
    pub(crate) fn on_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures == 1 {
            return Duration::ZERO;
        }
        let exp = (self.consecutive_failures - 2).min(30);
        let base = self
            .policy
            .initial
            .saturating_mul(1u32 << exp)
            .min(self.policy.max);
        base + jitter(base)
    }

    pub(crate) fn failures(&self) -> u32 {
        self.consecutive_failures
    }
}

fn jitter(base: Duration) -> Duration {
    let quarter_ms = (base.as_millis() / 4) as u64;
    if quarter_ms == 0 {
        return Duration::ZERO;
    }
    // Jitter source: wall-clock subsecond nanos.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    Duration::from_millis(nanos % quarter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(4),
        }
    }

    fn within(d: Duration, base: Duration) -> bool {
        d >= base && d <= base + base / 4
    }

    #[test]
    fn first_failure_is_immediate() {
        let mut b = Backoff::new(policy());
        assert_eq!(b.on_failure(), Duration::ZERO);
        assert_eq!(b.failures(), 1);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let mut b = Backoff::new(policy());
        let _ = b.on_failure();
        assert!(within(b.on_failure(), Duration::from_secs(1)));
        assert!(within(b.on_failure(), Duration::from_secs(2)));
        assert!(within(b.on_failure(), Duration::from_secs(4)));
        assert!(within(b.on_failure(), Duration::from_secs(4)));
    }

    #[test]
    fn success_resets() {
        let mut b = Backoff::new(policy());
        let _ = b.on_failure();
        let _ = b.on_failure();
        b.on_success();
        assert_eq!(b.failures(), 0);
        assert_eq!(b.on_failure(), Duration::ZERO);
    }

    #[test]
    fn zero_policy_never_waits() {
        let mut b = Backoff::new(RetryPolicy {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        });
        for _ in 0..5 {
            assert_eq!(b.on_failure(), Duration::ZERO);
        }
    }
}
