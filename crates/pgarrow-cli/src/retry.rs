use std::time::Duration;

use pgarrow_config::RetryConfig;
use pgarrow_pg::ShutdownRx;

/// Decides whether and when a failed operation is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, given how many attempts failed in a
    /// row. `None` gives up.
    fn next_delay(&self, failures: u32) -> Option<Duration>;
}

/// Same delay before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
    /// Zero means unlimited.
    max_attempts: u32,
}

impl FixedBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.backoff(), config.max_attempts)
    }
}

impl RetryPolicy for FixedBackoff {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        if self.max_attempts != 0 && failures >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

/// Sleep for `delay` unless shutdown comes first. Returns false on shutdown.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut ShutdownRx) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgarrow_pg::create_shutdown_channel;

    #[test]
    fn test_fixed_backoff_limits() {
        let policy = FixedBackoff::new(Duration::from_millis(500), 3);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_unlimited_attempts() {
        let policy = FixedBackoff::new(Duration::from_secs(1), 0);
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_cut_short_by_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(sleep_or_shutdown(Duration::from_secs(1), &mut rx).await);

        tx.shutdown();
        let started = tokio::time::Instant::now();
        assert!(!sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
