//! Pacing and retry knobs for a scan run.

use std::time::Duration;

/// Tuning for one scan run. Defaults match the pacing the remote
/// service's request budget tolerates in production.
#[derive(Debug, Clone)]
pub struct ScanTuning {
    /// Messages requested per history page.
    pub page_size: usize,
    /// Fixed delay between successive page fetches.
    pub fetch_delay: Duration,
    /// Delay after each fully processed message.
    pub process_delay: Duration,
    /// Delay after each successful role grant and between retry rounds.
    pub grant_delay: Duration,
    /// Emit a progress notification every this many pages.
    pub progress_every: u64,
    /// Total grant attempts per participant (initial try included).
    pub max_retry_attempts: u32,
    /// Suspension used when a rate-limit signal carries no duration.
    pub rate_limit_fallback: Duration,
    /// Cap for the doubling fetch-failure backoff.
    pub max_fetch_backoff: Duration,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            page_size: 10,
            fetch_delay: Duration::from_millis(1000),
            process_delay: Duration::from_millis(250),
            grant_delay: Duration::from_millis(1000),
            progress_every: 2,
            max_retry_attempts: 3,
            rate_limit_fallback: Duration::from_secs(5),
            max_fetch_backoff: Duration::from_secs(30),
        }
    }
}

impl ScanTuning {
    /// All pacing delays zeroed; retry and paging behavior unchanged.
    pub fn unpaced() -> Self {
        Self {
            fetch_delay: Duration::ZERO,
            process_delay: Duration::ZERO,
            grant_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Backoff after `consecutive_failures` failed fetches of the same
    /// page: twice the inter-page delay, doubling per failure, capped.
    pub fn fetch_backoff(&self, consecutive_failures: u32) -> Duration {
        let base = self
            .fetch_delay
            .max(Duration::from_millis(1))
            .saturating_mul(2);
        let shift = consecutive_failures.saturating_sub(1).min(16);
        base.saturating_mul(1 << shift).min(self.max_fetch_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let tuning = ScanTuning::default();
        assert_eq!(tuning.fetch_backoff(1), Duration::from_secs(2));
        assert_eq!(tuning.fetch_backoff(2), Duration::from_secs(4));
        assert_eq!(tuning.fetch_backoff(3), Duration::from_secs(8));
        assert_eq!(tuning.fetch_backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn backoff_never_zero_even_when_unpaced() {
        let tuning = ScanTuning::unpaced();
        assert!(tuning.fetch_backoff(1) > Duration::ZERO);
    }
}
