//! Inter-code delays and rate-limit backoff.

use std::time::Duration;

use upc_verify_models::LookupOutcome;

/// Delay settings applied between codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Fixed delay after every code.
    pub code_delay: Duration,
    /// Backoff unit for rate-limited codes.
    pub base_backoff: Duration,
    /// Consecutive rate limits tolerated before the multiplier kicks in.
    pub backoff_threshold: u32,
    /// Extra factor applied past the threshold.
    pub backoff_multiplier: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            code_delay: Duration::from_secs(7),
            base_backoff: Duration::from_secs(15),
            backoff_threshold: 3,
            backoff_multiplier: 2,
        }
    }
}

/// Tracks consecutive rate limits and decides how long to wait after each
/// code.
///
/// For the `k`-th consecutive rate limit the backoff is `base × k` while
/// `k <= threshold` and `base × multiplier × k` after that. Any other
/// outcome resets `k` to zero.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    consecutive: u32,
}

impl Pacer {
    /// Creates a pacer with no rate limits seen.
    #[must_use]
    pub const fn new(config: PacingConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    /// Number of consecutive rate-limited outcomes seen so far.
    #[must_use]
    pub const fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Backoff for the `k`-th consecutive rate limit.
    #[must_use]
    pub fn backoff(&self, k: u32) -> Duration {
        let factor = if k <= self.config.backoff_threshold {
            k
        } else {
            self.config.backoff_multiplier.max(1).saturating_mul(k)
        };
        self.config.base_backoff.saturating_mul(factor)
    }

    /// Records `outcome` and returns the delay to wait before the next
    /// code.
    ///
    /// A source retry hint longer than the computed backoff wins.
    pub fn after_outcome(&mut self, outcome: &LookupOutcome) -> Duration {
        let LookupOutcome::RateLimited { retry_hint, .. } = outcome else {
            self.consecutive = 0;
            return self.config.code_delay;
        };

        self.consecutive = self.consecutive.saturating_add(1);
        let backoff = self.backoff(self.consecutive);
        let backoff = retry_hint.map_or(backoff, |hint| backoff.max(hint));

        self.config.code_delay.saturating_add(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(retry_hint: Option<Duration>) -> LookupOutcome {
        LookupOutcome::RateLimited {
            source_id: "upcitemdb".to_string(),
            retry_hint,
        }
    }

    #[test]
    fn escalates_then_resets() {
        let mut pacer = Pacer::new(PacingConfig::default());

        let delays: Vec<Duration> = (0..5)
            .map(|_| pacer.after_outcome(&rate_limited(None)))
            .collect();

        assert_eq!(
            delays,
            [22, 37, 52, 127, 157].map(Duration::from_secs).to_vec()
        );
        for window in delays.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert_eq!(pacer.consecutive(), 5);

        let baseline = pacer.after_outcome(&LookupOutcome::NotFound);
        assert_eq!(baseline, Duration::from_secs(7));
        assert_eq!(pacer.consecutive(), 0);

        assert_eq!(
            pacer.after_outcome(&rate_limited(None)),
            Duration::from_secs(22)
        );
    }

    #[test]
    fn retry_hint_is_a_floor() {
        let mut pacer = Pacer::new(PacingConfig::default());
        assert_eq!(
            pacer.after_outcome(&rate_limited(Some(Duration::from_secs(60)))),
            Duration::from_secs(67)
        );
        assert_eq!(
            pacer.after_outcome(&rate_limited(Some(Duration::from_secs(1)))),
            Duration::from_secs(37)
        );
    }

    #[test]
    fn zero_multiplier_still_increases() {
        let pacer = Pacer::new(PacingConfig {
            backoff_multiplier: 0,
            ..PacingConfig::default()
        });
        assert!(pacer.backoff(4) > pacer.backoff(3));
    }
}
