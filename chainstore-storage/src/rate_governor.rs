//! Token bucket guarding the relational write path.

use std::num::NonZeroU32;

use chainstore_core::GovernorConfig;
use governor::{clock::DefaultClock, Quota, RateLimiter};

/// Type alias for the limiter we use.
type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Shared limiter admitting `burst` writes immediately and then
/// `per_second` writes per second.
///
/// `acquire` only ever delays; it never rejects. It is awaited by
/// background workers, never by callers of the store.
pub struct RateGovernor {
    limiter: DirectRateLimiter,
    config: GovernorConfig,
}

impl RateGovernor {
    /// Zero values are clamped to one.
    pub fn new(config: GovernorConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: RateLimiter::direct(quota),
            config,
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn config(&self) -> GovernorConfig {
        self.config
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_initial_burst_is_immediate() {
        let governor = RateGovernor::new(GovernorConfig {
            per_second: 1,
            burst: 4,
        });
        for _ in 0..4 {
            assert!(governor.try_acquire());
        }
        assert!(!governor.try_acquire(), "bucket should be empty after burst");
    }

    #[test]
    fn test_zero_config_is_clamped() {
        let governor = RateGovernor::new(GovernorConfig {
            per_second: 0,
            burst: 0,
        });
        assert!(governor.try_acquire());
        assert!(!governor.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let governor = RateGovernor::new(GovernorConfig {
            per_second: 10,
            burst: 2,
        });

        let start = Instant::now();
        for _ in 0..6 {
            governor.acquire().await;
        }
        // Two immediate tokens, then four at 100ms intervals.
        assert!(
            start.elapsed() >= Duration::from_millis(350),
            "elapsed {:?}",
            start.elapsed()
        );
    }
}
