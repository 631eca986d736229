use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tracing::warn;

use crate::provider_policy::{OverflowMode, ProviderPolicy};
use crate::{SourceError, SourceId};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// GCRA request budget for one provider.
///
/// With the default burst of 1, cells are spaced `window / limit` apart, so no
/// rolling window ever admits more than `limit` calls.
#[derive(Clone)]
pub struct Throttle {
    source_id: SourceId,
    limiter: Option<Arc<DirectRateLimiter>>,
    clock: DefaultClock,
    overflow: OverflowMode,
}

impl Throttle {
    pub fn new(
        source_id: SourceId,
        quota_limit: Option<u32>,
        quota_window: Duration,
        burst: u32,
        overflow: OverflowMode,
    ) -> Self {
        let clock = DefaultClock::default();
        let limiter = quota_limit.map(|limit| {
            let quota = quota_from_window(quota_window, limit, burst);
            Arc::new(RateLimiter::direct_with_clock(quota, &clock))
        });

        Self {
            source_id,
            limiter,
            clock,
            overflow,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(
            policy.source_id,
            policy.quota_limit,
            policy.quota_window,
            policy.burst,
            policy.overflow,
        )
    }

    pub fn is_unlimited(&self) -> bool {
        self.limiter.is_none()
    }

    /// Consumes one unit of budget, waiting or failing per the overflow mode.
    pub async fn acquire(&self) -> Result<(), SourceError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                match self.overflow {
                    OverflowMode::FailFast => Err(self.exhausted(wait)),
                    OverflowMode::Block { max_wait } if wait > max_wait => {
                        Err(self.exhausted(wait))
                    }
                    OverflowMode::Block { max_wait } => {
                        tokio::time::timeout(max_wait, limiter.until_ready())
                            .await
                            .map_err(|_| self.exhausted(max_wait))
                    }
                }
            }
        }
    }

    fn exhausted(&self, retry_after: Duration) -> SourceError {
        warn!(
            source = %self.source_id,
            retry_after_ms = retry_after.as_millis() as u64,
            "provider rate budget exhausted"
        );
        SourceError::rate_limited(format!(
            "{} rate limit reached; retry in {}ms",
            self.source_id,
            retry_after.as_millis()
        ))
        .with_retry_after(retry_after)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32, burst: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(burst.clamp(1, safe_limit)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_fast(limit: u32, window: Duration) -> Throttle {
        Throttle::new(
            SourceId::AlphaVantage,
            Some(limit),
            window,
            1,
            OverflowMode::FailFast,
        )
    }

    #[tokio::test]
    async fn fail_fast_rejects_over_budget_with_retry_hint() {
        let throttle = fail_fast(5, Duration::from_secs(60));

        assert!(throttle.acquire().await.is_ok());
        let err = throttle.acquire().await.expect_err("second call within 12s is over budget");

        assert_eq!(err.code(), "source.rate_limited");
        let retry_after = err.retry_after().expect("retry hint");
        assert!(retry_after > Duration::from_secs(10));
        assert!(retry_after <= Duration::from_secs(12));
    }

    #[tokio::test]
    async fn never_admits_more_than_limit_in_a_window() {
        let throttle = fail_fast(5, Duration::from_secs(60));
        let mut admitted = 0;
        for _ in 0..20 {
            if throttle.acquire().await.is_ok() {
                admitted += 1;
            }
        }
        assert!(admitted <= 5, "admitted {admitted} calls");
    }

    #[tokio::test]
    async fn block_mode_waits_for_the_next_cell() {
        let throttle = Throttle::new(
            SourceId::SecEdgar,
            Some(10),
            Duration::from_secs(1),
            1,
            OverflowMode::Block {
                max_wait: Duration::from_secs(1),
            },
        );

        assert!(throttle.acquire().await.is_ok());
        let started = std::time::Instant::now();
        assert!(throttle.acquire().await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn block_mode_gives_up_past_max_wait() {
        let throttle = Throttle::new(
            SourceId::Finnhub,
            Some(1),
            Duration::from_secs(60),
            1,
            OverflowMode::Block {
                max_wait: Duration::from_millis(20),
            },
        );

        assert!(throttle.acquire().await.is_ok());
        let err = throttle.acquire().await.expect_err("budget refills in 60s");
        assert_eq!(err.code(), "source.rate_limited");
    }

    #[tokio::test]
    async fn unlimited_throttle_always_admits() {
        let throttle = Throttle::new(
            SourceId::Yahoo,
            None,
            Duration::from_secs(60),
            1,
            OverflowMode::FailFast,
        );
        assert!(throttle.is_unlimited());
        for _ in 0..100 {
            assert!(throttle.acquire().await.is_ok());
        }
    }
}
