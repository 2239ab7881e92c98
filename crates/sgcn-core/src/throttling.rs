use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::MonotonicClock;
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tracing::trace;

use crate::source_policy::SourcePolicies;
use crate::SourceId;

// Same clock as `Instant`, so waits measured by callers never undershoot a slot.
type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, MonotonicClock, NoOpMiddleware<Instant>>;

/// Process-wide pacing gates, one per source with a minimum spacing.
///
/// The gate is shared by every resolution running in the process, so
/// concurrent resolutions of different species keys still queue behind it.
#[derive(Clone, Default)]
pub struct SourceThrottles {
    limiters: Arc<HashMap<SourceId, DirectRateLimiter>>,
}

impl SourceThrottles {
    pub fn from_policies(policies: &SourcePolicies) -> Self {
        let limiters = SourceId::ALL
            .into_iter()
            .filter_map(|source| {
                let spacing = policies.get(source).min_spacing?;
                let quota = quota_from_spacing(spacing)?;
                Some((source, RateLimiter::direct_with_clock(quota, &MonotonicClock)))
            })
            .collect();

        Self {
            limiters: Arc::new(limiters),
        }
    }

    pub fn is_paced(&self, source: SourceId) -> bool {
        self.limiters.contains_key(&source)
    }

    /// Wait until `source` may be called again, and claim the slot.
    ///
    /// Returns how long the caller waited. Sources without a spacing return
    /// immediately.
    pub async fn pace(&self, source: SourceId) -> Duration {
        let Some(limiter) = self.limiters.get(&source) else {
            return Duration::ZERO;
        };

        let started = Instant::now();
        limiter.until_ready().await;
        let waited = started.elapsed();
        trace!(source = %source, waited_ms = waited.as_millis() as u64, "paced source call");
        waited
    }
}

fn quota_from_spacing(spacing: Duration) -> Option<Quota> {
    Quota::with_period(spacing).map(|quota| quota.allow_burst(NonZeroU32::MIN))
}
