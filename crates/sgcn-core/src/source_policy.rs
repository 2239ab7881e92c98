use std::collections::HashMap;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::SourceId;

/// Retry and pacing rules applied to every call against one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePolicy {
    pub source: SourceId,
    pub retry: RetryPolicy,
    /// Minimum wall time between consecutive resolution attempts against the
    /// source, process-wide.
    pub min_spacing: Option<Duration>,
    pub timeout: Duration,
}

impl SourcePolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Defaults for `source` with `time_unit` scaling backoff and spacing.
    ///
    /// WoRMS is paced at one attempt per time unit. Older notes describe its
    /// limit as "at most twice per second"; that figure is stale and the one
    /// time unit spacing is what the service is called with.
    pub fn default_for(source: SourceId, time_unit: Duration) -> Self {
        let min_spacing = match source {
            SourceId::Worms => Some(time_unit),
            SourceId::Itis
            | SourceId::Gbif
            | SourceId::Ecos
            | SourceId::Iucn
            | SourceId::Natureserve => None,
        };

        Self {
            source,
            retry: RetryPolicy::for_time_unit(time_unit),
            min_spacing,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Policies for every known source.
#[derive(Debug, Clone)]
pub struct SourcePolicies {
    policies: HashMap<SourceId, SourcePolicy>,
}

impl SourcePolicies {
    pub fn for_time_unit(time_unit: Duration) -> Self {
        Self::from_fn(|source| SourcePolicy::default_for(source, time_unit))
    }

    pub fn from_fn(mut build: impl FnMut(SourceId) -> SourcePolicy) -> Self {
        Self {
            policies: SourceId::ALL
                .into_iter()
                .map(|source| (source, build(source)))
                .collect(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for policy in self.policies.values_mut() {
            policy.timeout = timeout;
        }
        self
    }

    pub fn with_policy(mut self, policy: SourcePolicy) -> Self {
        self.policies.insert(policy.source, policy);
        self
    }

    pub fn get(&self, source: SourceId) -> SourcePolicy {
        self.policies
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourcePolicy::default_for(source, Duration::from_secs(1)))
    }
}

impl Default for SourcePolicies {
    fn default() -> Self {
        Self::for_time_unit(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_worms_is_paced() {
        let policies = SourcePolicies::for_time_unit(Duration::from_millis(250));

        assert_eq!(
            policies.get(SourceId::Worms).min_spacing,
            Some(Duration::from_millis(250))
        );
        for source in [SourceId::Itis, SourceId::Gbif, SourceId::Ecos, SourceId::Iucn] {
            assert_eq!(policies.get(source).min_spacing, None, "source={source}");
        }
    }

    #[test]
    fn every_source_retries_five_times() {
        let policies = SourcePolicies::default();
        assert!(SourceId::ALL
            .iter()
            .all(|source| policies.get(*source).retry.max_attempts == 5));
    }

    #[test]
    fn overriding_one_policy_keeps_the_rest() {
        let policies = SourcePolicies::default().with_policy(SourcePolicy {
            retry: RetryPolicy::no_retry(),
            ..SourcePolicy::default_for(SourceId::Itis, Duration::from_secs(1))
        });

        assert_eq!(policies.get(SourceId::Itis).retry.max_attempts, 1);
        assert_eq!(policies.get(SourceId::Worms).retry.max_attempts, 5);
    }
}
