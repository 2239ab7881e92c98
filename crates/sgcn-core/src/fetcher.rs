use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error};

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::source_policy::SourcePolicies;
use crate::throttling::SourceThrottles;
use crate::SourceId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Every attempt failed. Fatal to the operation that issued the fetch.
    #[error(
        "{source_id} fetch of {url} failed after {attempts} attempts in {} ms: {last_failure}",
        .elapsed.as_millis()
    )]
    Exhausted {
        source_id: SourceId,
        url: String,
        attempts: u32,
        elapsed: Duration,
        last_failure: String,
    },

    /// The transport refused the request outright; retrying cannot help.
    #[error("{source_id} rejected request to {url}: {reason}")]
    Rejected {
        source_id: SourceId,
        url: String,
        reason: String,
    },
}

/// Executes external-source calls under each source's retry and pacing policy.
#[derive(Clone)]
pub struct Fetcher {
    http: Arc<dyn HttpClient>,
    policies: SourcePolicies,
    throttles: SourceThrottles,
}

impl Fetcher {
    pub fn new(http: Arc<dyn HttpClient>, policies: SourcePolicies) -> Self {
        let throttles = SourceThrottles::from_policies(&policies);
        Self {
            http,
            policies,
            throttles,
        }
    }

    pub fn policies(&self) -> &SourcePolicies {
        &self.policies
    }

    /// Claim the next pacing slot for `source`.
    ///
    /// Pacing is per resolution attempt, not per network call: callers pace
    /// before consulting the cache, so cache hits are spaced too.
    pub async fn pace(&self, source: SourceId) -> Duration {
        self.throttles.pace(source).await
    }

    /// Issue `request` against `source`, retrying non-2xx responses and
    /// transport errors with the source's backoff.
    ///
    /// A successful response may still be empty; see [`HttpResponse::is_empty`].
    pub async fn fetch(&self, source: SourceId, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let policy = self.policies.get(source);
        let timeout_ms = u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX);
        let request = request.with_timeout_ms(timeout_ms);
        let started = Instant::now();
        let mut attempt = 0_u32;

        loop {
            let last_failure = match self.http.execute(request.clone()).await {
                Ok(response) if response.is_success() => {
                    debug!(
                        source = %source,
                        url = %request.url,
                        attempt = attempt + 1,
                        status = response.status,
                        "fetch succeeded"
                    );
                    return Ok(response);
                }
                Ok(response) => format!("HTTP {}", response.status),
                Err(err) if !err.retryable() => {
                    return Err(FetchError::Rejected {
                        source_id: source,
                        url: request.url,
                        reason: err.message().to_owned(),
                    });
                }
                Err(err) => err.message().to_owned(),
            };

            match policy.retry.delay_after(attempt) {
                Some(delay) => {
                    debug!(
                        source = %source,
                        url = %request.url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        failure = %last_failure,
                        "fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    let elapsed = started.elapsed();
                    error!(
                        source = %source,
                        url = %request.url,
                        attempts = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        failure = %last_failure,
                        "fetch retries exhausted"
                    );
                    return Err(FetchError::Exhausted {
                        source_id: source,
                        url: request.url,
                        attempts: attempt + 1,
                        elapsed,
                        last_failure,
                    });
                }
            }
        }
    }
}
