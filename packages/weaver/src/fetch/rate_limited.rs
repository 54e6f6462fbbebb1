//! Rate-limited fetcher wrapper.
//!
//! Wraps any cheap fetcher with a `governor` quota so batch scrapes don't
//! overwhelm target hosts.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;

use crate::error::{ConfigError, FetchResult};
use crate::traits::fetcher::{CheapFetcher, FetchRequest, FetchedPage};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A cheap fetcher that waits for a permit before every request.
pub struct RateLimitedFetcher<F: CheapFetcher> {
    inner: F,
    limiter: Arc<DefaultRateLimiter>,
}

impl<F: CheapFetcher> RateLimitedFetcher<F> {
    /// Allow at most `requests_per_second` requests per second.
    pub fn new(fetcher: F, requests_per_second: u32) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(requests_per_second).ok_or(ConfigError::ZeroRate)?;
        Ok(Self::with_quota(fetcher, Quota::per_second(rate)))
    }

    /// Sustained rate plus a burst allowance.
    pub fn with_burst(fetcher: F, requests_per_second: u32, burst: u32) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(requests_per_second).ok_or(ConfigError::ZeroRate)?;
        let burst = NonZeroU32::new(burst).ok_or(ConfigError::ZeroRate)?;
        Ok(Self::with_quota(fetcher, Quota::per_second(rate).allow_burst(burst)))
    }

    /// Create with a custom quota.
    pub fn with_quota(fetcher: F, quota: Quota) -> Self {
        Self {
            inner: fetcher,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: CheapFetcher> CheapFetcher for RateLimitedFetcher<F> {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        self.limiter.until_ready().await;
        trace!(url = %request.url, "Rate limit permit acquired");
        self.inner.fetch(request).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
