//! Request throttling for upstream market APIs, built on governor.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::{debug, instrument};

/// Direct (un-keyed) limiter shared by all calls to one upstream host.
pub struct RequestThrottle {
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
}

impl RequestThrottle {
    /// A zero quota is raised to one request per second.
    pub fn per_second(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            requests_per_second: rate.get(),
        }
    }

    /// Waits until a request may be sent.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            debug!("Upstream quota exhausted, waiting for a permit");
            self.limiter.until_ready().await;
        }
    }

    /// Takes a permit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }
}
