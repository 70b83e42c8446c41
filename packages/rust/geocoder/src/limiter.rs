//! Process-wide request spacing for the geocoding service.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use tokio::sync::Mutex;

type DirectLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Allows one request in flight and keeps request starts at least
/// `min_interval` apart, no matter how many tasks call it.
///
/// Spacing comes from a single-cell GCRA quota; the mutex only serializes
/// callers so a slow request is never overlapped by the next one.
pub struct RateLimiter {
    pacing: Option<DirectLimiter>,
    in_flight: Mutex<()>,
}

impl RateLimiter {
    /// A zero interval disables spacing but keeps requests serialized.
    pub fn new(min_interval: Duration) -> Self {
        let pacing = Quota::with_period(min_interval)
            .map(|quota| Governor::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            pacing,
            in_flight: Mutex::new(()),
        }
    }

    /// Run `request` once the previous one has finished and the interval
    /// since its start has elapsed.
    pub async fn run<F, T>(&self, request: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = self.in_flight.lock().await;
        if let Some(pacing) = &self.pacing {
            pacing.until_ready().await;
        }
        request.await
    }
}
