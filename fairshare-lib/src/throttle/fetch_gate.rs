use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

/// Paces fetches from one bin to at most one per interval.
///
/// The gate is rebuilt whenever the bin's fair-share interval changes; permits
/// that already hold a clone of the old gate keep using it until they ask
/// for their next fetch.
#[derive(Debug, Clone)]
pub(crate) struct FetchGate {
    interval: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl FetchGate {
    /// Create a gate for the cluster-wide `interval` shared by `peers`
    /// members: each member may fetch once every `interval * peers`.
    ///
    /// Returns `None` if the resulting interval is zero.
    pub(crate) fn for_share(interval: Duration, peers: usize) -> Option<Self> {
        let peers = u32::try_from(peers.max(1)).unwrap_or(u32::MAX);
        let interval = interval.saturating_mul(peers);
        let quota = Quota::with_period(interval)?;
        Some(Self {
            interval,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// The local interval between two fetches
    pub(crate) const fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until another fetch is allowed
    pub(crate) async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }

    /// Check whether a fetch is allowed right now, consuming it if so
    #[cfg(test)]
    pub(crate) fn try_fetch(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
