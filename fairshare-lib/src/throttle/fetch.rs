use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::pool::Pool;
use crate::{BinName, BinSet, Result, ThrottleGroup};

/// Paces the work done under one connection permit.
///
/// A `FetchThrottler` is handed out by [`Pool::acquire`] and stays valid
/// while the permit is held. It does not release the permit when dropped;
/// callers release explicitly through the throttler or the pool.
#[derive(Debug)]
pub struct FetchThrottler {
    pool: Arc<Pool>,
    bins: BinSet,
    byte_rate: Option<f64>,
}

impl FetchThrottler {
    pub(crate) const fn new(pool: Arc<Pool>, bins: BinSet, byte_rate: Option<f64>) -> Self {
        Self {
            pool,
            bins,
            byte_rate,
        }
    }

    /// The throttle group the permit belongs to
    #[must_use]
    pub fn group(&self) -> &ThrottleGroup {
        self.pool.group()
    }

    /// The bins the permit was granted on
    #[must_use]
    pub const fn bins(&self) -> &BinSet {
        &self.bins
    }

    /// The slowest fair-share byte rate across the permit's bins at the time
    /// it was granted, `None` for an empty bin set
    #[must_use]
    pub const fn byte_rate(&self) -> Option<f64> {
        self.byte_rate
    }

    /// Account for `byte_count` transferred bytes and sleep until the
    /// transfer is back within every bin's byte rate.
    ///
    /// Returns the delay that was applied, which is zero while the bins
    /// still have burst capacity left.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ThrottleError::InvariantViolation`] if the permit was
    /// already released and [`crate::ThrottleError::Shutdown`] if the pool
    /// was destroyed.
    pub async fn throttle(&self, byte_count: u64, now: Instant) -> Result<Duration> {
        let delay = self.pool.debit(&self.bins, byte_count, now)?;
        if !delay.is_zero() {
            log::trace!(
                "Pacing {} {} for {delay:?} after {byte_count} bytes",
                self.group(),
                self.bins
            );
            match now.checked_add(delay) {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => tokio::time::sleep(delay).await,
            }
        }
        Ok(delay)
    }

    /// Wait until every bin of the permit allows another fetch.
    ///
    /// Bins without a minimum fetch interval never wait.
    ///
    /// # Errors
    ///
    /// Same as [`FetchThrottler::throttle`].
    pub async fn obtain_fetch_permission(&self) -> Result<()> {
        for gate in self.pool.fetch_gates(&self.bins)? {
            gate.until_ready().await;
        }
        Ok(())
    }

    /// Bytes charged to `bin` since its window was last refreshed
    #[must_use]
    pub fn consumed_in_window(&self, bin: &BinName) -> Option<u64> {
        self.pool.consumed_in_window(bin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCoordinator, ThrottleError, ThrottleSpec};
    use pretty_assertions::assert_eq;
    use test_utils::{bins, spec};

    async fn pool(spec: ThrottleSpec) -> Arc<Pool> {
        Arc::new(
            Pool::register(
                ThrottleGroup::from("downloads"),
                spec,
                Arc::new(MemoryCoordinator::new()),
                Duration::from_secs(60),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_paces_beyond_burst() {
        let pool = pool(spec!(4, 1000)).await;
        let permit = pool.acquire(&bins!["hostA"], Instant::now()).await.unwrap();
        let host = BinName::from("hostA");

        let now = Instant::now();
        assert_eq!(permit.throttle(800, now).await.unwrap(), Duration::ZERO);

        let delay = permit.throttle(700, now).await.unwrap();
        assert_eq!(delay, Duration::from_millis(500));
        assert!(Instant::now() >= now + delay);
        assert_eq!(permit.consumed_in_window(&host), Some(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_uses_slowest_bin() {
        let spec = spec!(4, 1000).bin("slow", crate::BinLimits::default().max_bytes_per_second(100));
        let pool = pool(spec).await;
        let permit = pool
            .acquire(&bins!["fast", "slow"], Instant::now())
            .await
            .unwrap();

        // Both buckets start full; 300 bytes leave the slow one 200 bytes short
        let delay = permit.throttle(300, Instant::now()).await.unwrap();
        assert_eq!(delay, Duration::from_secs(2));
        assert_eq!(permit.consumed_in_window(&"fast".into()), Some(300));
        assert_eq!(permit.consumed_in_window(&"slow".into()), Some(300));
    }

    #[tokio::test]
    async fn test_throttle_after_release_is_rejected() {
        let pool = pool(spec!(4, 1000)).await;
        let bins = bins!["hostA"];
        let permit = pool.acquire(&bins, Instant::now()).await.unwrap();
        pool.release(&bins, Instant::now()).unwrap();

        assert!(matches!(
            permit.throttle(10, Instant::now()).await,
            Err(ThrottleError::InvariantViolation { .. })
        ));
        assert_eq!(permit.consumed_in_window(&"hostA".into()), Some(0));
    }

    #[tokio::test]
    async fn test_fetch_permission_is_paced() {
        let interval = Duration::from_millis(200);
        let pool = pool(spec!(4, 1000).min_fetch_interval(interval)).await;
        let permit = pool.acquire(&bins!["hostA"], Instant::now()).await.unwrap();

        // The gate keeps its own wall clock
        let start = std::time::Instant::now();
        permit.obtain_fetch_permission().await.unwrap();
        permit.obtain_fetch_permission().await.unwrap();
        assert!(start.elapsed() >= interval / 2);
        assert_eq!(pool.stats().bins[&BinName::from("hostA")].fetches, 2);
    }

    #[tokio::test]
    async fn test_fetch_permission_without_interval() {
        let pool = pool(spec!(4, 1000)).await;
        let permit = pool.acquire(&bins!["hostA"], Instant::now()).await.unwrap();
        for _ in 0..10 {
            permit.obtain_fetch_permission().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_permit_never_waits() {
        let pool = pool(spec!(1, 1)).await;
        let permit = pool.acquire(&BinSet::new(), Instant::now()).await.unwrap();
        assert_eq!(
            permit.throttle(1_000_000, Instant::now()).await.unwrap(),
            Duration::ZERO
        );
        permit.obtain_fetch_permission().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_transfer_does_not_overflow_the_deadline() {
        let pool = pool(spec!(1, 1)).await;
        let permit = pool.acquire(&bins!["hostA"], Instant::now()).await.unwrap();

        let huge = tokio::time::timeout(
            Duration::from_millis(10),
            permit.throttle(u64::MAX, Instant::now()),
        )
        .await;
        assert!(huge.is_err(), "a huge transfer must be paced, not granted");

        // The bin stays usable for later transfers
        let next = tokio::time::timeout(
            Duration::from_millis(10),
            permit.throttle(1, Instant::now()),
        )
        .await;
        assert!(next.is_err());
        assert_eq!(permit.consumed_in_window(&"hostA".into()), Some(u64::MAX));
    }
}
