use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

use super::fetch::FetchThrottler;
use super::pool::Pool;
use super::stats::PoolStats;
use crate::coordinator::Coordinator;
use crate::{BinSet, Result, ThrottleError, ThrottleGroup, ThrottleSpec, ThrottlerConfig};

/// Decides whether a throttle group is still in use.
///
/// [`Throttler::poll`] destroys the pools of groups that are no longer
/// valid. A later request for the same group creates a fresh pool.
pub trait GroupValidator: Send + Sync + fmt::Debug {
    /// Whether `group` should keep its pool
    fn is_group_valid(&self, group: &ThrottleGroup) -> bool;
}

/// A [`GroupValidator`] that keeps every group
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

impl GroupValidator for AlwaysValid {
    fn is_group_valid(&self, _group: &ThrottleGroup) -> bool {
        true
    }
}

/// The entry point of the library: a registry of [`Pool`]s, one per throttle
/// group, created on first use.
///
/// A `Throttler` does not poll by itself. Hand it to a
/// [`crate::PollDriver`] or call [`Throttler::poll`] and
/// [`Throttler::free_unused_resources`] periodically.
#[derive(Debug)]
pub struct Throttler {
    pools: DashMap<ThrottleGroup, Arc<Pool>>,
    coordinator: Arc<dyn Coordinator>,
    validator: Arc<dyn GroupValidator>,
    config: ThrottlerConfig,
    closed: AtomicBool,
}

impl Throttler {
    /// Create a throttler that shares its groups with the other members of
    /// `coordinator`'s cluster
    #[must_use]
    pub fn new(coordinator: Arc<dyn Coordinator>, config: ThrottlerConfig) -> Self {
        Self {
            pools: DashMap::new(),
            coordinator,
            validator: Arc::new(AlwaysValid),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Use `validator` to decide which groups keep their pools
    #[must_use]
    pub fn with_validator(mut self, validator: impl GroupValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// The settings this throttler was created with
    #[must_use]
    pub const fn config(&self) -> &ThrottlerConfig {
        &self.config
    }

    /// Wait for a connection permit on `bins` of `group`.
    ///
    /// The group's pool is created and registered with the coordinator on
    /// first use. If `spec` differs from the pool's current spec it replaces
    /// it.
    ///
    /// # Errors
    ///
    /// - [`ThrottleError::Configuration`] if `spec` is invalid
    /// - [`ThrottleError::Coordination`] if the pool cannot be registered
    /// - [`ThrottleError::Shutdown`] if the throttler or the pool is
    ///   destroyed before the permit is granted
    pub async fn obtain_connection_permission(
        &self,
        group: &ThrottleGroup,
        spec: &ThrottleSpec,
        bins: &BinSet,
        now: Instant,
    ) -> Result<FetchThrottler> {
        spec.validate()?;
        let pool = self.pool_for(group, spec).await?;
        pool.update_spec(spec);
        pool.acquire(bins, now).await
    }

    /// Give back a permit obtained through
    /// [`Throttler::obtain_connection_permission`].
    ///
    /// # Errors
    ///
    /// - [`ThrottleError::Configuration`] if `spec` is invalid
    /// - [`ThrottleError::InvariantViolation`] if the group has no pool or no
    ///   permit is held on one of the bins; nothing is released then
    /// - [`ThrottleError::Shutdown`] if the throttler or the pool has been
    ///   destroyed
    pub fn release_connection_permission(
        &self,
        group: &ThrottleGroup,
        spec: &ThrottleSpec,
        bins: &BinSet,
        now: Instant,
    ) -> Result<()> {
        spec.validate()?;
        self.ensure_open(group)?;
        let pool = self
            .pool(group)
            .ok_or_else(|| ThrottleError::invariant(group, "group has no pool"))?;
        pool.update_spec(spec);
        pool.release(bins, now)
    }

    fn ensure_open(&self, group: &ThrottleGroup) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ThrottleError::shutdown(group))
        } else {
            Ok(())
        }
    }

    async fn pool_for(&self, group: &ThrottleGroup, spec: &ThrottleSpec) -> Result<Arc<Pool>> {
        self.ensure_open(group)?;
        if let Some(pool) = self.pool(group) {
            return Ok(pool);
        }

        let created = Arc::new(
            Pool::register(
                group.clone(),
                spec.clone(),
                Arc::clone(&self.coordinator),
                self.config.idle_timeout,
            )
            .await?,
        );

        let existing = match self.pools.entry(group.clone()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&created));
                None
            }
        };
        let pool = if let Some(existing) = existing {
            debug!("Another task created the pool of {group} first");
            created.destroy(Instant::now()).await;
            existing
        } else {
            created
        };

        // A destroy that ran while we were registering has already swept the
        // registry, so the pool must not stay behind.
        if self.closed.load(Ordering::SeqCst) {
            self.pools
                .remove_if(group, |_, current| Arc::ptr_eq(current, &pool));
            pool.destroy(Instant::now()).await;
            return Err(ThrottleError::shutdown(group));
        }
        Ok(pool)
    }

    fn snapshot(&self) -> Vec<(ThrottleGroup, Arc<Pool>)> {
        self.pools
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Destroy the pools of invalid groups, then rebalance every remaining
    /// pool against the current peer counts.
    ///
    /// Coordinator failures are logged by the pools and leave their limits
    /// unchanged.
    pub async fn poll(&self, now: Instant) {
        let mut valid = Vec::new();
        for (group, pool) in self.snapshot() {
            if self.validator.is_group_valid(&group) {
                valid.push(pool);
                continue;
            }
            info!("Throttle group {group} is no longer in use");
            if self
                .pools
                .remove_if(&group, |_, current| Arc::ptr_eq(current, &pool))
                .is_some()
            {
                pool.destroy(now).await;
            }
        }

        join_all(valid.iter().map(|pool| pool.poll(now))).await;
    }

    /// Evict idle bins from every pool. Returns the number of evicted bins.
    pub fn free_unused_resources(&self, now: Instant) -> usize {
        self.snapshot()
            .iter()
            .map(|(_, pool)| pool.free_unused_resources(now))
            .sum()
    }

    /// Destroy every pool. Waiting and future requests fail with
    /// [`ThrottleError::Shutdown`]. Calling this again has no further effect.
    pub async fn destroy(&self, now: Instant) {
        self.closed.store(true, Ordering::SeqCst);
        let removed: Vec<Arc<Pool>> = self
            .snapshot()
            .into_iter()
            .filter_map(|(group, _)| self.pools.remove(&group).map(|(_, pool)| pool))
            .collect();
        if removed.is_empty() {
            return;
        }

        join_all(removed.iter().map(|pool| pool.destroy(now))).await;
        info!("Throttler destroyed {} pools", removed.len());
    }

    /// Whether [`Throttler::destroy`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The pool of `group`, if it currently has one
    #[must_use]
    pub fn pool(&self, group: &ThrottleGroup) -> Option<Arc<Pool>> {
        self.pools.get(group).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of groups that currently have a pool
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Snapshot the statistics of every pool, ordered by group
    #[must_use]
    pub fn stats(&self) -> BTreeMap<ThrottleGroup, PoolStats> {
        self.snapshot()
            .into_iter()
            .map(|(group, pool)| (group, pool.stats()))
            .collect()
    }
}
