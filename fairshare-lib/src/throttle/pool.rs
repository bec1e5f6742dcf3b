use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::bin::Bin;
use super::fetch::FetchThrottler;
use super::fetch_gate::FetchGate;
use super::stats::PoolStats;
use crate::coordinator::{Coordinator, ServiceHandle};
use crate::{BinName, BinSet, Result, ServiceType, ThrottleError, ThrottleGroup, ThrottleSpec};

/// The throttling state of one throttle group in this process.
///
/// A pool registers itself with the [`Coordinator`] when it is created and
/// owns one [`Bin`] per bin name it has seen. Callers block in
/// [`Pool::acquire`] until every bin they asked for has spare local
/// capacity. [`Pool::poll`] recomputes the local capacity from the number of
/// cluster members throttling the same group.
///
/// # Architecture
///
/// - Bins are created lazily on first use and evicted once idle
/// - All bin state sits behind one mutex that is never held across an
///   `.await`; in particular not while talking to the coordinator
/// - Waiters are woken by a broadcast on every release, poll and destroy and
///   re-check their own condition
///
/// Once destroyed, a pool refuses every operation with
/// [`ThrottleError::Shutdown`].
#[derive(Debug)]
pub struct Pool {
    group: ThrottleGroup,
    service_type: ServiceType,
    service: ServiceHandle,
    coordinator: Arc<dyn Coordinator>,
    idle_timeout: Duration,
    state: Mutex<PoolState>,
    changed: Notify,
}

#[derive(Debug)]
struct PoolState {
    alive: bool,
    spec: ThrottleSpec,
    peers: usize,
    bins: HashMap<BinName, Bin>,
}

impl PoolState {
    /// Get a bin, creating it at the current fair share if it is missing
    fn bin_mut(&mut self, name: &BinName, now: Instant) -> &mut Bin {
        let Self {
            spec, peers, bins, ..
        } = self;
        bins.entry(name.clone())
            .or_insert_with(|| Bin::new(name.clone(), spec, *peers, now))
    }

    /// The first bin of `bins` that has no permit outstanding, if any
    fn first_unheld<'a>(&self, bins: &'a BinSet) -> Option<&'a BinName> {
        bins.iter().find(|name| {
            self.bins
                .get(*name)
                .is_none_or(|bin| bin.active() == 0)
        })
    }

    fn evict_idle(&mut self, now: Instant, idle_timeout: Duration) -> usize {
        let before = self.bins.len();
        self.bins.retain(|name, bin| {
            let idle = bin.is_idle(now, idle_timeout);
            if idle {
                debug!("Evicting idle bin {name}");
            }
            !idle
        });
        before - self.bins.len()
    }
}

impl Pool {
    /// Register a new pool for `group` with the coordinator.
    ///
    /// The initial peer count is taken right away; if it cannot be obtained
    /// the pool starts out assuming it is alone and corrects itself on the
    /// first successful poll.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Coordination`] if the registration fails.
    /// Nothing is left registered in that case.
    pub async fn register(
        group: ThrottleGroup,
        spec: ThrottleSpec,
        coordinator: Arc<dyn Coordinator>,
        idle_timeout: Duration,
    ) -> Result<Self> {
        spec.validate()?;
        let service_type = group.service_type();
        let service = coordinator
            .register_anonymous_service(&service_type)
            .await?;

        let peers = match coordinator.count_active_services(&service_type).await {
            Ok(peers) => peers.max(1),
            Err(e) => {
                warn!("Cannot count peers of throttle group {group}, assuming none: {e}");
                1
            }
        };
        info!("Registered throttle group {group} as {service} ({peers} peers)");

        Ok(Self {
            group,
            service_type,
            service,
            coordinator,
            idle_timeout,
            state: Mutex::new(PoolState {
                alive: true,
                spec,
                peers,
                bins: HashMap::new(),
            }),
            changed: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // The state is plain counters, which stay consistent even if a
        // holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current spec if `spec` differs from it.
    ///
    /// Bins created from now on use the new spec right away; existing bins
    /// pick it up on the next [`Pool::poll`]. Returns whether the spec was
    /// replaced.
    pub fn update_spec(&self, spec: &ThrottleSpec) -> bool {
        let mut state = self.state();
        if state.spec == *spec {
            return false;
        }
        debug!("Throttle group {} has a new spec", self.group);
        state.spec = spec.clone();
        true
    }

    /// Wait until every bin in `bins` has spare capacity, then take one
    /// permit on all of them at once.
    ///
    /// Missing bins are created at the current fair share. An empty bin set
    /// is granted immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Shutdown`] if the pool is destroyed before
    /// or while waiting.
    pub async fn acquire(self: &Arc<Self>, bins: &BinSet, now: Instant) -> Result<FetchThrottler> {
        let mut waited = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register for the broadcast before checking, so that a release
            // between the check and the await is not missed.
            notified.as_mut().enable();

            {
                let now = if waited { Instant::now() } else { now };
                let mut state = self.state();
                if !state.alive {
                    return Err(ThrottleError::shutdown(&self.group));
                }

                let mut available = true;
                for name in bins {
                    let bin = state.bin_mut(name, now);
                    bin.touch(now);
                    available &= bin.has_capacity();
                }

                if available {
                    let mut byte_rate: Option<f64> = None;
                    for name in bins {
                        let bin = state.bin_mut(name, now);
                        bin.grant(now, waited);
                        let rate = bin.bytes_per_second();
                        byte_rate = Some(byte_rate.map_or(rate, |slowest| slowest.min(rate)));
                    }
                    debug!("Granted permit on {} {bins}", self.group);
                    return Ok(FetchThrottler::new(Arc::clone(self), bins.clone(), byte_rate));
                }

                if !waited {
                    debug!("Waiting for capacity on {} {bins}", self.group);
                }
            }

            waited = true;
            notified.await;
        }
    }

    /// Give back one permit on every bin in `bins` and wake all waiters.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvariantViolation`] if any bin has no permit
    /// outstanding; no counter is changed in that case.
    /// Returns [`ThrottleError::Shutdown`] if the pool has been destroyed.
    pub fn release(&self, bins: &BinSet, now: Instant) -> Result<()> {
        {
            let mut state = self.state();
            self.check_held(&state, bins)?;
            for name in bins {
                if let Some(bin) = state.bins.get_mut(name) {
                    let released = bin.release(now);
                    debug_assert!(released, "bin {name} was checked to hold a permit");
                }
            }
            debug!("Released permit on {} {bins}", self.group);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    fn check_held(&self, state: &PoolState, bins: &BinSet) -> Result<()> {
        if !state.alive {
            return Err(ThrottleError::shutdown(&self.group));
        }
        match state.first_unheld(bins) {
            Some(name) => Err(ThrottleError::invariant(
                &self.group,
                format!("no permit is held on bin `{name}`"),
            )),
            None => Ok(()),
        }
    }

    /// Recompute every bin's fair share from the current peer count.
    ///
    /// The peer count is fetched from the coordinator without holding the
    /// pool lock. If the coordinator fails, the previous count is kept and
    /// the pool carries on; the next poll tries again. Afterwards all
    /// waiters are woken, since a limit may have gone up.
    pub async fn poll(&self, now: Instant) {
        if !self.is_alive() {
            return;
        }
        let counted = self
            .coordinator
            .count_active_services(&self.service_type)
            .await;

        {
            let mut state = self.state();
            if !state.alive {
                return;
            }
            match counted {
                Ok(peers) => {
                    let peers = peers.max(1);
                    if peers != state.peers {
                        debug!(
                            "Throttle group {} is now shared by {peers} peers (was {})",
                            self.group, state.peers
                        );
                    }
                    state.peers = peers;
                }
                Err(e) => warn!(
                    "Cannot count peers of throttle group {}, keeping {} peers: {e}",
                    self.group, state.peers
                ),
            }

            let PoolState {
                spec, peers, bins, ..
            } = &mut *state;
            for bin in bins.values_mut() {
                bin.apply_share(spec, *peers, now);
                bin.refresh_window(now);
            }
        }
        self.changed.notify_waiters();
    }

    /// Evict bins that have no permit outstanding and have not been touched
    /// for the idle timeout. Returns the number of evicted bins.
    pub fn free_unused_resources(&self, now: Instant) -> usize {
        let mut state = self.state();
        if !state.alive {
            return 0;
        }
        state.evict_idle(now, self.idle_timeout)
    }

    /// Shut the pool down: evict idle bins, fail every waiter and every
    /// later call with [`ThrottleError::Shutdown`], and deregister from the
    /// coordinator. Deregistration is best effort. Calling this more than
    /// once has no further effect.
    pub async fn destroy(&self, now: Instant) {
        {
            let mut state = self.state();
            if !state.alive {
                return;
            }
            state.evict_idle(now, self.idle_timeout);
            state.alive = false;
        }
        self.changed.notify_waiters();

        if let Err(e) = self
            .coordinator
            .end_service_activity(&self.service_type, &self.service)
            .await
        {
            warn!(
                "Cannot deregister throttle group {} ({}): {e}",
                self.group, self.service
            );
        }
        info!("Destroyed pool of throttle group {}", self.group);
    }

    /// Charge `bytes` to every bin of a held permit and return the longest
    /// resulting pacing delay
    pub(crate) fn debit(&self, bins: &BinSet, bytes: u64, now: Instant) -> Result<Duration> {
        let mut state = self.state();
        self.check_held(&state, bins)?;
        let mut delay = Duration::ZERO;
        for name in bins {
            if let Some(bin) = state.bins.get_mut(name) {
                delay = delay.max(bin.debit(bytes, now));
            }
        }
        Ok(delay)
    }

    /// The fetch gates of every bin of a held permit
    pub(crate) fn fetch_gates(&self, bins: &BinSet) -> Result<Vec<FetchGate>> {
        let mut state = self.state();
        self.check_held(&state, bins)?;
        Ok(bins
            .iter()
            .filter_map(|name| state.bins.get_mut(name).and_then(Bin::fetch_gate))
            .collect())
    }

    /// The throttle group this pool serves
    #[must_use]
    pub const fn group(&self) -> &ThrottleGroup {
        &self.group
    }

    /// The handle this pool was registered under
    #[must_use]
    pub const fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Whether the pool has not been destroyed yet
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().alive
    }

    /// The peer count observed by the last successful poll
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state().peers
    }

    /// The spec currently in effect
    #[must_use]
    pub fn spec(&self) -> ThrottleSpec {
        self.state().spec.clone()
    }

    /// Number of bins currently tracked
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.state().bins.len()
    }

    /// Permits currently held against a bin, `None` if the bin is not tracked
    #[must_use]
    pub fn active_count(&self, bin: &BinName) -> Option<u32> {
        self.state().bins.get(bin).map(Bin::active)
    }

    /// The local connection limit of a bin, `None` if the bin is not tracked
    #[must_use]
    pub fn local_limit(&self, bin: &BinName) -> Option<u32> {
        self.state().bins.get(bin).map(Bin::local_limit)
    }

    /// Bytes charged to a bin since its window was last refreshed
    #[must_use]
    pub fn consumed_in_window(&self, bin: &BinName) -> Option<u64> {
        self.state().bins.get(bin).map(Bin::consumed_in_window)
    }

    /// Bytes a bin can still move at `now` without pacing
    #[must_use]
    pub fn remaining_in_window(&self, bin: &BinName, now: Instant) -> Option<f64> {
        self.state()
            .bins
            .get(bin)
            .map(|bin| bin.remaining_in_window(now))
    }

    /// Snapshot the statistics of every bin
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            peers: state.peers,
            bins: state
                .bins
                .iter()
                .map(|(name, bin)| (name.clone(), bin.stats()))
                .collect(),
        }
    }
}
