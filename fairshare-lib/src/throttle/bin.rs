use std::time::Duration;
use tokio::time::Instant;

use super::fetch_gate::FetchGate;
use super::stats::BinStats;
use super::window::RateWindow;
use crate::{BinName, ThrottleSpec};

/// The fair share of a cluster-wide connection limit: the limit divided by
/// the number of peers, rounded up, and never less than one.
#[must_use]
pub fn fair_share(global_limit: u32, peers: usize) -> u32 {
    let peers = u64::try_from(peers.max(1)).unwrap_or(u64::MAX);
    let share = u64::from(global_limit).div_ceil(peers).max(1);
    u32::try_from(share).unwrap_or(u32::MAX)
}

/// The fair share of a cluster-wide byte rate
fn fair_byte_rate(global_rate: u64, peers: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let rate = global_rate as f64 / peers.max(1) as f64;
    rate
}

/// Local bookkeeping for one named sub-resource of a pool.
///
/// Each bin maintains:
/// - the number of permits currently held against it
/// - its fair-share connection limit
/// - a byte-rate window refilled at its fair-share rate
/// - an optional fetch gate
/// - statistics
#[derive(Debug)]
pub(crate) struct Bin {
    name: BinName,
    active: u32,
    local_limit: u32,
    window: RateWindow,
    fetch_gate: Option<FetchGate>,
    last_touched: Instant,
    stats: BinStats,
}

impl Bin {
    /// Create an idle bin whose limits are the current fair share of `spec`
    pub(crate) fn new(name: BinName, spec: &ThrottleSpec, peers: usize, now: Instant) -> Self {
        let local_limit = fair_share(spec.max_connections_for(&name), peers);
        let window = RateWindow::new(
            fair_byte_rate(spec.max_bytes_per_second_for(&name), peers),
            now,
        );
        let fetch_gate = spec
            .min_fetch_interval_for(&name)
            .and_then(|interval| FetchGate::for_share(interval, peers));

        Self {
            name,
            active: 0,
            local_limit,
            window,
            fetch_gate,
            last_touched: now,
            stats: BinStats::default(),
        }
    }

    /// Recompute the local limits from `spec` for the given number of peers.
    ///
    /// Permits granted above a lowered limit are left alone; they drain
    /// through normal releases.
    pub(crate) fn apply_share(&mut self, spec: &ThrottleSpec, peers: usize, now: Instant) {
        let local_limit = fair_share(spec.max_connections_for(&self.name), peers);
        if local_limit != self.local_limit {
            log::debug!(
                "Bin {} limit {} -> {} ({} peers, {} active)",
                self.name,
                self.local_limit,
                local_limit,
                peers,
                self.active
            );
            self.local_limit = local_limit;
        }

        let rate = fair_byte_rate(spec.max_bytes_per_second_for(&self.name), peers);
        #[allow(clippy::float_cmp)]
        let rate_changed = rate != self.window.bytes_per_second();
        if rate_changed {
            self.window.set_rate(rate, now);
        }

        let gate = spec
            .min_fetch_interval_for(&self.name)
            .and_then(|interval| FetchGate::for_share(interval, peers));
        if gate.as_ref().map(FetchGate::interval) != self.fetch_gate.as_ref().map(FetchGate::interval)
        {
            self.fetch_gate = gate;
        }
    }

    pub(crate) const fn has_capacity(&self) -> bool {
        self.active < self.local_limit
    }

    pub(crate) const fn touch(&mut self, now: Instant) {
        self.last_touched = now;
    }

    pub(crate) const fn grant(&mut self, now: Instant, waited: bool) {
        self.active += 1;
        self.last_touched = now;
        self.stats.record_grant(waited);
    }

    /// Give back one permit; `false` if the bin had none outstanding
    #[must_use]
    pub(crate) const fn release(&mut self, now: Instant) -> bool {
        if self.active == 0 {
            return false;
        }
        self.active -= 1;
        self.last_touched = now;
        self.stats.record_release();
        true
    }

    /// Charge `bytes` to the rate window and return the pacing delay
    pub(crate) fn debit(&mut self, bytes: u64, now: Instant) -> Duration {
        let delay = self.window.debit(bytes, now);
        self.last_touched = now;
        self.stats.record_throttle(bytes, delay);
        delay
    }

    pub(crate) fn fetch_gate(&mut self) -> Option<FetchGate> {
        self.stats.record_fetch();
        self.fetch_gate.clone()
    }

    pub(crate) fn refresh_window(&mut self, now: Instant) {
        self.window.refresh(now);
    }

    /// Unused and untouched for at least `idle_timeout`
    pub(crate) fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.active == 0 && now.saturating_duration_since(self.last_touched) >= idle_timeout
    }

    pub(crate) const fn active(&self) -> u32 {
        self.active
    }

    pub(crate) const fn local_limit(&self) -> u32 {
        self.local_limit
    }

    pub(crate) const fn bytes_per_second(&self) -> f64 {
        self.window.bytes_per_second()
    }

    pub(crate) const fn consumed_in_window(&self) -> u64 {
        self.window.consumed()
    }

    pub(crate) fn remaining_in_window(&self, now: Instant) -> f64 {
        self.window.remaining(now)
    }

    pub(crate) fn stats(&self) -> BinStats {
        BinStats {
            active: self.active,
            local_limit: self.local_limit,
            bytes_per_second: self.window.bytes_per_second(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinLimits;
    use rstest::rstest;

    #[rstest]
    #[case(2, 1, 2)]
    #[case(2, 2, 1)]
    #[case(10, 3, 4)]
    #[case(1, 50, 1)]
    #[case(7, 0, 7)]
    #[case(0, 4, 1)]
    fn test_fair_share(#[case] global: u32, #[case] peers: usize, #[case] expected: u32) {
        assert_eq!(fair_share(global, peers), expected);
    }

    #[test]
    fn test_fair_share_never_below_one() {
        for global in 1..20 {
            for peers in 1..100 {
                assert!(fair_share(global, peers) >= 1);
            }
        }
    }

    #[test]
    fn test_new_bin_uses_fair_share() {
        let now = Instant::now();
        let spec = ThrottleSpec::new(4, 1000);
        let bin = Bin::new(BinName::from("host"), &spec, 2, now);

        assert_eq!(bin.active(), 0);
        assert_eq!(bin.local_limit(), 2);
        assert!((bin.bytes_per_second() - 500.0).abs() < f64::EPSILON);
        assert!(bin.fetch_gate.is_none());
    }

    #[test]
    fn test_bin_override_applies() {
        let now = Instant::now();
        let spec = ThrottleSpec::new(4, 1000).bin("slow", BinLimits::default().max_connections(1));
        let bin = Bin::new(BinName::from("slow"), &spec, 3, now);
        assert_eq!(bin.local_limit(), 1);
    }

    #[test]
    fn test_grant_and_release() {
        let now = Instant::now();
        let spec = ThrottleSpec::new(1, 1000);
        let mut bin = Bin::new(BinName::from("host"), &spec, 1, now);

        assert!(bin.has_capacity());
        bin.grant(now, false);
        assert!(!bin.has_capacity());

        assert!(bin.release(now));
        assert!(!bin.release(now));
        assert_eq!(bin.active(), 0);
        assert_eq!(bin.stats().permits_released, 1);
    }

    #[test]
    fn test_lowering_limit_keeps_existing_permits() {
        let now = Instant::now();
        let spec = ThrottleSpec::new(2, 1000);
        let mut bin = Bin::new(BinName::from("host"), &spec, 1, now);
        bin.grant(now, false);
        bin.grant(now, false);

        bin.apply_share(&spec, 2, now);
        assert_eq!(bin.local_limit(), 1);
        assert_eq!(bin.active(), 2);
        assert!(!bin.has_capacity());

        assert!(bin.release(now));
        assert!(!bin.has_capacity());
        assert!(bin.release(now));
        assert!(bin.has_capacity());
    }

    #[test]
    fn test_fetch_gate_follows_peer_count() {
        let now = Instant::now();
        let spec = ThrottleSpec::new(2, 1000).min_fetch_interval(Duration::from_millis(10));
        let mut bin = Bin::new(BinName::from("host"), &spec, 1, now);
        assert_eq!(
            bin.fetch_gate.as_ref().map(FetchGate::interval),
            Some(Duration::from_millis(10))
        );

        bin.apply_share(&spec, 4, now);
        assert_eq!(
            bin.fetch_gate.as_ref().map(FetchGate::interval),
            Some(Duration::from_millis(40))
        );

        bin.apply_share(&ThrottleSpec::new(2, 1000), 4, now);
        assert!(bin.fetch_gate.is_none());
    }

    #[test]
    fn test_idle_detection() {
        let start = Instant::now();
        let spec = ThrottleSpec::new(2, 1000);
        let mut bin = Bin::new(BinName::from("host"), &spec, 1, start);
        let timeout = Duration::from_secs(30);

        assert!(!bin.is_idle(start + Duration::from_secs(29), timeout));
        assert!(bin.is_idle(start + Duration::from_secs(30), timeout));

        bin.grant(start, false);
        assert!(!bin.is_idle(start + Duration::from_secs(3600), timeout));
    }
}
