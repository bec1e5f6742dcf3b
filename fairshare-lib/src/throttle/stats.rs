use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::BinName;

/// Record and report statistics for one bin of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BinStats {
    /// Permits currently held against the bin
    pub active: u32,
    /// The bin's current fair-share connection limit
    pub local_limit: u32,
    /// The bin's current fair-share byte rate
    pub bytes_per_second: f64,
    /// Total permits granted
    pub permits_granted: u64,
    /// Permits that could not be granted right away and had to wait
    pub contended_permits: u64,
    /// Total permits released
    pub permits_released: u64,
    /// Bytes paced through the bin's rate window
    pub bytes_throttled: u64,
    /// Total pacing delay imposed on callers
    #[serde(with = "humantime_serde")]
    pub throttle_delay: Duration,
    /// Fetches that asked for permission
    pub fetches: u64,
}

impl BinStats {
    pub(crate) const fn record_grant(&mut self, waited: bool) {
        self.permits_granted += 1;
        if waited {
            self.contended_permits += 1;
        }
    }

    pub(crate) const fn record_release(&mut self) {
        self.permits_released += 1;
    }

    pub(crate) fn record_throttle(&mut self, bytes: u64, delay: Duration) {
        self.bytes_throttled = self.bytes_throttled.saturating_add(bytes);
        self.throttle_delay = self.throttle_delay.saturating_add(delay);
    }

    pub(crate) const fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    /// Share of granted permits that had to wait (0.0 to 1.0)
    #[must_use]
    pub fn contention_rate(&self) -> f64 {
        if self.permits_granted == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.contended_permits as f64 / self.permits_granted as f64;
            rate
        }
    }

    /// Get human-readable summary of the stats
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let contention_pct = (self.contention_rate() * 100.0) as u64;
        format!(
            "{}/{} active, {} permits ({}% contended), {} bytes, {}ms paced",
            self.active,
            self.local_limit,
            self.permits_granted,
            contention_pct,
            self.bytes_throttled,
            self.throttle_delay.as_millis()
        )
    }
}

/// Snapshot of one pool: the peer count it last observed and its bins
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Cluster members throttling the group, including this one
    pub peers: usize,
    /// Statistics per bin
    pub bins: BTreeMap<BinName, BinStats>,
}

impl PoolStats {
    /// Bins sorted by permits granted (descending order)
    #[must_use]
    pub fn busiest(&self) -> Vec<(&BinName, &BinStats)> {
        let mut sorted: Vec<_> = self.bins.iter().collect();
        sorted.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.permits_granted));
        sorted
    }
}
