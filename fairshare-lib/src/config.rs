use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::{BinName, Result, ThrottleError};

/// Default interval between two rebalancing passes
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default time an unused bin is kept around before it is evicted
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cluster-wide limits for one throttle group.
///
/// The limits are global: each cluster member enforces its fair share of
/// them, which is the limit divided by the number of members currently
/// throttling the same group. Bins may override any of the group values.
///
/// A spec is an immutable snapshot. Handing a different spec to the
/// throttler replaces the group's current one; bins that already exist pick
/// up the new limits on the next poll.
///
/// # Examples
///
/// ```
/// use fairshare_lib::{BinLimits, ThrottleSpec};
///
/// let spec = ThrottleSpec::new(8, 1024 * 1024)
///     .bin("slow.example", BinLimits::default().max_connections(2));
/// assert!(spec.validate().is_ok());
/// assert_eq!(spec.max_connections_for(&"slow.example".into()), 2);
/// assert_eq!(spec.max_connections_for(&"fast.example".into()), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleSpec {
    /// Maximum simultaneous connections per bin across the cluster
    pub max_connections: u32,

    /// Maximum bytes per second per bin across the cluster
    pub max_bytes_per_second: u64,

    /// Minimum interval between two fetches from a bin across the cluster
    #[serde(default, with = "humantime_serde")]
    pub min_fetch_interval: Option<Duration>,

    /// Per-bin overrides of the group limits
    #[serde(default)]
    pub bins: HashMap<BinName, BinLimits>,
}

impl ThrottleSpec {
    /// Create a spec with the given connection and byte-rate limits
    #[must_use]
    pub fn new(max_connections: u32, max_bytes_per_second: u64) -> Self {
        Self {
            max_connections,
            max_bytes_per_second,
            min_fetch_interval: None,
            bins: HashMap::new(),
        }
    }

    /// Builder-style: set the minimum interval between fetches
    #[must_use]
    pub const fn min_fetch_interval(mut self, interval: Duration) -> Self {
        self.min_fetch_interval = Some(interval);
        self
    }

    /// Builder-style: override the limits of a single bin
    #[must_use]
    pub fn bin(mut self, name: impl Into<BinName>, limits: BinLimits) -> Self {
        self.bins.insert(name.into(), limits);
        self
    }

    /// Reject non-positive limits.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Configuration`] naming the first offending
    /// limit.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ThrottleError::configuration(
                "max_connections must be positive",
            ));
        }
        if self.max_bytes_per_second == 0 {
            return Err(ThrottleError::configuration(
                "max_bytes_per_second must be positive",
            ));
        }
        if self.min_fetch_interval.is_some_and(|i| i.is_zero()) {
            return Err(ThrottleError::configuration(
                "min_fetch_interval must not be zero",
            ));
        }
        for (name, limits) in &self.bins {
            limits.validate().map_err(|reason| {
                ThrottleError::configuration(format!("bin `{name}`: {reason}"))
            })?;
        }
        Ok(())
    }

    /// Get the effective connection limit of a bin
    #[must_use]
    pub fn max_connections_for(&self, bin: &BinName) -> u32 {
        self.bins
            .get(bin)
            .and_then(|limits| limits.max_connections)
            .unwrap_or(self.max_connections)
    }

    /// Get the effective byte rate of a bin
    #[must_use]
    pub fn max_bytes_per_second_for(&self, bin: &BinName) -> u64 {
        self.bins
            .get(bin)
            .and_then(|limits| limits.max_bytes_per_second)
            .unwrap_or(self.max_bytes_per_second)
    }

    /// Get the effective fetch interval of a bin, if fetches are paced at all
    #[must_use]
    pub fn min_fetch_interval_for(&self, bin: &BinName) -> Option<Duration> {
        self.bins
            .get(bin)
            .and_then(|limits| limits.min_fetch_interval)
            .or(self.min_fetch_interval)
    }
}

/// Overrides of the group limits for a specific bin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinLimits {
    /// Maximum simultaneous connections to this bin across the cluster
    pub max_connections: Option<u32>,

    /// Maximum bytes per second for this bin across the cluster
    pub max_bytes_per_second: Option<u64>,

    /// Minimum interval between fetches from this bin across the cluster
    #[serde(default, with = "humantime_serde")]
    pub min_fetch_interval: Option<Duration>,
}

impl BinLimits {
    /// Builder-style: set the connection limit
    #[must_use]
    pub const fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Builder-style: set the byte rate
    #[must_use]
    pub const fn max_bytes_per_second(mut self, max_bytes_per_second: u64) -> Self {
        self.max_bytes_per_second = Some(max_bytes_per_second);
        self
    }

    /// Builder-style: set the fetch interval
    #[must_use]
    pub const fn min_fetch_interval(mut self, interval: Duration) -> Self {
        self.min_fetch_interval = Some(interval);
        self
    }

    fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be positive");
        }
        if self.max_bytes_per_second == Some(0) {
            return Err("max_bytes_per_second must be positive");
        }
        if self.min_fetch_interval.is_some_and(|i| i.is_zero()) {
            return Err("min_fetch_interval must not be zero");
        }
        Ok(())
    }
}

/// Settings of a [`crate::Throttler`] itself, independent of any group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct ThrottlerConfig {
    /// How often the poll driver rebalances fair shares
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,

    /// How long an unused bin is kept before it is evicted
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    #[builder(default = DEFAULT_IDLE_TIMEOUT)]
    pub idle_timeout: Duration,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Default interval between two rebalancing passes
const fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

/// Default time an unused bin is kept around
const fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}
