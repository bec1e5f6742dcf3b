//! `fairshare` throttles access to shared resources across a cluster.
//!
//! Every cluster member runs its own [`Throttler`]. Members throttling the
//! same group find each other through a [`Coordinator`] and each enforces
//! its fair share of the group's global limits: connection count, byte rate
//! and, optionally, the interval between fetches.
//!
//! ```
//! use std::sync::Arc;
//! use fairshare_lib::{
//!     BinSet, MemoryCoordinator, Result, ThrottleGroup, ThrottleSpec, Throttler,
//!     ThrottlerConfig,
//! };
//! use tokio::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let throttler = Throttler::new(Arc::new(MemoryCoordinator::new()), ThrottlerConfig::default());
//!     let group = ThrottleGroup::from("downloads");
//!     let spec = ThrottleSpec::new(4, 1024 * 1024);
//!     let bins: BinSet = ["mirror.example.com"].into_iter().collect();
//!
//!     let permit = throttler
//!         .obtain_connection_permission(&group, &spec, &bins, Instant::now())
//!         .await?;
//!     permit.obtain_fetch_permission().await?;
//!     permit.throttle(64 * 1024, Instant::now()).await?;
//!     throttler.release_connection_permission(&group, &spec, &bins, Instant::now())?;
//!
//!     throttler.destroy(Instant::now()).await;
//!     Ok(())
//! }
//! ```
//!
//! In a long-running process, hand the throttler to a [`PollDriver`] so that
//! the fair shares follow the cluster as members come and go.

// The `test-utils` macros name this crate by its external path
#[cfg(test)]
extern crate self as fairshare_lib;

mod config;
mod types;

pub mod coordinator;
pub mod throttle;

#[cfg(test)]
mod test_utils;

pub use config::{BinLimits, ThrottleSpec, ThrottlerConfig};
pub use coordinator::{Coordinator, MemoryCoordinator, ServiceHandle};
pub use throttle::{
    AlwaysValid, BinStats, FetchThrottler, GroupValidator, PollDriver, Pool, PoolStats, Throttler,
    fair_share,
};
pub use types::*;
