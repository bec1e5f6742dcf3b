//! Fair-share throttling of connections, byte rates and fetch frequency.
//!
//! A [`Throttler`] keeps one [`Pool`] per throttle group. Each pool tracks
//! bins lazily and sizes their limits to this member's share of the
//! cluster-wide limits, which [`Pool::poll`] keeps current.
//!
//! The byte-rate window is a token bucket which may go into debt: a large
//! transfer is admitted at once and the following callers pay for it with a
//! pacing delay. The fetch gate is backed by `governor`.

mod bin;
mod driver;
mod fetch;
mod fetch_gate;
mod pool;
mod stats;
mod throttler;
mod window;

pub use bin::fair_share;
pub use driver::PollDriver;
pub use fetch::FetchThrottler;
pub use pool::Pool;
pub use stats::{BinStats, PoolStats};
pub use throttler::{AlwaysValid, GroupValidator, Throttler};
