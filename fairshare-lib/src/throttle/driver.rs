use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::throttler::Throttler;

/// Lower bound for the poll period, so that a zero interval cannot spin
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Background task that periodically rebalances a [`Throttler`] and evicts
/// its idle bins.
///
/// The task runs [`Throttler::poll`] followed by
/// [`Throttler::free_unused_resources`] once per
/// [`crate::ThrottlerConfig::poll_interval`]. A slow poll delays the next one
/// instead of triggering a burst of catch-up polls.
///
/// Dropping the driver stops the task as well, but only
/// [`PollDriver::shutdown`] waits for a running poll to finish.
#[derive(Debug)]
pub struct PollDriver {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollDriver {
    /// Start polling `throttler` on the current tokio runtime
    #[must_use]
    pub fn spawn(throttler: Arc<Throttler>) -> Self {
        let period = throttler.config().poll_interval.max(MIN_POLL_INTERVAL);
        let (shutdown, mut stop) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the pools were just sized
            ticks.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    now = ticks.tick() => {
                        throttler.poll(now).await;
                        let freed = throttler.free_unused_resources(now);
                        if freed > 0 {
                            debug!("Freed {freed} idle bins");
                        }
                    }
                }
            }
            debug!("Poll driver stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop polling and wait for the task to finish
    pub async fn shutdown(self) {
        if self.shutdown.send(()).is_err() {
            debug!("Poll driver already stopped");
        }
        if let Err(e) = self.handle.await {
            warn!("Poll driver failed: {e}");
        }
    }
}
