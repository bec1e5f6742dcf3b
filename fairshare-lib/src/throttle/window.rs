use std::time::Duration;
use tokio::time::Instant;

/// Longest delay a single bin ever imposes; larger debts are forgiven
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(u32::MAX as u64);

/// The byte budget of one bin.
///
/// A token bucket holding at most one second worth of bytes, refilled
/// continuously at the bin's fair-share rate. Debits may drive the bucket
/// into debt; the debt tells the caller how long to wait before the bytes
/// it just moved are paid for. Independently, the window counts the bytes
/// consumed since it was last refreshed by a poll.
#[derive(Debug, Clone)]
pub(crate) struct RateWindow {
    bytes_per_second: f64,
    tokens: f64,
    last_refill: Instant,
    window_start: Instant,
    consumed: u64,
}

impl RateWindow {
    /// Create a full bucket for the given rate
    pub(crate) fn new(bytes_per_second: f64, now: Instant) -> Self {
        Self {
            bytes_per_second,
            tokens: bytes_per_second,
            last_refill: now,
            window_start: now,
            consumed: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.bytes_per_second).min(self.bytes_per_second);
        self.last_refill = now;
    }

    /// Debit `bytes` and return how long the caller has to wait until the
    /// bucket is out of debt again
    pub(crate) fn debit(&mut self, bytes: u64, now: Instant) -> Duration {
        self.refill(now);
        #[allow(clippy::cast_precision_loss)]
        let bytes_f = bytes as f64;
        let max_debt = MAX_DELAY.as_secs_f64() * self.bytes_per_second;
        self.tokens = (self.tokens - bytes_f).max(-max_debt);
        self.consumed = self.consumed.saturating_add(bytes);

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-self.tokens / self.bytes_per_second)
                .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
        }
    }

    /// Switch to a new rate. Bytes already in the bucket are kept, up to
    /// the new capacity; an outstanding debt is kept as is.
    pub(crate) fn set_rate(&mut self, bytes_per_second: f64, now: Instant) {
        self.refill(now);
        self.bytes_per_second = bytes_per_second;
        self.tokens = self.tokens.min(bytes_per_second);
    }

    /// Start a new accounting window
    pub(crate) fn refresh(&mut self, now: Instant) {
        self.window_start = now;
        self.consumed = 0;
    }

    /// Bytes that can still be moved at `now` without waiting
    pub(crate) fn remaining(&self, now: Instant) -> f64 {
        let elapsed = now
            .saturating_duration_since(self.last_refill)
            .as_secs_f64();
        (self.tokens + elapsed * self.bytes_per_second)
            .min(self.bytes_per_second)
            .max(0.0)
    }

    pub(crate) const fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    /// Bytes debited since the window was last refreshed
    pub(crate) const fn consumed(&self) -> u64 {
        self.consumed
    }

    pub(crate) const fn window_start(&self) -> Instant {
        self.window_start
    }
}
