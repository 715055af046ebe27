//! Publish pacing for load-test publishers.
//!
//! A [`Pacer`] turns `{repeat_count, repeat_delay}` into a finite sequence of
//! fire signals. Each signal is due at `start + i * delay`, computed from the
//! instant the pacer was created, so processing overhead between fires does
//! not accumulate into drift over long runs.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Paces a finite sequence of fire signals to a fixed interval.
///
/// A zero interval disables throttling entirely: every signal is already due
/// and [`Pacer::next_fire`] returns without suspending.
#[derive(Debug)]
pub struct Pacer {
    /// Wall-clock anchor all due times are computed from
    start: Instant,
    interval: Duration,
    count: u64,
    fired: u64,
}

impl Pacer {
    /// Create a pacer that fires `count` times, `interval` apart, starting now.
    pub fn new(count: u64, interval: Duration) -> Self {
        Self {
            start: Instant::now(),
            interval,
            count,
            fired: 0,
        }
    }

    /// The instant signal `index` is due.
    ///
    /// Due times are absolute offsets from the pacer's start, not relative to
    /// the previous fire. A signal whose due time has already passed fires
    /// immediately.
    pub fn due_at(&self, index: u64) -> Instant {
        self.start + offset(self.interval, index)
    }

    /// Number of signals not yet fired.
    pub fn remaining(&self) -> u64 {
        self.count - self.fired
    }

    /// Wait for the next fire signal and return its sequence number.
    ///
    /// Returns `None` once all `count` signals have fired.
    pub async fn next_fire(&mut self) -> Option<u64> {
        if self.fired >= self.count {
            return None;
        }
        let seq = self.fired;
        if !self.interval.is_zero() {
            sleep_until(self.due_at(seq)).await;
        }
        self.fired += 1;
        Some(seq)
    }
}

/// Offset of signal `index` from the start instant.
fn offset(interval: Duration, index: u64) -> Duration {
    Duration::from_nanos((interval.as_nanos() as u64).saturating_mul(index))
}
