use core::{num::NonZero, time::Duration};

use tokio::time::Instant;

/// Launch schedule for a fixed rate.
///
/// Item `i` is due exactly `i / rate` seconds after the pacer was started.
/// Deadlines are computed from the start time rather than accumulated, so a
/// late wake-up does not push back every following launch.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    start: Instant,
    rate: NonZero<u32>,
}

impl Pacer {
    #[inline]
    pub fn new(rate: NonZero<u32>) -> Self {
        Self::with_start(rate, Instant::now())
    }

    #[inline]
    pub const fn with_start(rate: NonZero<u32>, start: Instant) -> Self {
        Self { start, rate }
    }

    #[inline]
    pub const fn start(&self) -> Instant {
        self.start
    }

    /// Returns the nominal spacing between two launches.
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate.get()
    }

    /// Returns the offset from start at which item `idx` becomes due.
    #[inline]
    pub fn offset(&self, idx: u64) -> Duration {
        let nanos = idx as u128 * 1_000_000_000 / self.rate.get() as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    #[inline]
    pub fn deadline(&self, idx: u64) -> Instant {
        self.start + self.offset(idx)
    }

    /// Suspends until item `idx` is due.
    #[inline]
    pub async fn wait(&self, idx: u64) {
        tokio::time::sleep_until(self.deadline(idx)).await;
    }
}
