//! Receive timestamps.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Hands out strictly increasing receive timestamps.
///
/// Follows the wall clock, but never repeats or goes back, even if the
/// system clock is stepped or two connections finish in the same tick.
#[derive(Debug, Default)]
pub struct ReceiveClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ReceiveClock {
    /// Creates a clock with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        self.next_after(Utc::now())
    }

    fn next_after(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let stamp = match *last {
            Some(prev) if wall <= prev => prev + TimeDelta::microseconds(1),
            _ => wall,
        };
        *last = Some(stamp);
        stamp
    }
}
