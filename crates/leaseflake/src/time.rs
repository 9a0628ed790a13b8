use std::time::{Instant, SystemTime};

/// A source of the current time used by a [`Node`](crate::Node).
///
/// This abstraction allows you to plug in the wall clock, a monotonic timer,
/// or a scripted time source in tests.
///
/// # Example
///
/// ```
/// use std::time::{Duration, SystemTime, UNIX_EPOCH};
/// use leaseflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn now(&self) -> SystemTime {
///         UNIX_EPOCH + Duration::from_secs(1_700_000_000)
///     }
/// }
///
/// assert_eq!(
///     FixedTime.now(),
///     UNIX_EPOCH + Duration::from_secs(1_700_000_000)
/// );
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> SystemTime;
}

/// The system wall clock.
///
/// Wall time can move backwards (NTP corrections, manual changes). Nodes
/// handle that according to their `safe` flag.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A time source that never goes backwards.
///
/// The clock samples `SystemTime::now()` once at construction and afterwards
/// advances by the elapsed monotonic time measured with [`Instant`]. This
/// avoids wall-clock adjustments while keeping timestamps aligned to real
/// time at startup.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    anchor_wall: SystemTime,
    anchor: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: SystemTime::now(),
            anchor: Instant::now(),
        }
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> SystemTime {
        self.anchor_wall + self.anchor.elapsed()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1_000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn monotonic_clock_tracks_wall_time_at_start() {
        let clock = MonotonicClock::new();
        let wall = SystemTime::now();
        let drift = match wall.duration_since(clock.now()) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        assert!(drift < Duration::from_secs(1));
    }
}
