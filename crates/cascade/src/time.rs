use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A trait for time sources that return a wall-clock aligned timestamp in
/// milliseconds.
///
/// This abstraction allows you to plug in a real clock or a mocked time
/// source in tests. Task allocation dates and client keep-alives are read
/// from it.
///
/// # Example
///
/// ```
/// use cascade::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> u64;
}

/// A monotonic time source anchored to the Unix epoch.
///
/// The wall-clock offset is captured once at construction; afterwards time
/// only advances with the monotonic [`Instant`] so that NTP adjustments can
/// never make an allocation date go backwards.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    start: Instant,
    epoch_offset: u64, // in milliseconds
}

impl Default for MonotonicClock {
    fn default() -> Self {
        let offset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self {
            start: Instant::now(),
            epoch_offset: offset,
        }
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.epoch_offset + self.start.elapsed().as_millis() as u64
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.current_millis();
        for _ in 0..1000 {
            let now = clock.current_millis();
            assert!(now >= last);
            last = now;
        }
    }
}
