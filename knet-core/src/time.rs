use std::fmt::Debug;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Abstracts the wall clock so the heartbeat/link-timeout logic can be
/// driven deterministically in tests instead of racing the real clock.
pub trait TimeProvider: Debug + Send + Sync {
    fn now(&self) -> Instant;
}

/// The production time source: the OS monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually-advanced clock for deterministic tests of the link state
/// machine and heartbeat timing.
#[derive(Debug)]
pub struct ManualTimeProvider {
    instant: RwLock<Instant>,
}

impl ManualTimeProvider {
    pub fn new(instant: Instant) -> Self {
        Self {
            instant: RwLock::new(instant),
        }
    }

    pub fn set(&self, instant: Instant) {
        *self.instant.write() = instant;
    }

    pub fn advance(&self, duration: Duration) {
        let mut guard = self.instant.write();
        *guard += duration;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Instant {
        *self.instant.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_told() {
        let start = Instant::now();
        let clock = ManualTimeProvider::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }
}
