//! Absolute deadlines for multi-call transfers
//!
//! A deadline bounds a whole read or send loop, as opposed to the kernel's
//! per-call `SO_RCVTIMEO`/`SO_SNDTIMEO`. It is polled before each syscall,
//! so a call that is already blocked can overrun it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds since the Unix epoch
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// The real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Absolute point in time, or none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<u64>);

impl Deadline {
    /// Block indefinitely
    pub const NONE: Deadline = Deadline(None);

    /// Deadline at `millis` since the epoch; 0 means no deadline
    pub fn at_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::NONE
        } else {
            Deadline(Some(millis))
        }
    }

    /// Deadline `timeout` from now according to `clock`
    pub fn after<C: Clock + ?Sized>(timeout: Duration, clock: &C) -> Self {
        let at = clock
            .now_millis()
            .saturating_add(timeout.as_millis() as u64);
        Self::at_millis(at.max(1))
    }

    /// Milliseconds since the epoch, 0 for none
    pub fn as_millis(&self) -> u64 {
        self.0.unwrap_or(0)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// True once the clock is strictly past the deadline
    pub fn has_passed<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        match self.0 {
            Some(at) => clock.now_millis() > at,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_means_none() {
        assert_eq!(Deadline::at_millis(0), Deadline::NONE);
        assert!(Deadline::at_millis(0).is_none());
        assert_eq!(Deadline::NONE.as_millis(), 0);
    }

    #[test]
    fn test_none_never_passes() {
        let clock = ManualClock::new(u64::MAX);
        assert!(!Deadline::NONE.has_passed(&clock));
    }

    #[test]
    fn test_passes_strictly_after() {
        let clock = ManualClock::new(1_000);
        let deadline = Deadline::at_millis(1_000);
        assert!(!deadline.has_passed(&clock));
        clock.advance(Duration::from_millis(1));
        assert!(deadline.has_passed(&clock));
    }

    #[test]
    fn test_after_is_relative_to_clock() {
        let clock = ManualClock::new(5_000);
        let deadline = Deadline::after(Duration::from_millis(250), &clock);
        assert_eq!(deadline.as_millis(), 5_250);
        clock.set(5_251);
        assert!(deadline.has_passed(&clock));
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
