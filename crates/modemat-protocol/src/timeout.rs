//! AT timeout bookkeeping.
//!
//! A sticky timeout replaces both the current and the fallback value. A
//! one-shot timeout replaces only the current value; `restore` brings the
//! fallback back.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutState {
    current: Duration,
    previous: Duration,
}

impl TimeoutState {
    pub fn new(timeout: Duration) -> Self {
        Self {
            current: timeout,
            previous: timeout,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn set(&mut self, timeout: Duration, sticky: bool) {
        if sticky {
            self.current = timeout;
            self.previous = timeout;
        } else if timeout != self.current {
            self.previous = self.current;
            self.current = timeout;
        }
    }

    pub fn restore(&mut self) {
        self.current = self.previous;
    }
}

/// Start of the current wait window.
///
/// The deadline is derived from the start instant and the *current* timeout
/// each time it is asked for, so changing the timeout mid-sequence moves the
/// deadline of the waits that follow.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    started: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.started + timeout
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self, timeout: Duration) -> Duration {
        self.deadline(timeout).saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS_100: Duration = Duration::from_millis(100);
    const MS_500: Duration = Duration::from_millis(500);

    #[test]
    fn test_one_shot_restores_previous() {
        let mut timeout = TimeoutState::new(MS_100);
        timeout.set(MS_500, false);
        assert_eq!(timeout.current(), MS_500);

        timeout.restore();
        assert_eq!(timeout.current(), MS_100);
    }

    #[test]
    fn test_sticky_survives_restore() {
        let mut timeout = TimeoutState::new(MS_100);
        timeout.set(MS_500, true);
        timeout.restore();
        assert_eq!(timeout.current(), MS_500);
    }

    #[test]
    fn test_repeated_one_shot_keeps_fallback() {
        let mut timeout = TimeoutState::new(MS_100);
        timeout.set(MS_500, false);
        timeout.set(MS_500, false);
        timeout.restore();
        assert_eq!(timeout.current(), MS_100);
    }

    #[test]
    fn test_clock_remaining_saturates() {
        let clock = Clock::start();
        assert!(clock.remaining(MS_100) <= MS_100);
        assert_eq!(clock.remaining(Duration::ZERO), Duration::ZERO);
    }
}
