//! Injected time source for deadline windows

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// True once `window_secs` have passed since `since`
pub fn window_elapsed(clock: &dyn Clock, since: DateTime<Utc>, window_secs: u64) -> bool {
    let Some(window) = i64::try_from(window_secs).ok().and_then(Duration::try_seconds) else {
        return false;
    };
    match since.checked_add_signed(window) {
        Some(deadline) => clock.now() >= deadline,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_window() {
        let clock = ManualClock::default();
        let start = clock.now();
        assert!(!window_elapsed(&clock, start, 60));

        clock.advance(Duration::seconds(59));
        assert!(!window_elapsed(&clock, start, 60));

        clock.advance(Duration::seconds(1));
        assert!(window_elapsed(&clock, start, 60));
    }

    #[test]
    fn test_huge_window_never_elapses() {
        let clock = ManualClock::default();
        assert!(!window_elapsed(&clock, clock.now(), u64::MAX));
    }
}
