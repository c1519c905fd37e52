use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current protocol time, in ticks.
pub trait Clock {
    fn now(&self) -> u64;
}

/// A manually advanced tick counter. Clones share the same counter, so one
/// driver can advance the time seen by many nodes.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    ticks: Arc<AtomicU64>,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances by one tick and returns the new time.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set(&self, now: u64) {
        self.ticks.store(now, Ordering::SeqCst);
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// Wall-clock ticks of a fixed length, counted from construction.
#[derive(Debug, Clone)]
pub struct IntervalClock {
    started: Instant,
    tick: Duration,
}

impl IntervalClock {
    pub fn new(tick: Duration) -> Self {
        Self {
            started: Instant::now(),
            // a zero tick would divide by zero
            tick: tick.max(Duration::from_millis(1)),
        }
    }
}

impl Clock for IntervalClock {
    fn now(&self) -> u64 {
        (self.started.elapsed().as_nanos() / self.tick.as_nanos()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_clock_is_shared_between_clones() {
        let clock = TickClock::new();
        let view = clock.clone();

        assert_eq!(view.now(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(view.now(), 2);

        clock.set(40);
        assert_eq!(view.now(), 40);
    }

    #[test]
    fn test_interval_clock_starts_at_zero_and_advances() {
        let clock = IntervalClock::new(Duration::from_millis(5));
        assert_eq!(clock.now(), 0);
        std::thread::sleep(Duration::from_millis(12));
        assert!(clock.now() >= 2);
    }
}
