// lamport_runner/src/clock.rs
//! Lamport clock update rules.
//!
//! The scheduler is the only writer, so the clock is a plain value with no
//! interior synchronization.

/// Clock value before and after one local event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTransition {
    pub old: u64,
    pub new: u64,
}

impl ClockTransition {
    pub fn jump(&self) -> u64 {
        self.new - self.old
    }
}

#[derive(Debug, Default, Clone)]
pub struct LamportClock {
    value: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Local event with no communication.
    pub fn internal(&mut self) -> ClockTransition {
        self.advance_to(self.value + 1)
    }

    /// Applied once per send action, before any bytes go out, however many
    /// recipients the action targets.
    pub fn send(&mut self) -> ClockTransition {
        self.advance_to(self.value + 1)
    }

    /// `max(local, received) + 1`. Callers keep `received` at or below
    /// [`crate::wire::MAX_TIMESTAMP`], which leaves about 2^63 increments of
    /// headroom before the value could wrap.
    pub fn receive(&mut self, received: u64) -> ClockTransition {
        self.advance_to(self.value.max(received) + 1)
    }

    fn advance_to(&mut self, new: u64) -> ClockTransition {
        debug_assert!(new > self.value);
        let old = self.value;
        self.value = new;
        ClockTransition { old, new }
    }
}
