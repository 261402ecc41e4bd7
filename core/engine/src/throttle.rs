//! FILENAME: core/engine/src/throttle.rs
//! PURPOSE: Throttling of row-set updates.
//! CONTEXT: The engine is single-threaded and has no timers of its own. A
//! throttled update records a deadline; the host calls
//! `GridEngine::poll_pending_rows` (e.g. from its event loop) and the update
//! is applied once the deadline has passed. Time comes from a `Clock` so
//! tests can drive it by hand.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    ApplyNow,
    /// Apply once this instant is reached.
    Deferred(Instant),
}

#[derive(Debug, Clone)]
pub struct RowsThrottle {
    interval: Duration,
    last_update: Option<Instant>,
    deadline: Option<Instant>,
}

impl RowsThrottle {
    pub fn new(interval_ms: u64) -> Self {
        RowsThrottle {
            interval: Duration::from_millis(interval_ms),
            last_update: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedules an update. Any pending update is superseded. Unthrottled
    /// (forced) updates always apply at once.
    pub fn schedule(&mut self, now: Instant, throttle: bool) -> ThrottleDecision {
        self.deadline = None;

        if !throttle || self.interval.is_zero() {
            return ThrottleDecision::ApplyNow;
        }

        let Some(last) = self.last_update else {
            return ThrottleDecision::ApplyNow;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.interval {
            return ThrottleDecision::ApplyNow;
        }

        let deadline = now + (self.interval - elapsed);
        self.deadline = Some(deadline);
        ThrottleDecision::Deferred(deadline)
    }

    pub fn mark_applied(&mut self, now: Instant) {
        self.deadline = None;
        self.last_update = Some(now);
    }

    /// True when a pending update is due. The pending state is consumed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drops the pending update. Returns true if there was one.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
