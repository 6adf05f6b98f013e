//! Buffering debouncer
//!
//! Filters the raw "is buffering now" signal of a native handle into the
//! activity state a view exposes. Stalls shorter than the threshold never
//! surface; longer ones surface exactly once and resolve back to the last
//! stable state.
//!
//! The debouncer owns no timer. The caller arms one from [`deadline`] and
//! calls [`poll`] when it fires, which keeps the state machine synchronous
//! and lets each view cancel its timer by dropping it.
//!
//! [`deadline`]: BufferingDebouncer::deadline
//! [`poll`]: BufferingDebouncer::poll

use crate::types::ActivityState;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct BufferingDebouncer {
    threshold: Duration,
    current: ActivityState,
    /// State to return to once the stall ends
    last_stable: Option<ActivityState>,
    raw_buffering: bool,
    deadline: Option<Instant>,
}

impl BufferingDebouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            current: ActivityState::Idle,
            last_stable: None,
            raw_buffering: false,
            deadline: None,
        }
    }

    /// Currently exposed state
    pub fn current(&self) -> ActivityState {
        self.current
    }

    /// True while the raw signal reports a stall, exposed or not
    pub fn is_raw_buffering(&self) -> bool {
        self.raw_buffering
    }

    /// When the pending stall would become visible
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feed a raw buffering flip. Returns the newly exposed state, if any.
    pub fn on_raw_buffering(&mut self, buffering: bool, now: Instant) -> Option<ActivityState> {
        if buffering == self.raw_buffering {
            return None;
        }
        self.raw_buffering = buffering;

        if buffering {
            // Nothing stable has been observed yet while idle
            self.last_stable = (self.current != ActivityState::Idle).then_some(self.current);
            self.deadline = Some(now + self.threshold);
            return None;
        }

        self.deadline = None;
        let stable = self.last_stable.take();
        if self.current == ActivityState::Buffering {
            self.expose(stable.unwrap_or(ActivityState::Playing))
        } else {
            None
        }
    }

    /// Fire the pending timer if its deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<ActivityState> {
        match self.deadline {
            Some(deadline) if now >= deadline && self.raw_buffering => {
                self.deadline = None;
                self.expose(ActivityState::Buffering)
            }
            _ => None,
        }
    }

    /// Feed a non-buffering activity change (play, pause, completion, ...)
    pub fn on_activity(&mut self, state: ActivityState) -> Option<ActivityState> {
        if state == ActivityState::Buffering {
            return None;
        }

        if state.interrupts_buffering() {
            self.raw_buffering = false;
            self.deadline = None;
            self.last_stable = None;
            return self.expose(state);
        }

        if self.current == ActivityState::Buffering {
            // Resolved when the stall ends
            self.last_stable = Some(state);
            return None;
        }

        if self.raw_buffering {
            self.last_stable = Some(state);
        }
        self.expose(state)
    }

    fn expose(&mut self, state: ActivityState) -> Option<ActivityState> {
        if state == self.current {
            return None;
        }
        self.current = state;
        Some(state)
    }
}
