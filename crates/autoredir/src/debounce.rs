//! Settle timer gating action dispatch
//!
//! The listing utility misbehaves when invoked while USB enumeration is still
//! in progress, so a detected change only arms a deadline. Every further
//! change pushes the deadline out again; the debouncer fires once the input
//! has been quiet for the whole settle delay.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug)]
pub struct Debouncer {
    settle_delay: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    /// (Re)arm the deadline at `now + settle_delay`
    pub fn observe_change(&mut self, now: Instant) {
        self.state = DebounceState::Pending {
            deadline: now + self.settle_delay,
        };
    }

    /// True exactly once per settled burst, returning to `Idle`
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }
}
