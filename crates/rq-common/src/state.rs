//! Deferred notifier state machine.
//!
//! The notifier work item is either idle or queued on the worker:
//! IDLE → SCHEDULED when a trigger enqueues it, SCHEDULED → IDLE when the
//! worker runs the callback. Scheduling an already scheduled item is
//! coalesced by the caller, not a transition.

use crate::error::{RqError, RqResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the deferred notifier work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifierState {
    /// Not queued; the next trigger will enqueue it.
    #[default]
    Idle,
    /// Queued on the worker, announcement pending.
    Scheduled,
}

impl fmt::Display for NotifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

impl NotifierState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: NotifierState) -> bool {
        use NotifierState::{Idle, Scheduled};

        matches!((self, target), (Idle, Scheduled) | (Scheduled, Idle))
    }

    /// Attempt to transition to `target`, returning error if invalid.
    pub fn transition_to(&mut self, target: NotifierState) -> RqResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(RqError::InvalidArgument(format!(
                "invalid notifier transition from {self} to {target}"
            )))
        }
    }

    /// Returns true if an announcement is pending on the worker.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Scheduled)
    }
}

/// Notifier state with run accounting.
#[derive(Debug, Clone, Default)]
pub struct NotifierMachine {
    current: NotifierState,
    scheduled_count: u64,
    delivered_count: u64,
}

impl NotifierMachine {
    /// Create a machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> NotifierState {
        self.current
    }

    /// Number of times the item was enqueued.
    #[must_use]
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled_count
    }

    /// Number of times the worker ran the callback.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    /// IDLE → SCHEDULED. Returns false if the item was already pending.
    pub fn try_schedule(&mut self) -> bool {
        if self.current.transition_to(NotifierState::Scheduled).is_err() {
            return false;
        }
        self.scheduled_count += 1;
        true
    }

    /// SCHEDULED → IDLE, taken by the worker before announcing.
    pub fn begin_run(&mut self) -> RqResult<()> {
        self.current.transition_to(NotifierState::Idle)?;
        self.delivered_count += 1;
        Ok(())
    }

    /// Return a pending item to IDLE without running it.
    pub fn cancel(&mut self) {
        if self.current.is_pending() {
            self.current = NotifierState::Idle;
        }
    }
}
