//! Refresh cycle state machine
//!
//! Idle → Downloading → LockAcquired → Deciding → {Skipped | Transforming}
//! Transforming → Promoting → Committed
//!
//! `Failed` is reachable from every non-terminal state.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Idle,
    Downloading,
    LockAcquired,
    Deciding,
    /// Lock unavailable or feed unchanged
    Skipped,
    Transforming,
    Promoting,
    Committed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleState::Skipped | CycleState::Committed | CycleState::Failed
        )
    }

    pub fn can_transition_to(&self, target: CycleState) -> bool {
        use CycleState::*;
        match (self, target) {
            (Idle, Downloading) => true,
            (Downloading, LockAcquired) => true,
            // Another cycle holds the lock.
            (Downloading, Skipped) => true,
            (LockAcquired, Deciding) => true,
            (Deciding, Skipped) => true,
            (Deciding, Transforming) => true,
            (Transforming, Promoting) => true,
            (Promoting, Committed) => true,

            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "IDLE",
            CycleState::Downloading => "DOWNLOADING",
            CycleState::LockAcquired => "LOCK_ACQUIRED",
            CycleState::Deciding => "DECIDING",
            CycleState::Skipped => "SKIPPED",
            CycleState::Transforming => "TRANSFORMING",
            CycleState::Promoting => "PROMOTING",
            CycleState::Committed => "COMMITTED",
            CycleState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of one cycle and logs each transition.
#[derive(Debug)]
pub(crate) struct StateTracker {
    current: CycleState,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: CycleState::Idle,
        }
    }

    pub(crate) fn current(&self) -> CycleState {
        self.current
    }

    pub(crate) fn enter(&mut self, next: CycleState) {
        debug_assert!(
            self.current.can_transition_to(next),
            "invalid cycle transition {} -> {}",
            self.current,
            next
        );
        tracing::debug!(from = %self.current, to = %next, "cycle state");
        self.current = next;
    }

    /// Move to `Failed` unless the cycle already ended.
    pub(crate) fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.enter(CycleState::Failed);
        }
    }
}
