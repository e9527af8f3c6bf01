//! Termination handling (SIGINT/SIGTERM)
//!
//! On the first termination signal every registered collaborator is
//! SIGKILLed and the process exits with [`EXIT_CODE_TERMINATED`]. The open
//! bookkeeping transaction is not touched: dropping the connection makes the
//! server roll it back.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::process::ChildRegistry;

/// Exit code after a termination signal: 128 + SIGINT.
///
/// Used for SIGTERM as well, not 143. `ctrlc` does not report which signal
/// fired, and callers match a single "terminated" code.
pub const EXIT_CODE_TERMINATED: i32 = 130;

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: kill children, then exit
    Terminate,
    /// Already terminating
    Ignore,
}

/// Signal state shared with the handler thread.
#[derive(Debug)]
pub struct SignalState {
    registry: Arc<ChildRegistry>,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self {
            registry,
            signal_count: AtomicU8::new(0),
        }
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal. Children are killed on the first one only.
    ///
    /// Returns the action plus the number of children that were signalled.
    pub fn handle_signal(&self) -> (SignalAction, usize) {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        if count > 0 {
            return (SignalAction::Ignore, 0);
        }
        (SignalAction::Terminate, self.registry.kill_all())
    }
}

/// Installs the process-wide termination handler.
pub struct TerminationHandler {
    state: Arc<SignalState>,
}

impl TerminationHandler {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self {
            state: Arc::new(SignalState::new(registry)),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM.
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || {
            if let (SignalAction::Terminate, killed) = state.handle_signal() {
                tracing::warn!(killed, "termination signal received, killed running collaborators");
                std::process::exit(EXIT_CODE_TERMINATED);
            }
        })
    }
}
